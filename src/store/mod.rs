//! Session persistence.
//!
//! The orchestrator only sees the [`SessionStore`] trait. Two backends exist:
//! - [`MemoryStore`]: process-lifetime map, the default for `serve`
//! - [`FileStore`]: one JSON file per session, used when `state_dir` is configured

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::errors::StoreError;
use async_trait::async_trait;
use refinery_common::Session;

/// Keyed storage of the latest snapshot of each session.
///
/// Implementations serialize writes per session id and must not block writes
/// to other sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Prepare the backend. Idempotent.
    async fn init(&self) -> Result<(), StoreError>;

    /// Store a fresh session, replacing any snapshot with the same id.
    async fn create(&self, session: &Session) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Session>, StoreError>;

    /// Replace the snapshot of an existing session.
    async fn put(&self, session: &Session) -> Result<(), StoreError>;

    /// All sessions, most recently updated first.
    async fn list(&self) -> Result<Vec<Session>, StoreError>;
}

/// Session ids become file names, so only a conservative alphabet is accepted.
pub fn validate_session_id(id: &str) -> Result<(), StoreError> {
    let ok = !id.is_empty()
        && id.len() <= 128
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidId { id: id.to_string() })
    }
}
