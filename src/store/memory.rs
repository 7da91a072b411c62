use super::{SessionStore, validate_session_id};
use crate::errors::StoreError;
use async_trait::async_trait;
use refinery_common::Session;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-process store. Snapshots live as long as the process.
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn init(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn create(&self, session: &Session) -> Result<(), StoreError> {
        validate_session_id(&session.id)?;
        let mut sessions = self.sessions.write().await;
        if sessions.insert(session.id.clone(), session.clone()).is_some() {
            tracing::info!(session_id = %session.id, "Replaced existing session with a fresh one");
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn put(&self, session: &Session) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session.id) {
            Some(slot) => {
                *slot = session.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                id: session.id.clone(),
            }),
        }
    }

    async fn list(&self) -> Result<Vec<Session>, StoreError> {
        let mut all: Vec<Session> = self.sessions.read().await.values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(all)
    }
}
