//! Active-run registry: one cancellation token per running session id.

use crate::errors::OrchestratorError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    active: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim `id` for a new run. A session may only have one run at a time.
    pub fn register(&self, id: &str) -> Result<RunGuard, OrchestratorError> {
        let mut active = self.lock();
        if active.contains_key(id) {
            return Err(OrchestratorError::AlreadyRunning { id: id.to_string() });
        }
        let token = CancellationToken::new();
        active.insert(id.to_string(), token.clone());
        Ok(RunGuard {
            registry: self.clone(),
            id: id.to_string(),
            token,
        })
    }

    /// Request cancellation. Returns false when no run is active for `id`.
    pub fn cancel(&self, id: &str) -> bool {
        match self.lock().get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let active = self.lock();
        for token in active.values() {
            token.cancel();
        }
        active.len()
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Releases the session id when the run ends, however it ends.
#[derive(Debug)]
pub struct RunGuard {
    registry: RunRegistry,
    id: String,
    token: CancellationToken,
}

impl RunGuard {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
    }
}
