use super::{SessionStore, validate_session_id};
use crate::errors::StoreError;
use async_trait::async_trait;
use refinery_common::Session;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// One pretty-printed JSON file per session under a state directory.
///
/// Writes go to a temp file that is renamed over the target, so a reader
/// never sees a half-written snapshot.
pub struct FileStore {
    dir: PathBuf,
    write_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn lock_for(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.write_locks.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    /// Give back a lock taken with `lock_for`. The entry goes once no writer holds or awaits it.
    fn release_lock(&self, id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.write_locks.lock().unwrap_or_else(|p| p.into_inner());
        drop(lock);
        if locks.get(id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(id);
        }
    }

    async fn replace_snapshot(&self, session: &Session) -> Result<(), StoreError> {
        if !tokio::fs::try_exists(self.path_for(&session.id))
            .await
            .unwrap_or(false)
        {
            return Err(StoreError::NotFound {
                id: session.id.clone(),
            });
        }
        self.write_snapshot(session).await
    }

    async fn write_snapshot(&self, session: &Session) -> Result<(), StoreError> {
        let path = self.path_for(&session.id);
        let tmp = self.dir.join(format!(".{}.json.tmp", session.id));
        let body = serde_json::to_vec_pretty(session).map_err(|source| StoreError::Serde {
            id: session.id.clone(),
            source,
        })?;
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|source| StoreError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| StoreError::Io { path, source })
    }

    async fn read_snapshot(&self, path: &Path, id: &str) -> Result<Option<Session>, StoreError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Serde {
                id: id.to_string(),
                source,
            })
    }
}

#[async_trait]
impl SessionStore for FileStore {
    async fn init(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StoreError::Io {
                path: self.dir.clone(),
                source,
            })
    }

    async fn create(&self, session: &Session) -> Result<(), StoreError> {
        validate_session_id(&session.id)?;
        let lock = self.lock_for(&session.id);
        let result = {
            let _guard = lock.lock().await;
            self.write_snapshot(session).await
        };
        self.release_lock(&session.id, lock);
        result
    }

    async fn get(&self, id: &str) -> Result<Option<Session>, StoreError> {
        validate_session_id(id)?;
        self.read_snapshot(&self.path_for(id), id).await
    }

    async fn put(&self, session: &Session) -> Result<(), StoreError> {
        validate_session_id(&session.id)?;
        let lock = self.lock_for(&session.id);
        let result = {
            let _guard = lock.lock().await;
            self.replace_snapshot(session).await
        };
        self.release_lock(&session.id, lock);
        result
    }

    async fn list(&self) -> Result<Vec<Session>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.dir.clone(),
                    source,
                });
            }
        };

        let mut sessions = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })? {
            let path = entry.path();
            let Some(id) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(".json"))
            else {
                continue;
            };
            if id.starts_with('.') {
                continue;
            }
            match self.read_snapshot(&path, id).await {
                Ok(Some(s)) => sessions.push(s),
                Ok(None) => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable session file"),
            }
        }
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }
}
