//! # Session Store
//!
//! Where wizard progress lives between requests so a reload resumes mid-flow.
//!
//! ## Backends
//!
//! - Memory: per-process map, lost on restart
//! - File: one JSON document per session under a directory
//! - Redis: provided by the server crate
//!
//! A session is client convenience state, not an audit record. Blobs that no
//! longer deserialize are reported as [`StoreError::Corrupt`] so the wizard can
//! discard them.
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::{fs, sync::RwLock};
use tracing::debug;

use crate::{error::StoreError, state::SessionState};

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, StoreError>;

    async fn save(&self, session_id: &str, state: &SessionState) -> Result<(), StoreError>;

    async fn clear(&self, session_id: &str) -> Result<(), StoreError>;
}

pub fn encode(state: &SessionState) -> Result<String, StoreError> {
    Ok(serde_json::to_string(state)?)
}

pub fn decode(session_id: &str, raw: &str) -> Result<SessionState, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
        session_id: session_id.to_string(),
        reason: e.to_string(),
    })
}

/// Session ids end up in file names and cache keys.
pub fn check_session_id(session_id: &str) -> Result<(), StoreError> {
    let valid = !session_id.is_empty()
        && session_id.len() <= 128
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(session_id.to_string()))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an already serialized blob as-is.
    pub async fn insert_raw(&self, session_id: &str, raw: &str) {
        self.sessions
            .write()
            .await
            .insert(session_id.to_string(), raw.to_string());
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, StoreError> {
        check_session_id(session_id)?;

        match self.sessions.read().await.get(session_id) {
            Some(raw) => decode(session_id, raw).map(Some),
            None => Ok(None),
        }
    }

    async fn save(&self, session_id: &str, state: &SessionState) -> Result<(), StoreError> {
        check_session_id(session_id)?;

        let raw = encode(state)?;
        self.sessions
            .write()
            .await
            .insert(session_id.to_string(), raw);

        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<(), StoreError> {
        check_session_id(session_id)?;

        self.sessions.write().await.remove(session_id);

        Ok(())
    }
}

pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        fs::create_dir_all(dir.as_ref()).await?;

        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    fn path(&self, session_id: &str) -> Result<PathBuf, StoreError> {
        check_session_id(session_id)?;

        Ok(self.dir.join(format!("{session_id}.json")))
    }
}

#[async_trait]
impl SessionStore for FileStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, StoreError> {
        let path = self.path(session_id)?;

        match fs::read_to_string(&path).await {
            Ok(raw) => decode(session_id, &raw).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, session_id: &str, state: &SessionState) -> Result<(), StoreError> {
        let path = self.path(session_id)?;
        let tmp = path.with_extension("json.tmp");

        fs::write(&tmp, encode(state)?).await?;
        fs::rename(&tmp, &path).await?;

        debug!("Saved session {session_id} to {}", path.display());

        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<(), StoreError> {
        let path = self.path(session_id)?;

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::at_confirm;

    #[tokio::test]
    async fn memory_round_trip() {
        let store = MemoryStore::new();
        assert!(store.load("voter-1").await.unwrap().is_none());

        store.save("voter-1", &at_confirm()).await.unwrap();
        assert_eq!(store.load("voter-1").await.unwrap(), Some(at_confirm()));

        store.clear("voter-1").await.unwrap();
        assert!(store.load("voter-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unreadable_blob_is_corrupt() {
        let store = MemoryStore::new();
        store.insert_raw("voter-1", r#"{"step": 42}"#).await;

        assert!(matches!(
            store.load("voter-1").await,
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn rejects_path_like_ids() {
        let store = MemoryStore::new();

        assert!(matches!(
            store.load("../etc/passwd").await,
            Err(StoreError::InvalidKey(_))
        ));
        assert!(matches!(store.clear("").await, Err(StoreError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("sessions")).await.unwrap();

        store.save("voter-1", &at_confirm()).await.unwrap();
        assert_eq!(store.load("voter-1").await.unwrap(), Some(at_confirm()));

        let reopened = FileStore::open(dir.path().join("sessions")).await.unwrap();
        assert_eq!(reopened.load("voter-1").await.unwrap(), Some(at_confirm()));

        store.clear("voter-1").await.unwrap();
        store.clear("voter-1").await.unwrap();
        assert!(store.load("voter-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("voter-1.json"), "not json").unwrap();

        assert!(matches!(
            store.load("voter-1").await,
            Err(StoreError::Corrupt { .. })
        ));
    }
}
