//! Session module - conversation history storage
//!
//! The agent loads a [`Session`] at the start of each turn, appends to it and
//! saves it at the end. Storage is behind the [`SessionManager`] trait:
//! [`FileSessionManager`] keeps one JSONL file per session on disk and
//! [`InMemorySessionManager`] keeps everything in a map.

mod file;
mod types;

pub use file::FileSessionManager;
pub use types::{Session, SessionMessage};

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Error;
use crate::Result;

/// Loads and persists sessions by key.
#[async_trait]
pub trait SessionManager: Send + Sync {
    /// Load the session for `key`, or start an empty one. An empty key gets a
    /// freshly generated id.
    async fn get_or_create(&self, key: &str) -> Result<Session>;

    /// Persist the whole session, replacing what was stored.
    async fn save(&self, session: &Session) -> Result<()>;

    /// Remove a stored session. Missing keys are an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

pub(crate) fn new_session_key() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn not_found() -> Error {
    Error::Session("session not found".to_string())
}

/// Session manager without persistence.
#[derive(Default)]
pub struct InMemorySessionManager {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored session for `key`, if any.
    pub async fn get(&self, key: &str) -> Option<Session> {
        self.sessions.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl SessionManager for InMemorySessionManager {
    async fn get_or_create(&self, key: &str) -> Result<Session> {
        if key.is_empty() {
            return Ok(Session::new(new_session_key()));
        }

        Ok(self
            .sessions
            .read()
            .await
            .get(key)
            .cloned()
            .unwrap_or_else(|| Session::new(key)))
    }

    async fn save(&self, session: &Session) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(session.key.clone(), session.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.sessions
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(not_found)
    }
}
