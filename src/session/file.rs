//! JSONL session persistence.
//!
//! Each session lives in `<dir>/<encoded key>.jsonl`, one message per line.
//! Writes go to a temp file first and are renamed into place.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Error;
use crate::Result;

use super::{new_session_key, not_found, Session, SessionManager, SessionMessage};

const EXTENSION: &str = "jsonl";

/// File-backed [`SessionManager`].
pub struct FileSessionManager {
    dir: PathBuf,
    lock: RwLock<()>,
}

impl FileSessionManager {
    /// Use `dir` for storage, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            lock: RwLock::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", encode_key(key), EXTENSION))
    }

    /// Keys of every stored session, sorted.
    pub async fn list(&self) -> Result<Vec<String>> {
        let _guard = self.lock.read().await;

        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(decode_key(stem));
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn load(&self, key: &str) -> Result<Option<Session>> {
        let _guard = self.lock.read().await;

        let content = match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut messages = Vec::new();
        for (i, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let msg: SessionMessage = serde_json::from_str(line).map_err(|e| {
                Error::Session(format!("failed to parse message at line {}: {}", i + 1, e))
            })?;
            messages.push(msg);
        }

        let mut session = Session::new(key);
        if let (Some(first), Some(last)) = (messages.first(), messages.last()) {
            session.created_at = first.timestamp;
            session.updated_at = last.timestamp;
        }
        session.messages = messages;
        Ok(Some(session))
    }
}

#[async_trait]
impl SessionManager for FileSessionManager {
    async fn get_or_create(&self, key: &str) -> Result<Session> {
        if key.is_empty() {
            return Ok(Session::new(new_session_key()));
        }

        match self.load(key).await? {
            Some(session) => {
                debug!(key, messages = session.len(), "Loaded session");
                Ok(session)
            }
            None => Ok(Session::new(key)),
        }
    }

    async fn save(&self, session: &Session) -> Result<()> {
        if session.key.is_empty() {
            return Err(Error::Session("invalid session key".to_string()));
        }

        let mut content = String::new();
        for msg in &session.messages {
            content.push_str(&serde_json::to_string(msg)?);
            content.push('\n');
        }

        let _guard = self.lock.write().await;

        let path = self.path_for(&session.key);
        let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
        tokio::fs::write(&tmp, content).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(key = %session.key, messages = session.len(), "Saved session");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.lock.write().await;

        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Percent-encode characters that are unsafe in file names. Reversible.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for c in key.chars() {
        match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '%' | '.' => {
                let mut buf = [0u8; 4];
                for b in c.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!("%{:02X}", b));
                }
            }
            c => out.push(c),
        }
    }
    out
}

fn decode_key(name: &str) -> String {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let Some(Ok(b)) = name.get(i + 1..i + 3).map(|hex| u8::from_str_radix(hex, 16)) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
