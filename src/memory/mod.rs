//! Memory module - long-term notes injected into the system prompt

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::Error;
use crate::Result;

/// Read-only source of long-term memory text.
///
/// Consulted once per prompt build. An empty string means nothing to add.
pub trait MemoryLoader: Send + Sync {
    fn load_memory(&self) -> Result<String>;
}

/// File-based memory store rooted at `<workspace>/memory`
pub struct FileMemoryStore {
    workspace: PathBuf,
}

impl FileMemoryStore {
    pub fn new(workspace: &Path) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
        }
    }

    fn memory_dir(&self) -> PathBuf {
        self.workspace.join("memory")
    }

    pub fn long_term_path(&self) -> PathBuf {
        self.memory_dir().join("MEMORY.md")
    }

    /// Append a line to MEMORY.md, creating it if needed
    pub fn append_long_term(&self, content: &str) -> Result<()> {
        let path = self.long_term_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut current = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        if !current.is_empty() && !current.ends_with('\n') {
            current.push('\n');
        }
        current.push_str(content);
        current.push('\n');
        std::fs::write(&path, current)?;
        Ok(())
    }
}

impl MemoryLoader for FileMemoryStore {
    fn load_memory(&self) -> Result<String> {
        match std::fs::read_to_string(self.long_term_path()) {
            Ok(text) => Ok(text.trim().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(Error::Memory(format!("failed to read MEMORY.md: {e}"))),
        }
    }
}

/// In-memory store for embedding and tests
#[derive(Default)]
pub struct InMemoryStore {
    long_term: Mutex<String>,
}

impl InMemoryStore {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            long_term: Mutex::new(content.into()),
        }
    }

    pub fn set(&self, content: impl Into<String>) {
        *self.long_term.lock().unwrap_or_else(PoisonError::into_inner) = content.into();
    }
}

impl MemoryLoader for InMemoryStore {
    fn load_memory(&self) -> Result<String> {
        Ok(self.long_term.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }
}
