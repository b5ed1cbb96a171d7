//! Remember tool - lets the model append facts to long-term memory

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use super::Tool;
use crate::error::Error;
use crate::memory::FileMemoryStore;
use crate::Result;

pub struct RememberTool {
    store: Arc<FileMemoryStore>,
}

impl RememberTool {
    pub fn new(store: Arc<FileMemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for RememberTool {
    fn name(&self) -> &str {
        "remember"
    }

    fn description(&self) -> &str {
        "Save a fact about the user or their context to long-term memory"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "fact": {
                    "type": "string",
                    "description": "The fact to remember, as one short sentence"
                }
            },
            "required": ["fact"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let fact = params
            .get("fact")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Tool("Missing 'fact' parameter".to_string()))?;

        let entry = format!("- [{}] {}", Utc::now().format("%Y-%m-%d"), fact);
        self.store.append_long_term(&entry)?;

        Ok("Saved to long-term memory.".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLoader;
    use crate::tools::{ToolExecutor, ToolRunner};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_remember_through_runner() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileMemoryStore::new(dir.path()));

        let mut runner = ToolRunner::new();
        runner.register(RememberTool::new(Arc::clone(&store)));

        let mut args = serde_json::Map::new();
        args.insert("fact".into(), json!("Prefers tea over coffee"));
        let out = runner.execute("remember", args).await.unwrap();
        assert_eq!(out, "Saved to long-term memory.");

        let memory = store.load_memory().unwrap();
        assert!(memory.starts_with("- ["));
        assert!(memory.ends_with("] Prefers tea over coffee"));
    }

    #[tokio::test]
    async fn test_missing_fact_is_error() {
        let dir = TempDir::new().unwrap();
        let tool = RememberTool::new(Arc::new(FileMemoryStore::new(dir.path())));

        assert!(matches!(tool.execute(json!({})).await, Err(Error::Tool(_))));
        assert!(matches!(tool.execute(json!({"fact": "  "})).await, Err(Error::Tool(_))));
    }
}
