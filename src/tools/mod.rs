//! Tools module - agent capabilities
//!
//! Tools are external actions the agent can take. The agent only depends on
//! the [`ToolExecutor`] contract; [`ToolRunner`] is the registry-backed
//! implementation that concrete [`Tool`]s plug into.

mod remember;
mod runner;

pub use remember::RememberTool;
pub use runner::{ToolDefinition, ToolRunner};

use async_trait::async_trait;
use serde_json::{Map, Value};
use crate::Result;

/// Executes tool calls on behalf of the agent.
///
/// Implementations may take as long as the turn timeout allows and must report
/// failures through the returned text or error, never by panicking.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run the named tool with already-decoded arguments
    async fn execute(&self, name: &str, args: Map<String, Value>) -> Result<String>;

    /// Schemas advertised to the model
    fn schemas(&self) -> Vec<ToolDefinition>;
}

/// Tool trait - interface for all agent tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name used in function calls
    fn name(&self) -> &str;

    /// Description of what the tool does
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters(&self) -> Value;

    /// Execute the tool with given parameters
    async fn execute(&self, params: Value) -> Result<String>;

    /// Convert to tool definition for LLM
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Dummy tool for testing
#[cfg(test)]
pub struct DummyTool {
    pub name: String,
    pub result: String,
}

#[cfg(test)]
#[async_trait]
impl Tool for DummyTool {
    fn name(&self) -> &str { &self.name }
    fn description(&self) -> &str { "Dummy tool for testing" }
    fn parameters(&self) -> Value { serde_json::json!({"type": "object"}) }

    async fn execute(&self, _params: Value) -> Result<String> {
        Ok(self.result.clone())
    }
}
