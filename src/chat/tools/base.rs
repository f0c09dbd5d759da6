//! Base trait for chat tools.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

/// Abstract base trait for chat tools.
///
/// Tools are capabilities the model can invoke during a conversation turn,
/// such as running a command or reading files. A failed invocation returns
/// `Err`; the registry reports it back to the model without ending the turn.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name used in function calls.
    fn name(&self) -> &str;

    /// Description of what the tool does.
    fn description(&self) -> &str;

    /// JSON Schema for tool parameters.
    fn parameters(&self) -> serde_json::Value;

    /// Execute the tool with given parameters.
    async fn execute(&self, params: HashMap<String, serde_json::Value>) -> Result<String>;

    /// Convert tool to OpenAI function schema format.
    fn to_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name(),
                "description": self.description(),
                "parameters": self.parameters(),
            }
        })
    }
}
