//! Tool registry for model-requested invocations.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::RwLock;
use tracing::debug;

use crate::chat::tools::base::Tool;
use crate::errors::ToolError;
use crate::providers::base::ToolCall;

/// Registry of available tools.
///
/// Tools are keyed by name; registering a name twice replaces the earlier
/// tool. The map is ordered so definitions are handed to the model in a
/// stable order.
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a tool. The last registration for a name wins.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        let mut tools = self.tools.write().await;
        if tools.insert(name.clone(), tool).is_some() {
            debug!("Replaced existing tool registration: {}", name);
        }
    }

    /// Check if a tool is registered.
    pub async fn has_tool(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    /// Registered tool names, in name order.
    pub async fn tool_names(&self) -> Vec<String> {
        self.tools.read().await.keys().cloned().collect()
    }

    /// Number of registered tools.
    pub async fn len(&self) -> usize {
        self.tools.read().await.len()
    }

    /// True when no tools are registered.
    pub async fn is_empty(&self) -> bool {
        self.tools.read().await.is_empty()
    }

    /// Tool definitions in OpenAI function schema format, in name order.
    pub async fn definitions(&self) -> Vec<serde_json::Value> {
        self.tools
            .read()
            .await
            .values()
            .map(|t| t.to_schema())
            .collect()
    }

    /// Dispatch a model-requested tool call.
    ///
    /// Unknown names, unparseable arguments, tool failures, and tool panics
    /// all come back as [`ToolError`] so the conversation can report them
    /// and continue. A panicking tool does not take the registry down.
    pub async fn execute(&self, call: &ToolCall) -> Result<String, ToolError> {
        let tool = {
            let tools = self.tools.read().await;
            tools.get(&call.name).cloned()
        };
        let Some(tool) = tool else {
            return Err(ToolError::UnknownTool {
                name: call.name.clone(),
            });
        };

        let params = call
            .parse_arguments()
            .map_err(|e| ToolError::InvalidParameters {
                name: call.name.clone(),
                message: e.to_string(),
            })?;

        match std::panic::AssertUnwindSafe(tool.execute(params))
            .catch_unwind()
            .await
        {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(ToolError::ExecutionFailed {
                name: call.name.clone(),
                message: e.to_string(),
            }),
            Err(_) => Err(ToolError::Panicked {
                name: call.name.clone(),
            }),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
