//! Base model client interface.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// A tool call requested by the model.
///
/// `arguments` is the raw JSON object string as the provider sent it; the
/// registry parses it at dispatch time so malformed arguments surface as a
/// parameter error for that one call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    /// Convert to OpenAI function-call JSON format.
    pub fn to_wire_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "type": "function",
            "function": {
                "name": self.name,
                "arguments": self.arguments,
            }
        })
    }

    /// Parse the argument string into a parameter map.
    pub fn parse_arguments(
        &self,
    ) -> serde_json::Result<std::collections::HashMap<String, serde_json::Value>> {
        serde_json::from_str(&self.arguments)
    }
}

/// Token usage reported by the provider for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl Usage {
    /// Fold another report into this one. A turn with several model requests
    /// accumulates them all.
    pub fn accumulate(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// One message in a conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system`, `user`, `assistant`, or `tool`.
    pub role: String,
    pub content: String,
    /// Tool name, present on `tool` role messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Links a `tool` role message to the assistant call it answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool calls carried by an `assistant` message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain("assistant", content)
    }

    /// Tool result message answering `tool_call_id`.
    pub fn tool(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: "tool".to_string(),
            content: content.into(),
            name: Some(name.into()),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: Vec::new(),
        }
    }

    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            name: None,
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }
}

/// A fully assembled model request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    /// System instructions, sent ahead of `messages` when present.
    pub system_prompt: Option<String>,
    pub messages: Vec<ChatMessage>,
    /// Tool definitions in OpenAI function format. Empty means no tools.
    pub tool_defs: Vec<serde_json::Value>,
    pub temperature: f64,
    pub max_tokens: u32,
    /// End-user identifier forwarded to the provider.
    pub user: Option<String>,
}

/// Response from a model client.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: String,
    pub usage: Usage,
}

impl ModelResponse {
    /// Check if response contains tool calls.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A fragment from an SSE streaming response.
#[derive(Debug, Clone)]
pub enum Fragment {
    /// Incremental reply text from the model.
    TextDelta(String),
    /// Incremental reasoning content.
    ReasoningDelta(String),
    /// Stream complete. Contains the fully assembled response.
    Done(ModelResponse),
}

/// Handle to a streaming model response.
pub struct StreamHandle {
    pub rx: tokio::sync::mpsc::UnboundedReceiver<Fragment>,
}

/// Abstract base trait for model clients.
///
/// Implementations handle the specifics of each provider's API while the
/// conversation loop stays provider-agnostic.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Send a completion request and wait for the full response.
    ///
    /// Cancelling `cancel` aborts the in-flight request; the call returns
    /// with a cancellation error.
    async fn send(&self, request: &ChatRequest, cancel: &CancellationToken)
        -> Result<ModelResponse>;

    /// Send a streaming completion request.
    ///
    /// Default implementation falls back to buffered `send()`.
    async fn stream(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<StreamHandle> {
        let response = self.send(request, cancel).await?;
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        if let Some(ref content) = response.content {
            let _ = tx.send(Fragment::TextDelta(content.clone()));
        }
        let _ = tx.send(Fragment::Done(response));
        Ok(StreamHandle { rx })
    }

    /// Get the default model for this client.
    fn get_default_model(&self) -> &str;
}
