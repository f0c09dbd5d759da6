//! Domain error types for chatling.
//!
//! Typed errors at module boundaries replace string-encoded errors and
//! enable structured error handling via pattern matching.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Conversation errors
// ---------------------------------------------------------------------------

/// Fatal errors that end a conversation turn.
///
/// Recoverable failures (an unknown tool, a tool that returns an error) are
/// reported into the conversation itself and never surface here.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("no model client configured")]
    NotConfigured,

    #[error("run cancelled")]
    Cancelled,

    #[error("model request failed: {source}")]
    Transport {
        #[source]
        source: anyhow::Error,
    },

    #[error("tool iteration limit reached after {iterations} rounds")]
    IterationLimitExceeded { iterations: u32 },
}

impl ChatError {
    /// Process exit code for the CLI. Success is 0; each failure category
    /// gets its own code so scripts can branch on the outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            ChatError::NotConfigured => 2,
            ChatError::Transport { .. } => 3,
            ChatError::IterationLimitExceeded { .. } => 4,
            ChatError::Cancelled => 130,
        }
    }
}

// ---------------------------------------------------------------------------
// Tool errors
// ---------------------------------------------------------------------------

/// Failures from dispatching a model-requested tool call.
///
/// Every variant carries the tool name so the failure can be attributed in
/// events and in the message fed back to the model.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("tool {name}: invalid parameters: {message}")]
    InvalidParameters { name: String, message: String },

    #[error("tool {name}: {message}")]
    ExecutionFailed { name: String, message: String },

    #[error("tool {name}: panicked during execution")]
    Panicked { name: String },
}

impl ToolError {
    /// Name of the tool the failure is attributed to.
    pub fn tool_name(&self) -> &str {
        match self {
            ToolError::UnknownTool { name }
            | ToolError::InvalidParameters { name, .. }
            | ToolError::ExecutionFailed { name, .. }
            | ToolError::Panicked { name } => name,
        }
    }
}

// ---------------------------------------------------------------------------
// Provider errors
// ---------------------------------------------------------------------------

/// Errors from model provider operations.
///
/// Embedded in `anyhow::Error` so the `ModelClient` trait signature
/// (`-> anyhow::Result<ModelResponse>`) stays unchanged while callers
/// can downcast: `e.downcast_ref::<ProviderError>()`.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Failed to read response body: {0}")]
    ResponseReadError(String),

    #[error("Failed to parse response JSON: {0}")]
    JsonParseError(String),

    #[error("Rate limited (status {status}): retry after {retry_after_ms}ms")]
    RateLimited { status: u16, retry_after_ms: u64 },

    #[error("Authentication failed (status {status}): {message}")]
    AuthError { status: u16, message: String },

    #[error("Server error (status {status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Request cancelled")]
    Cancelled,
}
