//! Configuration schema for chatling.
//!
//! The struct uses `#[serde(rename_all = "camelCase")]` so that the JSON
//! config file can use camelCase keys while Rust code uses snake_case fields.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Application name, used in paths, env vars, and the system prompt.
pub const APP_NAME: &str = "chatling";

/// Per-conversation settings.
///
/// Owned by the caller and read-only to the conversation loop; nothing here
/// changes while a turn is running.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConfig {
    /// API credential for the model provider.
    #[serde(default)]
    pub api_key: String,
    /// Chat-completions endpoint base; the provider default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Built-in tools to register, by name.
    #[serde(default = "default_tools")]
    pub tools: Vec<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Hard upper bound on request cycles per turn; a safety valve against
    /// runaway tool-call loops.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// End-user identifier forwarded to the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Glob patterns for files attached to every prompt.
    #[serde(default)]
    pub attachments: Vec<String>,
    /// Transcript file for history persistence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_path: Option<String>,
    /// Shell for the shell tool; `auto` resolves `$SHELL`.
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default = "default_shell_timeout_secs")]
    pub shell_timeout_secs: u64,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_system_prompt() -> String {
    format!(
        "You are '{}', a CLI app. You are an extension of the command line. \
         You behave and respond like a command line tool. Be concise.",
        APP_NAME
    )
}

fn default_tools() -> Vec<String> {
    vec!["shell".to_string(), "repo".to_string()]
}

fn default_temperature() -> f64 {
    1.0
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_max_iterations() -> u32 {
    10
}

fn default_shell() -> String {
    "auto".to_string()
}

fn default_shell_timeout_secs() -> u64 {
    60
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: None,
            model: default_model(),
            system_prompt: default_system_prompt(),
            tools: default_tools(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_iterations: default_max_iterations(),
            user: None,
            attachments: Vec::new(),
            history_path: None,
            shell: default_shell(),
            shell_timeout_secs: default_shell_timeout_secs(),
        }
    }
}

impl ChatConfig {
    /// Reject values the conversation loop refuses to pass through.
    pub fn validate(&self) -> Result<()> {
        if self.model.is_empty() {
            bail!("model must not be empty");
        }
        if self.temperature < 0.0 {
            bail!("temperature must be non-negative, got {}", self.temperature);
        }
        if self.max_tokens == 0 {
            bail!("maxTokens must be at least 1");
        }
        if self.max_iterations == 0 {
            bail!("maxIterations must be at least 1");
        }
        Ok(())
    }
}
