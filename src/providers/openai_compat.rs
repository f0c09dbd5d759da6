//! OpenAI-compatible API client.
//!
//! Talks to any endpoint that implements the OpenAI chat completions API
//! format: OpenAI itself, OpenRouter, DeepSeek, Groq, vLLM, llama-server,
//! and friends. Failures surface as [`ProviderError`] values inside
//! `anyhow::Error` so the conversation loop can tell auth problems from
//! rate limits from transport faults.

use anyhow::Result;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::base::{ChatRequest, Fragment, ModelClient, ModelResponse, StreamHandle, ToolCall, Usage};
use crate::errors::ProviderError;

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// A model client that talks to an OpenAI-compatible chat completions endpoint.
pub struct OpenAICompatClient {
    api_key: String,
    api_base: String,
    default_model: String,
    client: Client,
}

impl OpenAICompatClient {
    /// Create a new client.
    ///
    /// `api_base` falls back to the OpenAI endpoint; a trailing slash is
    /// tolerated. `default_model` is used when a request names no model.
    pub fn new(api_key: &str, api_base: Option<&str>, default_model: Option<&str>) -> Self {
        let resolved_base = api_base
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/')
            .to_string();

        Self {
            api_key: api_key.to_string(),
            api_base: resolved_base,
            default_model: default_model.unwrap_or(DEFAULT_MODEL).to_string(),
            client: Client::new(),
        }
    }

    /// The resolved chat completions base URL.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn build_body(&self, request: &ChatRequest, stream: bool) -> serde_json::Value {
        let model = if request.model.is_empty() {
            &self.default_model
        } else {
            &request.model
        };

        let mut body = serde_json::json!({
            "model": model,
            "messages": build_wire_messages(request),
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        if !request.tool_defs.is_empty() {
            body["tools"] = serde_json::Value::Array(request.tool_defs.clone());
            body["tool_choice"] = serde_json::json!("auto");
        }
        if let Some(ref user) = request.user {
            body["user"] = serde_json::json!(user);
        }
        if stream {
            body["stream"] = serde_json::json!(true);
            // Ask for a final usage chunk; compat servers that don't know the
            // option ignore it.
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        body
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.api_base);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                warn!("HTTP request to model failed (base={}): {}", self.api_base, e);
                ProviderError::HttpError(e.to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after_ms = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(|secs| secs * 1000)
            .unwrap_or(0);
        let body_text = response.text().await.unwrap_or_default();
        warn!(
            "Model API returned status {} (base={}): {}",
            status, self.api_base, body_text
        );

        let err = match status.as_u16() {
            401 | 403 => ProviderError::AuthError {
                status: status.as_u16(),
                message: body_text,
            },
            429 => ProviderError::RateLimited {
                status: status.as_u16(),
                retry_after_ms,
            },
            500..=599 => ProviderError::ServerError {
                status: status.as_u16(),
                message: body_text,
            },
            _ => ProviderError::HttpError(format!("status {}: {}", status, body_text)),
        };
        Err(err.into())
    }

    async fn request(&self, request: &ChatRequest) -> Result<ModelResponse> {
        let body = self.build_body(request, false);
        let response = self.post(&body).await?;

        let response_text = response
            .text()
            .await
            .map_err(|e| ProviderError::ResponseReadError(e.to_string()))?;
        let data: serde_json::Value = serde_json::from_str(&response_text)
            .map_err(|e| ProviderError::JsonParseError(e.to_string()))?;

        parse_response(&data)
    }
}

#[async_trait]
impl ModelClient for OpenAICompatClient {
    async fn send(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ModelResponse> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProviderError::Cancelled.into()),
            result = self.request(request) => result,
        }
    }

    async fn stream(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<StreamHandle> {
        let body = self.build_body(request, true);
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled.into()),
            result = self.post(&body) => result?,
        };

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        // Parse the SSE stream on its own task. Cancellation drops the parse
        // future, which drops the byte stream and aborts the connection, so
        // nothing keeps reading after the caller gave up.
        let byte_stream = response.bytes_stream();
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = parse_sse_stream(byte_stream, tx) => {}
            }
        });

        Ok(StreamHandle { rx })
    }

    fn get_default_model(&self) -> &str {
        &self.default_model
    }
}

/// Flatten a [`ChatRequest`] into OpenAI wire messages.
///
/// The system prompt becomes the leading `system` message; assistant tool
/// calls take the nested `function` shape the API expects.
fn build_wire_messages(request: &ChatRequest) -> Vec<serde_json::Value> {
    let mut wire = Vec::with_capacity(request.messages.len() + 1);

    if let Some(ref system) = request.system_prompt {
        if !system.is_empty() {
            wire.push(serde_json::json!({ "role": "system", "content": system }));
        }
    }

    for msg in &request.messages {
        let mut obj = serde_json::json!({ "role": msg.role, "content": msg.content });
        if !msg.tool_calls.is_empty() {
            obj["tool_calls"] = serde_json::Value::Array(
                msg.tool_calls.iter().map(|tc| tc.to_wire_json()).collect(),
            );
        }
        if let Some(ref id) = msg.tool_call_id {
            obj["tool_call_id"] = serde_json::json!(id);
        }
        if let Some(ref name) = msg.name {
            obj["name"] = serde_json::json!(name);
        }
        wire.push(obj);
    }

    wire
}

/// Normalise a tool call `arguments` field to a JSON object string.
///
/// Providers usually send a string, but some compat servers inline the
/// object directly.
fn arguments_to_string(raw: &serde_json::Value) -> String {
    if let Some(s) = raw.as_str() {
        s.to_string()
    } else if raw.is_object() {
        raw.to_string()
    } else {
        "{}".to_string()
    }
}

/// Extract token usage from an OpenAI-style `usage` object.
///
/// Accepts both `prompt_tokens`/`completion_tokens` (chat completions) and
/// `input_tokens`/`output_tokens` (responses API) key pairs.
fn parse_usage(value: Option<&serde_json::Value>) -> Usage {
    let Some(obj) = value.and_then(|v| v.as_object()) else {
        return Usage::default();
    };
    let field = |keys: [&str; 2]| {
        keys.iter()
            .find_map(|k| obj.get(*k).and_then(|v| v.as_u64()))
            .unwrap_or(0)
    };

    let input_tokens = field(["prompt_tokens", "input_tokens"]);
    let output_tokens = field(["completion_tokens", "output_tokens"]);
    let total_tokens = obj
        .get("total_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(input_tokens + output_tokens);

    Usage {
        input_tokens,
        output_tokens,
        total_tokens,
    }
}

fn parse_response(data: &serde_json::Value) -> Result<ModelResponse> {
    let choices = data
        .get("choices")
        .and_then(|c| c.as_array())
        .cloned()
        .unwrap_or_default();

    if choices.is_empty() {
        return Err(ProviderError::JsonParseError("no choices in response".to_string()).into());
    }

    let choice = &choices[0];
    let message = choice.get("message").cloned().unwrap_or_default();
    let finish_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .unwrap_or("stop")
        .to_string();

    // Reasoning models report their visible answer in `content` and the
    // chain in `reasoning_content`/`reasoning`. Some put everything in the
    // reasoning field and leave content empty; fall back so the model does
    // not appear silent.
    let reasoning_text = message
        .get("reasoning_content")
        .or_else(|| message.get("reasoning"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let content = match (content, reasoning_text) {
        (Some(c), _) => Some(c),
        (None, Some(reasoning)) => {
            debug!(
                "content empty, using reasoning_content ({} chars) as fallback",
                reasoning.len()
            );
            Some(reasoning.trim().to_string()).filter(|s| !s.is_empty())
        }
        (None, None) => None,
    };

    let mut tool_calls = Vec::new();
    if let Some(tc_array) = message.get("tool_calls").and_then(|v| v.as_array()) {
        for tc in tc_array {
            let id = tc
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();

            let function = tc.get("function").cloned().unwrap_or_default();
            let name = function
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let arguments = function
                .get("arguments")
                .map(arguments_to_string)
                .unwrap_or_else(|| "{}".to_string());

            tool_calls.push(ToolCall {
                id,
                name,
                arguments,
            });
        }
    }

    Ok(ModelResponse {
        content,
        tool_calls,
        finish_reason,
        usage: parse_usage(data.get("usage")),
    })
}

/// Parse an SSE byte stream from an OpenAI-compatible streaming response.
///
/// Emits `TextDelta`/`ReasoningDelta` for each delta and `Done` at the end
/// with the fully assembled response. Tool call argument deltas are
/// accumulated internally and only surface in the final `Done`.
async fn parse_sse_stream(
    byte_stream: impl futures_util::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Unpin,
    tx: tokio::sync::mpsc::UnboundedSender<Fragment>,
) {
    let mut line_buffer = String::new();
    let mut full_content = String::new();
    let mut full_reasoning = String::new();
    let mut finish_reason = String::from("stop");
    let mut usage = Usage::default();

    // Tool call accumulation: index -> (id, name, arguments_json_str)
    let mut tool_calls_acc: std::collections::HashMap<u64, (String, String, String)> =
        std::collections::HashMap::new();

    let assemble = |full_content: &str,
                    full_reasoning: &str,
                    acc: &mut std::collections::HashMap<u64, (String, String, String)>,
                    finish_reason: &str,
                    usage: Usage| {
        let content = if !full_content.is_empty() {
            Some(full_content.to_string())
        } else if !full_reasoning.is_empty() {
            debug!(
                "streaming: content empty, using reasoning ({} chars) as fallback",
                full_reasoning.len()
            );
            Some(full_reasoning.to_string())
        } else {
            None
        };

        let mut indices: Vec<u64> = acc.keys().copied().collect();
        indices.sort();
        let tool_calls = indices
            .into_iter()
            .filter_map(|idx| acc.remove(&idx))
            .map(|(id, name, arguments)| ToolCall {
                id,
                name,
                arguments,
            })
            .collect();

        ModelResponse {
            content,
            tool_calls,
            finish_reason: finish_reason.to_string(),
            usage,
        }
    };

    let mut stream = Box::pin(byte_stream);

    while let Some(result) = stream.next().await {
        let bytes = match result {
            Ok(b) => b,
            Err(e) => {
                warn!("SSE stream error: {}", e);
                break;
            }
        };

        let text = String::from_utf8_lossy(&bytes);
        line_buffer.push_str(&text);

        // Process complete lines
        while let Some(newline_pos) = line_buffer.find('\n') {
            let line = line_buffer[..newline_pos]
                .trim_end_matches('\r')
                .to_string();
            line_buffer = line_buffer[newline_pos + 1..].to_string();

            if line.is_empty() || !line.starts_with("data: ") {
                continue;
            }

            let data = &line[6..];

            if data == "[DONE]" {
                let response = assemble(
                    &full_content,
                    &full_reasoning,
                    &mut tool_calls_acc,
                    &finish_reason,
                    usage,
                );
                let _ = tx.send(Fragment::Done(response));
                return;
            }

            let chunk: serde_json::Value = match serde_json::from_str(data) {
                Ok(v) => v,
                Err(e) => {
                    debug!("SSE parse error (skipping chunk): {}", e);
                    continue;
                }
            };

            if let Some(choices) = chunk.get("choices").and_then(|c| c.as_array()) {
                if let Some(choice) = choices.first() {
                    if let Some(fr) = choice.get("finish_reason").and_then(|v| v.as_str()) {
                        finish_reason = fr.to_string();
                    }

                    if let Some(delta) = choice.get("delta") {
                        if let Some(reasoning) = extract_reasoning_delta(delta) {
                            if !reasoning.is_empty() {
                                full_reasoning.push_str(reasoning);
                                if tx
                                    .send(Fragment::ReasoningDelta(reasoning.to_string()))
                                    .is_err()
                                {
                                    return;
                                }
                            }
                        }

                        if let Some(content) = delta.get("content").and_then(|v| v.as_str()) {
                            if !content.is_empty() {
                                full_content.push_str(content);
                                if tx.send(Fragment::TextDelta(content.to_string())).is_err() {
                                    return;
                                }
                            }
                        }

                        if let Some(tc_array) = delta.get("tool_calls").and_then(|v| v.as_array()) {
                            for tc in tc_array {
                                let index = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
                                let entry = tool_calls_acc.entry(index).or_insert_with(|| {
                                    (String::new(), String::new(), String::new())
                                });

                                if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
                                    entry.0 = id.to_string();
                                }
                                if let Some(function) = tc.get("function") {
                                    if let Some(name) =
                                        function.get("name").and_then(|v| v.as_str())
                                    {
                                        entry.1 = name.to_string();
                                    }
                                    if let Some(args) =
                                        function.get("arguments").and_then(|v| v.as_str())
                                    {
                                        entry.2.push_str(args);
                                    }
                                }
                            }
                        }
                    }
                }
            }

            // Usage arrives in a trailing chunk when include_usage is honoured.
            if chunk.get("usage").map_or(false, |v| v.is_object()) {
                usage = parse_usage(chunk.get("usage"));
            }
        }
    }

    // Stream ended without [DONE]; assemble from what arrived.
    let response = assemble(
        &full_content,
        &full_reasoning,
        &mut tool_calls_acc,
        &finish_reason,
        usage,
    );
    let _ = tx.send(Fragment::Done(response));
}

/// Pull a reasoning delta out of an SSE `delta` object, wherever the
/// provider put it.
fn extract_reasoning_delta(delta: &serde_json::Value) -> Option<&str> {
    delta
        .get("reasoning_content")
        .or_else(|| delta.get("reasoning"))
        .and_then(|v| v.as_str())
}
