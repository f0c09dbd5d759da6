//! Conversation orchestration loop.
//!
//! [`ChatModel`] owns the configuration, tool registry, and event bus for one
//! conversation. `message()` turns a user prompt into a bounded sequence of
//! model-request / tool-execution cycles, emitting lifecycle events as it
//! goes. Tool failures are fed back into the conversation so the model can
//! self-correct; transport failures end the turn.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bus::events::{Event, EventKind};
use crate::bus::queue::{EventBus, EventHandler};
use crate::chat::tools::{base::Tool, registry::ToolRegistry};
use crate::chat::transcript::Transcript;
use crate::config::schema::ChatConfig;
use crate::errors::{ChatError, ProviderError, ToolError};
use crate::providers::base::{
    ChatMessage, ChatRequest, Fragment, ModelClient, ModelResponse, Usage,
};
use crate::utils::helpers::truncate_string;

/// Outcome of a completed `message()` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunSummary {
    /// Token usage accumulated across every request in the turn.
    pub usage: Usage,
    /// Request cycles performed.
    pub iterations: u32,
}

/// A single conversation with a model, with tool dispatch and lifecycle
/// events.
pub struct ChatModel {
    config: ChatConfig,
    registry: Arc<ToolRegistry>,
    bus: EventBus,
    client: Option<Arc<dyn ModelClient>>,
    /// Cancels the in-flight run. Checked at every suspension point and
    /// propagated into the model client.
    cancel: CancellationToken,
    /// Scopes event subscriptions. Separate from `cancel` so observers still
    /// receive the terminal Error/Done events of a cancelled run.
    subscriptions: CancellationToken,
    history: Vec<ChatMessage>,
    transcript_path: Option<PathBuf>,
}

impl ChatModel {
    pub fn new(config: ChatConfig) -> Self {
        Self {
            config,
            registry: Arc::new(ToolRegistry::new()),
            bus: EventBus::new(),
            client: None,
            cancel: CancellationToken::new(),
            subscriptions: CancellationToken::new(),
            history: Vec::new(),
            transcript_path: None,
        }
    }

    /// Attach a model client. Without one, `message()` fails with
    /// [`ChatError::NotConfigured`].
    pub fn with_client(mut self, client: Arc<dyn ModelClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Load prior history from a transcript file and persist every appended
    /// message back to it.
    pub fn with_transcript(mut self, path: PathBuf) -> anyhow::Result<Self> {
        let transcript = Transcript::load(&path)?;
        self.history = transcript.messages;
        self.transcript_path = Some(path);
        Ok(self)
    }

    /// Token that cancels the current run when triggered (ctrl-c wiring).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Register a tool for the model to use. Last registration per name wins.
    pub async fn register_tool(&self, tool: Arc<dyn Tool>) {
        self.registry.register(tool).await;
    }

    /// Subscribe to lifecycle events of one kind, in emission order.
    ///
    /// The subscription lives until the model is dropped.
    pub async fn subscribe(&self, kind: EventKind, handler: EventHandler) {
        self.bus
            .subscribe(kind, self.subscriptions.clone(), handler)
            .await;
    }

    /// The conversation history accumulated so far.
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Run one conversation turn for `prompt`.
    ///
    /// The prompt is expected to be preprocessed already (tags expanded,
    /// attachments rendered). Emits `Start` first and always ends a started
    /// run with `Done` carrying best-available usage, whatever the terminal
    /// condition; only [`ChatError::NotConfigured`] produces no events.
    pub async fn message(&mut self, prompt: &str) -> Result<RunSummary, ChatError> {
        let Some(client) = self.client.clone() else {
            return Err(ChatError::NotConfigured);
        };

        self.bus
            .emit(Event::Start {
                model: self.config.model.clone(),
                tools: self.registry.tool_names().await,
            })
            .await;
        self.append(ChatMessage::user(prompt));

        let mut usage = Usage::default();
        let mut iterations = 0u32;
        let outcome = self.run_loop(&client, &mut usage, &mut iterations).await;

        if let Err(ref e) = outcome {
            // The iteration cap is a safety stop, not a failure; it gets no
            // Error event, just the typed return.
            if !matches!(e, ChatError::IterationLimitExceeded { .. }) {
                self.bus
                    .emit(Event::Error {
                        message: e.to_string(),
                    })
                    .await;
            }
        }
        self.bus.emit(Event::Done { usage }).await;

        outcome.map(|()| RunSummary { usage, iterations })
    }

    /// The request/response/tool cycle. Returns `Ok` on a response with no
    /// tool calls, `Err` on cancellation, transport failure, or the
    /// iteration cap.
    async fn run_loop(
        &mut self,
        client: &Arc<dyn ModelClient>,
        usage: &mut Usage,
        iterations: &mut u32,
    ) -> Result<(), ChatError> {
        loop {
            if *iterations >= self.config.max_iterations {
                return Err(ChatError::IterationLimitExceeded {
                    iterations: *iterations,
                });
            }
            if self.cancel.is_cancelled() {
                return Err(ChatError::Cancelled);
            }
            *iterations += 1;

            let request = self.build_request().await;
            debug!(
                "request {}: {} messages, {} tools",
                iterations,
                request.messages.len(),
                request.tool_defs.len()
            );

            let handle = client.stream(&request, &self.cancel).await;
            let mut handle = match handle {
                Ok(h) => h,
                // A failure after cancellation is the cancellation, whatever
                // error the client chose to return.
                Err(_) if self.cancel.is_cancelled() => return Err(ChatError::Cancelled),
                Err(e) => return Err(classify_transport(e)),
            };

            let response = self.drain_stream(&mut handle.rx).await?;
            usage.accumulate(&response.usage);

            // The assistant turn is appended even when it only carries tool
            // calls, so replayed requests keep the call/result pairing.
            let mut assistant = ChatMessage::assistant(response.content.clone().unwrap_or_default());
            assistant.tool_calls = response.tool_calls.clone();
            self.append(assistant);

            if !response.has_tool_calls() {
                return Ok(());
            }

            for call in &response.tool_calls {
                if self.cancel.is_cancelled() {
                    return Err(ChatError::Cancelled);
                }
                self.bus
                    .emit(Event::ToolCall {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    })
                    .await;

                match self.registry.execute(call).await {
                    Ok(result) => {
                        self.bus
                            .emit(Event::ToolResult {
                                id: call.id.clone(),
                                name: call.name.clone(),
                                result: result.clone(),
                            })
                            .await;
                        self.append(ChatMessage::tool(&call.id, &call.name, result));
                    }
                    Err(e) => {
                        // Recoverable: tell the observers and the model, then
                        // keep going.
                        self.report_tool_failure(call, &e).await;
                    }
                }
            }
        }
    }

    /// Read fragments until the terminal `Done`, emitting Reply/Reasoning
    /// events along the way.
    async fn drain_stream(
        &self,
        rx: &mut tokio::sync::mpsc::UnboundedReceiver<Fragment>,
    ) -> Result<ModelResponse, ChatError> {
        loop {
            let fragment = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ChatError::Cancelled),
                fragment = rx.recv() => fragment,
            };
            match fragment {
                Some(Fragment::TextDelta(text)) => {
                    self.bus.emit(Event::Reply { text }).await;
                }
                Some(Fragment::ReasoningDelta(text)) => {
                    self.bus.emit(Event::Reasoning { text }).await;
                }
                Some(Fragment::Done(response)) => return Ok(response),
                None => {
                    if self.cancel.is_cancelled() {
                        return Err(ChatError::Cancelled);
                    }
                    return Err(ChatError::Transport {
                        source: anyhow::anyhow!("stream ended without a completion"),
                    });
                }
            }
        }
    }

    async fn report_tool_failure(
        &mut self,
        call: &crate::providers::base::ToolCall,
        error: &ToolError,
    ) {
        warn!("tool call {} failed: {}", call.id, error);
        self.bus
            .emit(Event::Error {
                message: error.to_string(),
            })
            .await;
        self.append(ChatMessage::system(format!(
            "Tool call {} failed: {}. Correct the call or answer without it.",
            call.name, error
        )));
    }

    async fn build_request(&self) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            system_prompt: Some(self.config.system_prompt.clone())
                .filter(|s| !s.is_empty()),
            messages: self.history.clone(),
            tool_defs: self.registry.definitions().await,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            user: self.config.user.clone(),
        }
    }

    /// Append to history and persist the transcript when one is configured.
    /// History is append-only; nothing ever removes or reorders entries.
    fn append(&mut self, message: ChatMessage) {
        self.history.push(message);
        if let Some(ref path) = self.transcript_path {
            let title = self
                .history
                .iter()
                .find(|m| m.role == "user")
                .map(|m| truncate_string(&m.content, 64))
                .unwrap_or_default();
            let mut transcript = Transcript {
                title,
                saved_at: None,
                messages: self.history.clone(),
            };
            if let Err(e) = transcript.save(path) {
                warn!("failed to persist transcript to {}: {}", path.display(), e);
            }
        }
    }
}

impl Drop for ChatModel {
    fn drop(&mut self) {
        // Stop subscription dispatch tasks.
        self.subscriptions.cancel();
    }
}

/// Map a model client failure onto the conversation error taxonomy.
fn classify_transport(error: anyhow::Error) -> ChatError {
    if matches!(
        error.downcast_ref::<ProviderError>(),
        Some(ProviderError::Cancelled)
    ) {
        ChatError::Cancelled
    } else {
        ChatError::Transport { source: error }
    }
}
