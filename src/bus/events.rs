//! Event types for the conversation bus.

use serde::{Deserialize, Serialize};

use crate::providers::base::Usage;

/// Identifies a class of conversation event, independent of payload.
///
/// Subscriptions are keyed by kind; the serialized names double as the
/// wire/log labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Start,
    Reply,
    Reasoning,
    ToolCall,
    ToolResult,
    Error,
    Done,
}

/// A lifecycle event emitted while a conversation turn runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Event {
    /// A turn began. Carries the model and the tool names offered to it.
    Start { model: String, tools: Vec<String> },
    /// Assistant text. A fragment while streaming, the whole reply otherwise.
    Reply { text: String },
    /// Reasoning text surfaced by the provider.
    Reasoning { text: String },
    /// The model requested a tool invocation. `arguments` is raw JSON.
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },
    /// A tool invocation finished successfully.
    ToolResult {
        id: String,
        name: String,
        result: String,
    },
    /// A reported failure. Tool failures leave the turn running; transport
    /// failures end it.
    Error { message: String },
    /// The turn ended. Carries aggregate token usage.
    Done { usage: Usage },
}

impl Event {
    /// The kind used for subscription routing.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Start { .. } => EventKind::Start,
            Event::Reply { .. } => EventKind::Reply,
            Event::Reasoning { .. } => EventKind::Reasoning,
            Event::ToolCall { .. } => EventKind::ToolCall,
            Event::ToolResult { .. } => EventKind::ToolResult,
            Event::Error { .. } => EventKind::Error,
            Event::Done { .. } => EventKind::Done,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_routing() {
        let ev = Event::Reply {
            text: "hi".into(),
        };
        assert_eq!(ev.kind(), EventKind::Reply);

        let ev = Event::ToolCall {
            id: "call_1".into(),
            name: "shell".into(),
            arguments: "{}".into(),
        };
        assert_eq!(ev.kind(), EventKind::ToolCall);
    }

    #[test]
    fn test_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&EventKind::ToolResult).unwrap();
        assert_eq!(json, "\"tool-result\"");
        let json = serde_json::to_string(&EventKind::Start).unwrap();
        assert_eq!(json, "\"start\"");
    }

    #[test]
    fn test_event_serialization_roundtrip() {
        let ev = Event::ToolResult {
            id: "call_9".into(),
            name: "repo".into(),
            result: "{\"path\":\".\"}".into(),
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"event\":\"tool-result\""));
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), EventKind::ToolResult);
    }

    #[test]
    fn test_done_carries_usage() {
        let ev = Event::Done {
            usage: Usage {
                input_tokens: 10,
                output_tokens: 5,
                total_tokens: 15,
            },
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["usage"]["total_tokens"], 15);
    }
}
