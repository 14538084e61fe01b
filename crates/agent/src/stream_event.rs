//! Caller-facing streaming events.
//!
//! `ExchangeEvent` wraps the orchestrator's progress into events a
//! transport can forward to a live client: answer tokens as they
//! arrive, tool lifecycle markers, and a terminal `done` or `error`.

use serde::{Deserialize, Serialize};

/// Events emitted by the streaming orchestration loop, in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExchangeEvent {
    /// Partial answer text from the model.
    Token { text: String },

    /// The model requested a tool invocation.
    ToolStart { id: String, name: String },

    /// The invocation was handed to a background worker.
    ToolExecuting { id: String, name: String },

    /// The invocation finished (successfully or not).
    ToolEnd {
        id: String,
        name: String,
        is_error: bool,
        truncated: bool,
    },

    /// The exchange is complete — final metadata.
    Done {
        reply: String,
        tools_used: Vec<String>,
        truncated: bool,
        hit_limit: bool,
        iterations: u32,
    },

    /// The exchange failed; only a bounded, polite message crosses here.
    Error {
        message: String,
        tools_attempted: Vec<String>,
    },
}

impl ExchangeEvent {
    /// Wire event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Token { .. } => "token",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolExecuting { .. } => "tool_executing",
            Self::ToolEnd { .. } => "tool_end",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_serialization() {
        let event = ExchangeEvent::Token {
            text: "checking".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"token""#));
        assert!(json.contains(r#""text":"checking""#));
    }

    #[test]
    fn tool_end_serialization() {
        let event = ExchangeEvent::ToolEnd {
            id: "toolu_01".into(),
            name: "log_search".into(),
            is_error: false,
            truncated: true,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_end""#));
        assert!(json.contains(r#""truncated":true"#));
    }

    #[test]
    fn event_type_names() {
        assert_eq!(
            ExchangeEvent::Token { text: "x".into() }.event_type(),
            "token"
        );
        assert_eq!(
            ExchangeEvent::ToolStart {
                id: "a".into(),
                name: "b".into()
            }
            .event_type(),
            "tool_start"
        );
        assert_eq!(
            ExchangeEvent::ToolExecuting {
                id: "a".into(),
                name: "b".into()
            }
            .event_type(),
            "tool_executing"
        );
        assert_eq!(
            ExchangeEvent::Done {
                reply: String::new(),
                tools_used: vec![],
                truncated: false,
                hit_limit: false,
                iterations: 0
            }
            .event_type(),
            "done"
        );
        assert_eq!(
            ExchangeEvent::Error {
                message: "x".into(),
                tools_attempted: vec![]
            }
            .event_type(),
            "error"
        );
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"tool_start","id":"toolu_01","name":"ticket_lookup"}"#;
        let event: ExchangeEvent = serde_json::from_str(json).unwrap();
        match event {
            ExchangeEvent::ToolStart { name, .. } => assert_eq!(name, "ticket_lookup"),
            _ => panic!("Wrong variant"),
        }
    }
}
