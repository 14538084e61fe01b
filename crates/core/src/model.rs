//! Model endpoint contract — the abstraction over the LLM service.
//!
//! The endpoint is the collaborator that decides, each turn, between
//! producing a final answer and requesting tools. The orchestration
//! loops call `invoke()` or `invoke_stream()` without knowing which
//! backend is wired in.

use crate::error::ModelError;
use crate::tool::ToolSpec;
use crate::transcript::ToolRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Who a wire-level message is attributed to.
///
/// Tool results travel under the `User` role: from the endpoint's
/// perspective the results of a tool round are supplied by the user
/// side of the conversation, preserving strict role alternation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One content block inside a wire-level message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "is_false")]
        is_error: bool,
    },
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// A message as the endpoint sees it: a role plus content blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model produced a final answer.
    EndTurn,
    /// The model wants one or more tools executed before continuing.
    ToolUse,
}

/// Token usage reported by the endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A request to the model endpoint.
///
/// The tool schema list must be byte-identical across every turn of an
/// exchange; the loops build it once from the catalog and reuse it.
#[derive(Debug, Clone, Serialize)]
pub struct ModelRequest {
    pub system: String,
    pub messages: Vec<WireMessage>,
    pub tools: Vec<ToolSpec>,
    pub max_tokens: u32,
}

/// A complete (non-streaming) model turn.
#[derive(Debug, Clone)]
pub struct ModelReply {
    pub stop_reason: StopReason,

    /// Answer text (or the commentary preceding tool requests).
    pub text: String,

    /// Tool invocations requested in this turn; empty on a final answer.
    /// Correlation ids are unique within the turn.
    pub tool_requests: Vec<ToolRequest>,

    pub usage: Option<Usage>,
}

/// One incremental event in a streaming model turn.
///
/// A streaming endpoint yields these strictly in order; tool input
/// arrives as partial JSON and only becomes a complete request at the
/// closing `BlockEnd`.
#[derive(Debug, Clone)]
pub enum ModelEvent {
    /// Partial answer text.
    TextDelta(String),

    /// A tool-use block opened; its input follows as `ToolInputDelta`s.
    ToolUseStart { id: String, name: String },

    /// Partial JSON for the currently open tool-use block.
    ToolInputDelta(String),

    /// The currently open content block closed.
    BlockEnd,

    /// The model turn finished.
    TurnEnd {
        stop_reason: StopReason,
        usage: Option<Usage>,
    },
}

/// The core model endpoint trait.
///
/// Implementations are expected to be safe to retry at the caller's
/// discretion; the orchestrator itself never retries.
#[async_trait]
pub trait ModelEndpoint: Send + Sync {
    /// A human-readable name for this endpoint (e.g., "anthropic").
    fn name(&self) -> &str;

    /// Send a request and get a complete model turn back.
    async fn invoke(
        &self,
        request: ModelRequest,
    ) -> std::result::Result<ModelReply, ModelError>;

    /// Send a request and get the model turn as an ordered event stream.
    ///
    /// Default implementation calls `invoke()` and replays the reply as
    /// one burst of events, so non-streaming endpoints work with the
    /// streaming loop unchanged.
    async fn invoke_stream(
        &self,
        request: ModelRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<ModelEvent, ModelError>>,
        ModelError,
    > {
        let reply = self.invoke(request).await?;
        // Sized to hold the whole burst: nothing drains until we return.
        let capacity = reply.tool_requests.len() * 3 + 4;
        let (tx, rx) = tokio::sync::mpsc::channel(capacity);

        if !reply.text.is_empty() {
            let _ = tx.send(Ok(ModelEvent::TextDelta(reply.text.clone()))).await;
            let _ = tx.send(Ok(ModelEvent::BlockEnd)).await;
        }
        for req in &reply.tool_requests {
            let _ = tx
                .send(Ok(ModelEvent::ToolUseStart {
                    id: req.id.clone(),
                    name: req.name.clone(),
                }))
                .await;
            let _ = tx
                .send(Ok(ModelEvent::ToolInputDelta(req.input.to_string())))
                .await;
            let _ = tx.send(Ok(ModelEvent::BlockEnd)).await;
        }
        let _ = tx
            .send(Ok(ModelEvent::TurnEnd {
                stop_reason: reply.stop_reason,
                usage: reply.usage,
            }))
            .await;

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_block_serialization() {
        let block = ContentBlock::ToolUse {
            id: "toolu_01".into(),
            name: "log_search".into(),
            input: json!({"query": "timeout"}),
        };
        let j = serde_json::to_string(&block).unwrap();
        assert!(j.contains(r#""type":"tool_use""#));
        assert!(j.contains(r#""name":"log_search""#));
    }

    #[test]
    fn tool_result_block_omits_is_error_when_false() {
        let ok = ContentBlock::ToolResult {
            tool_use_id: "toolu_01".into(),
            content: "{}".into(),
            is_error: false,
        };
        let j = serde_json::to_string(&ok).unwrap();
        assert!(!j.contains("is_error"));

        let failed = ContentBlock::ToolResult {
            tool_use_id: "toolu_01".into(),
            content: "boom".into(),
            is_error: true,
        };
        let j = serde_json::to_string(&failed).unwrap();
        assert!(j.contains(r#""is_error":true"#));
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), r#""user""#);
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            r#""assistant""#
        );
    }

    struct FixedEndpoint {
        reply: ModelReply,
    }

    #[async_trait]
    impl ModelEndpoint for FixedEndpoint {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn invoke(
            &self,
            _request: ModelRequest,
        ) -> std::result::Result<ModelReply, ModelError> {
            Ok(self.reply.clone())
        }
    }

    #[tokio::test]
    async fn default_stream_replays_reply_in_order() {
        let endpoint = FixedEndpoint {
            reply: ModelReply {
                stop_reason: StopReason::ToolUse,
                text: "Let me check the logs.".into(),
                tool_requests: vec![ToolRequest {
                    id: "toolu_01".into(),
                    name: "log_search".into(),
                    input: json!({"query": "500"}),
                }],
                usage: None,
            },
        };

        let request = ModelRequest {
            system: String::new(),
            messages: vec![],
            tools: vec![],
            max_tokens: 1024,
        };
        let mut rx = endpoint.invoke_stream(request).await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event.unwrap());
        }

        assert!(matches!(&events[0], ModelEvent::TextDelta(t) if t.contains("logs")));
        assert!(matches!(events[1], ModelEvent::BlockEnd));
        assert!(
            matches!(&events[2], ModelEvent::ToolUseStart { name, .. } if name == "log_search")
        );
        assert!(matches!(events[3], ModelEvent::ToolInputDelta(_)));
        assert!(matches!(events[4], ModelEvent::BlockEnd));
        assert!(matches!(
            events[5],
            ModelEvent::TurnEnd {
                stop_reason: StopReason::ToolUse,
                ..
            }
        ));
    }
}
