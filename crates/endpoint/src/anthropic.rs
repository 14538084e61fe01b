//! Anthropic model endpoint implementation.
//!
//! Uses Anthropic's Messages API directly:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Streaming via SSE with `content_block_delta` events
//!
//! The transcript's wire form already matches the Messages API content
//! block shape, so messages and tool schemas serialize straight into
//! the request body.

use async_trait::async_trait;
use futures::StreamExt;
use opshound_core::error::ModelError;
use opshound_core::model::{
    ModelEndpoint, ModelEvent, ModelReply, ModelRequest, StopReason, Usage,
};
use opshound_core::transcript::ToolRequest;
use serde::Deserialize;
use tracing::{debug, trace, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic native Messages API endpoint.
#[derive(Debug)]
pub struct AnthropicEndpoint {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl AnthropicEndpoint {
    /// Create a new Anthropic endpoint for the given model.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_body(&self, request: &ModelRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": request.messages,
            "max_tokens": request.max_tokens,
        });

        if !request.system.is_empty() {
            body["system"] = serde_json::json!(request.system);
        }
        if !request.tools.is_empty() {
            // ToolSpec is already the API's {name, description, input_schema} shape.
            body["tools"] = serde_json::json!(request.tools);
        }
        if stream {
            body["stream"] = serde_json::json!(true);
        }

        body
    }

    async fn post(
        &self,
        body: serde_json::Value,
        accept_stream: bool,
    ) -> std::result::Result<reqwest::Response, ModelError> {
        let url = format!("{}/v1/messages", self.base_url);
        let mut req = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json");
        if accept_stream {
            req = req.header("Accept", "text/event-stream");
        }

        let response = req
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ModelError::RateLimited {
                retry_after_secs: 5,
            });
        }
        if status == 401 || status == 403 {
            return Err(ModelError::Auth("Invalid Anthropic API key".into()));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(ModelError::Api {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl ModelEndpoint for AnthropicEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        request: ModelRequest,
    ) -> std::result::Result<ModelReply, ModelError> {
        debug!(endpoint = "anthropic", model = %self.model, "Sending completion request");

        let response = self.post(self.request_body(&request, false), false).await?;

        let api_resp: ApiResponse = response.json().await.map_err(|e| {
            ModelError::Malformed(format!("Failed to parse Anthropic response: {e}"))
        })?;

        Ok(reply_from_response(api_resp))
    }

    async fn invoke_stream(
        &self,
        request: ModelRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<ModelEvent, ModelError>>,
        ModelError,
    > {
        debug!(endpoint = "anthropic", model = %self.model, "Sending streaming request");

        let response = self.post(self.request_body(&request, true), true).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut decoder = SseDecoder::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(ModelError::Stream(e.to_string()))).await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end_matches('\r').to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }
                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let data = data.trim();
                    if data.is_empty() {
                        continue;
                    }

                    let event: serde_json::Value = match serde_json::from_str(data) {
                        Ok(v) => v,
                        Err(e) => {
                            trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                            continue;
                        }
                    };

                    for out in decoder.decode(&event) {
                        let done = matches!(out, ModelEvent::TurnEnd { .. });
                        if tx.send(Ok(out)).await.is_err() {
                            return;
                        }
                        if done {
                            return;
                        }
                    }
                }
            }

            // Stream ended without message_stop.
            let _ = tx
                .send(Err(ModelError::Stream(
                    "stream ended before message_stop".into(),
                )))
                .await;
        });

        Ok(rx)
    }
}

/// Translates Anthropic SSE payloads into `ModelEvent`s, accumulating
/// the stop reason and usage that arrive spread over several events.
#[derive(Debug, Default)]
struct SseDecoder {
    stop_reason: Option<StopReason>,
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

impl SseDecoder {
    fn decode(&mut self, event: &serde_json::Value) -> Vec<ModelEvent> {
        match event["type"].as_str().unwrap_or("") {
            "message_start" => {
                if let Some(tokens) = event["message"]["usage"]["input_tokens"].as_u64() {
                    self.input_tokens = Some(tokens as u32);
                }
                vec![]
            }
            "content_block_start" => {
                let block = &event["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    vec![ModelEvent::ToolUseStart {
                        id: block["id"].as_str().unwrap_or("").to_string(),
                        name: block["name"].as_str().unwrap_or("").to_string(),
                    }]
                } else {
                    vec![]
                }
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => delta["text"]
                        .as_str()
                        .map(|t| vec![ModelEvent::TextDelta(t.to_string())])
                        .unwrap_or_default(),
                    "input_json_delta" => delta["partial_json"]
                        .as_str()
                        .map(|j| vec![ModelEvent::ToolInputDelta(j.to_string())])
                        .unwrap_or_default(),
                    _ => vec![],
                }
            }
            "content_block_stop" => vec![ModelEvent::BlockEnd],
            "message_delta" => {
                if event["delta"]["stop_reason"].as_str() == Some("tool_use") {
                    self.stop_reason = Some(StopReason::ToolUse);
                } else if event["delta"]["stop_reason"].is_string() {
                    self.stop_reason = Some(StopReason::EndTurn);
                }
                if let Some(tokens) = event["usage"]["output_tokens"].as_u64() {
                    self.output_tokens = Some(tokens as u32);
                }
                vec![]
            }
            "message_stop" => {
                let usage = match (self.input_tokens, self.output_tokens) {
                    (Some(input_tokens), Some(output_tokens)) => Some(Usage {
                        input_tokens,
                        output_tokens,
                    }),
                    _ => None,
                };
                vec![ModelEvent::TurnEnd {
                    stop_reason: self.stop_reason.unwrap_or(StopReason::EndTurn),
                    usage,
                }]
            }
            _ => vec![],
        }
    }
}

fn reply_from_response(resp: ApiResponse) -> ModelReply {
    let mut text = String::new();
    let mut tool_requests = Vec::new();

    for block in resp.content {
        match block {
            ResponseContentBlock::Text { text: t } => {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&t);
            }
            ResponseContentBlock::ToolUse { id, name, input } => {
                tool_requests.push(ToolRequest { id, name, input });
            }
        }
    }

    let stop_reason = match resp.stop_reason.as_deref() {
        Some("tool_use") => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    };

    let usage = resp.usage.map(|u| Usage {
        input_tokens: u.input_tokens,
        output_tokens: u.output_tokens,
    });

    ModelReply {
        stop_reason,
        text,
        tool_requests,
        usage,
    }
}

// --- Anthropic API types ---

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ResponseContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
}
