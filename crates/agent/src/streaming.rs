//! The streaming orchestration loop.
//!
//! Same contract and state machine as the blocking loop, but each model
//! turn arrives as an ordered event stream. Answer tokens are forwarded
//! to the caller as they arrive; a tool request becomes complete at its
//! block boundary and is dispatched onto a background task immediately,
//! so executing a tool never blocks delivery of text still streaming.
//! The loop only blocks on tool results at the rendezvous before the
//! next model call.

use crate::exchange::{
    ExchangeBudget, ExchangeError, ExchangeOutcome, ExchangeResult, Orchestrator, ERROR_REPLY,
    LIMIT_REPLY,
};
use crate::stream_event::ExchangeEvent;
use opshound_core::error::ModelError;
use opshound_core::model::{ModelEvent, ModelRequest};
use opshound_core::transcript::{ToolOutcome, ToolRequest, Transcript};
use opshound_telemetry::ExchangeObservation;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// A tool-use block still being assembled from input deltas.
struct PendingTool {
    id: String,
    name: String,
    input_json: String,
}

impl PendingTool {
    fn into_request(self) -> ToolRequest {
        let input = if self.input_json.trim().is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            serde_json::from_str(&self.input_json).unwrap_or_default()
        };
        ToolRequest {
            id: self.id,
            name: self.name,
            input,
        }
    }
}

impl Orchestrator {
    /// Run one exchange against the endpoint's event stream, forwarding
    /// progress on `events` as it happens.
    ///
    /// A dropped receiver counts as a client disconnect: forwarding
    /// stops, in-flight tool invocations finish and are discarded, and
    /// the exchange ends in error without another model call.
    pub async fn run_streaming(
        &self,
        message: &str,
        transcript: &mut Transcript,
        events: &mpsc::Sender<ExchangeEvent>,
    ) -> Result<ExchangeOutcome, ExchangeError> {
        info!(
            transcript_id = %transcript.id,
            turns = transcript.len(),
            "Processing streaming exchange"
        );

        let mut budget = ExchangeBudget::new(self.max_iterations);
        let mut tools_used: Vec<String> = Vec::new();
        let mut truncated = false;
        let tool_schemas = self.catalog.describe();
        let mut disconnected = false;

        transcript.append_user_text(message);

        loop {
            if !budget.tick() {
                warn!(
                    transcript_id = %transcript.id,
                    iterations = budget.iterations_used(),
                    "Iteration budget exhausted, forcing fallback reply"
                );
                return Ok(ExchangeOutcome {
                    reply: LIMIT_REPLY.into(),
                    tools_used,
                    truncated,
                    hit_limit: true,
                    iterations_used: budget.iterations_used(),
                });
            }

            debug!(
                transcript_id = %transcript.id,
                iteration = budget.iterations_used(),
                "Streaming exchange iteration"
            );

            let request = ModelRequest {
                system: self.system_prompt.clone(),
                messages: transcript.render_window(self.window_turns),
                tools: tool_schemas.clone(),
                max_tokens: self.max_tokens,
            };

            let mut stream = self
                .endpoint
                .invoke_stream(request)
                .await
                .map_err(|e| ExchangeError::failed(e, &tools_used))?;

            let mut turn_text = String::new();
            let mut pending: Option<PendingTool> = None;
            let mut requests: Vec<ToolRequest> = Vec::new();
            let mut running: Vec<tokio::task::JoinHandle<_>> = Vec::new();
            let mut turn_done = false;

            while let Some(event) = stream.recv().await {
                let event = event.map_err(|e| ExchangeError::failed(e, &tools_used))?;

                match event {
                    ModelEvent::TextDelta(delta) => {
                        turn_text.push_str(&delta);
                        if !disconnected {
                            disconnected = events
                                .send(ExchangeEvent::Token { text: delta })
                                .await
                                .is_err();
                        }
                    }
                    ModelEvent::ToolUseStart { id, name } => {
                        pending = Some(PendingTool {
                            id,
                            name,
                            input_json: String::new(),
                        });
                    }
                    ModelEvent::ToolInputDelta(part) => {
                        if let Some(p) = pending.as_mut() {
                            p.input_json.push_str(&part);
                        }
                    }
                    ModelEvent::BlockEnd => {
                        // A closing text block needs no action; a closing
                        // tool block becomes a complete request and is
                        // dispatched while the stream keeps flowing.
                        let Some(p) = pending.take() else {
                            continue;
                        };
                        let request = p.into_request();
                        tools_used.push(request.name.clone());

                        if !disconnected {
                            disconnected = events
                                .send(ExchangeEvent::ToolStart {
                                    id: request.id.clone(),
                                    name: request.name.clone(),
                                })
                                .await
                                .is_err();
                        }

                        let catalog = Arc::clone(&self.catalog);
                        let (name, input) = (request.name.clone(), request.input.clone());
                        running.push(tokio::spawn(async move {
                            catalog.dispatch(&name, input).await
                        }));

                        if !disconnected {
                            disconnected = events
                                .send(ExchangeEvent::ToolExecuting {
                                    id: request.id.clone(),
                                    name: request.name.clone(),
                                })
                                .await
                                .is_err();
                        }
                        requests.push(request);
                    }
                    ModelEvent::TurnEnd { .. } => {
                        turn_done = true;
                        break;
                    }
                }
            }

            if !turn_done {
                return Err(ExchangeError::failed(
                    ModelError::Stream("model stream ended mid-turn".into()),
                    &tools_used,
                ));
            }

            if !turn_text.is_empty() {
                transcript.append_assistant(&turn_text);
            }

            // Rendezvous: results are needed before the next model call,
            // and only here does the loop block on the background tasks.
            let mut results: Vec<ToolOutcome> = Vec::with_capacity(requests.len());
            for (request, handle) in requests.iter().zip(running) {
                let outcome = match handle.await {
                    Ok(Ok(payload)) => {
                        let (compacted, was_truncated) =
                            self.compactor.compact(&request.name, &payload);
                        truncated |= was_truncated;
                        ToolOutcome::success(&request.id, compacted, was_truncated)
                    }
                    Ok(Err(e)) => {
                        warn!(tool = %request.name, error = %e, "Tool execution failed");
                        ToolOutcome::error(&request.id, e.to_string())
                    }
                    Err(e) => {
                        warn!(tool = %request.name, error = %e, "Tool task failed");
                        ToolOutcome::error(&request.id, "tool task failed")
                    }
                };

                if !disconnected {
                    disconnected = events
                        .send(ExchangeEvent::ToolEnd {
                            id: request.id.clone(),
                            name: request.name.clone(),
                            is_error: outcome.is_error,
                            truncated: outcome.truncated,
                        })
                        .await
                        .is_err();
                }
                results.push(outcome);
            }

            if disconnected {
                // In-flight invocations completed above; their results
                // are discarded and no further model call is made.
                warn!(transcript_id = %transcript.id, "Client disconnected mid-stream");
                return Err(ExchangeError::failed(
                    opshound_core::Error::Disconnected,
                    &tools_used,
                ));
            }

            if requests.is_empty() {
                info!(
                    transcript_id = %transcript.id,
                    iterations = budget.iterations_used(),
                    tools = tools_used.len(),
                    "Streaming exchange complete"
                );
                return Ok(ExchangeOutcome {
                    reply: turn_text,
                    tools_used,
                    truncated,
                    hit_limit: false,
                    iterations_used: budget.iterations_used(),
                });
            }

            transcript
                .append_tool_round(requests, results)
                .map_err(|e| ExchangeError::failed(e, &tools_used))?;
        }
    }

    /// Caller-facing entry point for the streaming realization.
    ///
    /// Drives the exchange to a terminal state, emitting a final `done`
    /// or `error` event, and records it in the metrics either way.
    pub async fn submit_streaming(
        &self,
        message: &str,
        prior_transcript: Option<Transcript>,
        events: mpsc::Sender<ExchangeEvent>,
    ) -> ExchangeResult {
        let mut transcript = prior_transcript.unwrap_or_default();
        let started = Instant::now();

        match self.run_streaming(message, &mut transcript, &events).await {
            Ok(outcome) => {
                let _ = events
                    .send(ExchangeEvent::Done {
                        reply: outcome.reply.clone(),
                        tools_used: outcome.tools_used.clone(),
                        truncated: outcome.truncated,
                        hit_limit: outcome.hit_limit,
                        iterations: outcome.iterations_used,
                    })
                    .await;
                self.metrics.record(&ExchangeObservation {
                    duration: started.elapsed(),
                    tools_used: outcome.tools_used.clone(),
                    truncated: outcome.truncated,
                    hit_limit: outcome.hit_limit,
                    error: false,
                });
                ExchangeResult {
                    reply: outcome.reply,
                    tools_used: outcome.tools_used,
                    truncated: outcome.truncated,
                    hit_limit: outcome.hit_limit,
                    failed: false,
                    transcript,
                }
            }
            Err(failure) => {
                error!(error = %failure, "Streaming exchange failed");
                let _ = events
                    .send(ExchangeEvent::Error {
                        message: ERROR_REPLY.into(),
                        tools_attempted: failure.tools_attempted.clone(),
                    })
                    .await;
                self.metrics.record(&ExchangeObservation {
                    duration: started.elapsed(),
                    tools_used: failure.tools_attempted.clone(),
                    truncated: false,
                    hit_limit: false,
                    error: true,
                });
                ExchangeResult {
                    reply: ERROR_REPLY.into(),
                    tools_used: failure.tools_attempted,
                    truncated: false,
                    hit_limit: false,
                    failed: true,
                    transcript,
                }
            }
        }
    }
}
