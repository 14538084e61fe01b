//! The blocking orchestration loop.
//!
//! State machine per exchange:
//!
//! ```text
//! AWAITING_MODEL ──final text──────────────▶ DONE
//! AWAITING_MODEL ──tool requests──▶ EXECUTING ──▶ AWAITING_MODEL
//! AWAITING_MODEL ──budget exhausted────────▶ LIMIT_EXCEEDED
//! any ──unhandled call failure─────────────▶ ERROR
//! ```
//!
//! Tool failures never reach ERROR: they are converted into error
//! payloads the model can reason about, and the exchange continues.

use opshound_core::compact::ResultCompactor;
use opshound_core::model::{ModelEndpoint, ModelRequest, StopReason};
use opshound_core::tool::ToolCatalog;
use opshound_core::transcript::{ToolOutcome, ToolRequest, Transcript};
use opshound_telemetry::{ExchangeObservation, MetricsRecorder};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Default system prompt handed to the model on every turn.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are opshound, a diagnostics assistant for \
    on-call engineers. Use the available read-only tools to investigate before answering. \
    Prefer evidence from tools over speculation, cite what you found, and say so when \
    results were truncated or inconclusive.";

/// Returned when the iteration budget runs out before a final answer.
pub(crate) const LIMIT_REPLY: &str = "I ran out of investigation steps before reaching a \
    conclusion. Try narrowing the question or adding detail (service name, time range, \
    environment).";

/// Returned to the caller when the exchange fails hard.
pub(crate) const ERROR_REPLY: &str =
    "Something went wrong while I was working on this. Please try again in a moment.";

/// The per-exchange iteration budget.
///
/// `iterations_used` is monotonic and never exceeds `max_iterations`;
/// `tick` is the only mutation.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeBudget {
    max_iterations: u32,
    iterations_used: u32,
}

impl ExchangeBudget {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            max_iterations,
            iterations_used: 0,
        }
    }

    /// Claim one iteration. Returns false once the budget is exhausted.
    pub fn tick(&mut self) -> bool {
        if self.iterations_used >= self.max_iterations {
            return false;
        }
        self.iterations_used += 1;
        true
    }

    pub fn iterations_used(&self) -> u32 {
        self.iterations_used
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }
}

/// Loop states; `Done`, `LimitExceeded` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    AwaitingModel,
    Executing,
    Done,
    LimitExceeded,
    Error,
}

/// What one exchange produced.
#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    /// Final answer text, or a canned fallback on `hit_limit`.
    pub reply: String,

    /// Tools invoked, in dispatch order.
    pub tools_used: Vec<String>,

    /// Whether any tool result was truncated by compaction.
    pub truncated: bool,

    /// Whether the iteration budget forced termination.
    pub hit_limit: bool,

    /// Iterations consumed (model-call/tool-execution cycles).
    pub iterations_used: u32,
}

/// A hard exchange failure. Tool attempts made before the failure are
/// kept so the caller can still report them.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct ExchangeError {
    #[source]
    pub source: opshound_core::Error,
    pub tools_attempted: Vec<String>,
}

impl ExchangeError {
    pub(crate) fn failed(
        source: impl Into<opshound_core::Error>,
        tools_attempted: &[String],
    ) -> Self {
        Self {
            source: source.into(),
            tools_attempted: tools_attempted.to_vec(),
        }
    }
}

/// The caller-facing result of `submit`: always a bounded, polite reply,
/// never a raw error string.
#[derive(Debug, Clone)]
pub struct ExchangeResult {
    pub reply: String,
    pub tools_used: Vec<String>,
    pub truncated: bool,
    pub hit_limit: bool,
    pub failed: bool,

    /// The transcript after this exchange, for continuation.
    pub transcript: Transcript,
}

/// The tool-augmented conversation orchestrator.
///
/// Owns no per-exchange state: each call to `run`/`submit` works on its
/// own transcript and budget, so one orchestrator serves any number of
/// concurrent exchanges. The only shared mutable resource is the
/// metrics recorder.
pub struct Orchestrator {
    pub(crate) endpoint: Arc<dyn ModelEndpoint>,
    pub(crate) catalog: Arc<ToolCatalog>,
    pub(crate) compactor: ResultCompactor,
    pub(crate) metrics: Arc<MetricsRecorder>,
    pub(crate) system_prompt: String,
    pub(crate) max_iterations: u32,
    pub(crate) max_tokens: u32,
    pub(crate) window_turns: usize,
}

impl Orchestrator {
    pub fn new(
        endpoint: Arc<dyn ModelEndpoint>,
        catalog: Arc<ToolCatalog>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            endpoint,
            catalog,
            compactor: ResultCompactor::default(),
            metrics,
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            max_iterations: 8,
            max_tokens: 4096,
            window_turns: 40,
        }
    }

    /// Set the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Set the maximum number of model-call/tool-execution cycles.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Set the max tokens per model response.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = max;
        self
    }

    /// Replace the result compactor.
    pub fn with_compactor(mut self, compactor: ResultCompactor) -> Self {
        self.compactor = compactor;
        self
    }

    /// Bound the transcript window sent to the model.
    pub fn with_window_turns(mut self, turns: usize) -> Self {
        self.window_turns = turns;
        self
    }

    /// Apply loop settings from configuration.
    pub fn with_config(mut self, config: &opshound_config::OrchestratorConfig) -> Self {
        self.max_iterations = config.max_iterations;
        self.window_turns = config.window_turns;
        self.compactor = ResultCompactor::new(config.result_byte_budget);
        self
    }

    /// Run one exchange to a terminal state.
    ///
    /// Appends the user message, then iterates: call the model, execute
    /// any requested tools concurrently, compact and append the round,
    /// repeat — until a final answer or the budget runs out.
    pub async fn run(
        &self,
        message: &str,
        transcript: &mut Transcript,
    ) -> Result<ExchangeOutcome, ExchangeError> {
        info!(
            transcript_id = %transcript.id,
            turns = transcript.len(),
            "Processing exchange"
        );

        let mut budget = ExchangeBudget::new(self.max_iterations);
        let mut tools_used: Vec<String> = Vec::new();
        let mut truncated = false;
        // Described once: the catalog schema must be identical across
        // every turn of the exchange.
        let tool_schemas = self.catalog.describe();

        transcript.append_user_text(message);
        let mut state = LoopState::AwaitingModel;

        loop {
            if !budget.tick() {
                state = LoopState::LimitExceeded;
                warn!(
                    transcript_id = %transcript.id,
                    iterations = budget.iterations_used(),
                    state = ?state,
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
                state = ?state,
                "Exchange iteration"
            );

            let request = ModelRequest {
                system: self.system_prompt.clone(),
                messages: transcript.render_window(self.window_turns),
                tools: tool_schemas.clone(),
                max_tokens: self.max_tokens,
            };

            let reply = self
                .endpoint
                .invoke(request)
                .await
                .map_err(|e| ExchangeError::failed(e, &tools_used))?;

            if reply.stop_reason == StopReason::EndTurn || reply.tool_requests.is_empty() {
                state = LoopState::Done;
                transcript.append_assistant(&reply.text);
                info!(
                    transcript_id = %transcript.id,
                    iterations = budget.iterations_used(),
                    tools = tools_used.len(),
                    state = ?state,
                    "Exchange complete"
                );
                return Ok(ExchangeOutcome {
                    reply: reply.text,
                    tools_used,
                    truncated,
                    hit_limit: false,
                    iterations_used: budget.iterations_used(),
                });
            }

            state = LoopState::Executing;
            if !reply.text.is_empty() {
                transcript.append_assistant(&reply.text);
            }

            let requests = reply.tool_requests;
            debug!(state = ?state, requested = requests.len(), "Model requested tools");
            let results = self.execute_round(&requests, &mut tools_used).await;
            truncated |= results.iter().any(|r| r.truncated);

            transcript
                .append_tool_round(requests, results)
                .map_err(|e| ExchangeError::failed(e, &tools_used))?;

            state = LoopState::AwaitingModel;
        }
    }

    /// Execute all tool requests from one model turn concurrently.
    ///
    /// Results come back in request order; a failure in one invocation
    /// neither blocks nor cancels the others.
    pub(crate) async fn execute_round(
        &self,
        requests: &[ToolRequest],
        tools_used: &mut Vec<String>,
    ) -> Vec<ToolOutcome> {
        tools_used.extend(requests.iter().map(|r| r.name.clone()));

        let invocations = requests.iter().map(|request| async move {
            let started = Instant::now();
            let result = self.catalog.dispatch(&request.name, request.input.clone()).await;
            (request, result, started.elapsed())
        });

        futures::future::join_all(invocations)
            .await
            .into_iter()
            .map(|(request, result, elapsed)| match result {
                Ok(payload) => {
                    let (compacted, was_truncated) =
                        self.compactor.compact(&request.name, &payload);
                    debug!(
                        tool = %request.name,
                        duration_ms = elapsed.as_millis() as u64,
                        truncated = was_truncated,
                        "Tool completed"
                    );
                    ToolOutcome::success(&request.id, compacted, was_truncated)
                }
                Err(e) => {
                    warn!(tool = %request.name, error = %e, "Tool execution failed");
                    ToolOutcome::error(&request.id, e.to_string())
                }
            })
            .collect()
    }

    /// Caller-facing entry point for the blocking realization.
    ///
    /// Never surfaces internal error detail: on a hard failure the
    /// caller gets a polite fallback plus the tools attempted, and the
    /// detail goes to the log. Every completed exchange is recorded in
    /// the metrics, whatever its terminal state.
    pub async fn submit(
        &self,
        message: &str,
        prior_transcript: Option<Transcript>,
    ) -> ExchangeResult {
        let mut transcript = prior_transcript.unwrap_or_default();
        let started = Instant::now();

        match self.run(message, &mut transcript).await {
            Ok(outcome) => {
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
                error!(error = %failure, "Exchange failed");
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
