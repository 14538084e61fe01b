//! Transcript domain types.
//!
//! A transcript is the ordered, append-only record of one conversation
//! with the orchestrator: user text, assistant text, and paired tool
//! rounds. It is owned by exactly one exchange at a time and never
//! shared across concurrent exchanges.

use crate::error::TranscriptError;
use crate::model::{ContentBlock, Role, WireMessage};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Unique identifier for a transcript (conversation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TranscriptId(pub String);

impl TranscriptId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for TranscriptId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TranscriptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single tool invocation requested by the model within one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Correlation id, unique within the turn (assigned by the model).
    pub id: String,

    /// Name of the tool to execute.
    pub name: String,

    /// Arguments as a JSON value.
    pub input: serde_json::Value,
}

/// The result of executing one requested tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// The request id this outcome answers.
    pub request_id: String,

    /// Result payload, or an error descriptor when `is_error` is set.
    pub payload: serde_json::Value,

    /// Whether the handler failed and `payload` describes the failure.
    #[serde(default)]
    pub is_error: bool,

    /// Whether compaction dropped data from the payload.
    #[serde(default)]
    pub truncated: bool,
}

impl ToolOutcome {
    /// A successful outcome carrying the (already compacted) payload.
    pub fn success(
        request_id: impl Into<String>,
        payload: serde_json::Value,
        truncated: bool,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            payload,
            is_error: false,
            truncated,
        }
    }

    /// An error outcome; the reason becomes a payload the model can read.
    pub fn error(request_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            payload: json!({ "error": reason.into() }),
            is_error: true,
            truncated: false,
        }
    }
}

/// One entry in a transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Turn {
    User { text: String },
    Assistant { text: String },
    ToolRequests { requests: Vec<ToolRequest> },
    ToolResults { results: Vec<ToolOutcome> },
}

/// An ordered, append-only sequence of turns.
///
/// Invariant: a `ToolResults` turn immediately follows the
/// `ToolRequests` turn whose ids it fully covers. `append_tool_round`
/// is the only way to add either variant, so the invariant holds by
/// construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub id: TranscriptId,
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self {
            id: TranscriptId::new(),
            turns: Vec::new(),
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn append_user_text(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::User { text: text.into() });
    }

    pub fn append_assistant(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::Assistant { text: text.into() });
    }

    /// Append a paired (requests, results) tool round atomically.
    ///
    /// Fails with `UnpairedToolResult` unless the id sets of `requests`
    /// and `results` are identical — no partial coverage, no unmatched
    /// or duplicated ids. Nothing is appended on failure.
    pub fn append_tool_round(
        &mut self,
        requests: Vec<ToolRequest>,
        results: Vec<ToolOutcome>,
    ) -> std::result::Result<(), TranscriptError> {
        if requests.is_empty() {
            return Err(TranscriptError::EmptyToolRound);
        }

        let requested: BTreeSet<&str> = requests.iter().map(|r| r.id.as_str()).collect();
        let answered: BTreeSet<&str> = results.iter().map(|r| r.request_id.as_str()).collect();

        if requested.len() != requests.len() {
            return Err(TranscriptError::UnpairedToolResult {
                detail: "duplicate request ids within one turn".into(),
            });
        }
        if answered.len() != results.len() {
            return Err(TranscriptError::UnpairedToolResult {
                detail: "duplicate result ids within one round".into(),
            });
        }
        if requested != answered {
            let missing: Vec<&str> = requested.difference(&answered).copied().collect();
            let unmatched: Vec<&str> = answered.difference(&requested).copied().collect();
            return Err(TranscriptError::UnpairedToolResult {
                detail: format!("missing results for {missing:?}, unmatched results {unmatched:?}"),
            });
        }

        self.turns.push(Turn::ToolRequests { requests });
        self.turns.push(Turn::ToolResults { results });
        Ok(())
    }

    /// The most recent `limit` turns; a limit of 0 disables windowing.
    ///
    /// Used to bound context size for long-running sessions. Dropping
    /// older turns only happens at a full-round boundary: if the cut
    /// would orphan a `ToolResults` turn from its requests, the whole
    /// round is dropped instead.
    pub fn window(&self, limit: usize) -> &[Turn] {
        if limit == 0 || limit >= self.turns.len() {
            return &self.turns;
        }
        let mut start = self.turns.len() - limit;
        if matches!(self.turns[start], Turn::ToolResults { .. }) {
            start += 1;
        }
        &self.turns[start..]
    }

    /// Render the full transcript in wire form.
    ///
    /// The wire form alternates strictly between user-attributable and
    /// assistant-attributable messages: a tool round contributes one
    /// assistant message (the tool_use blocks, merged with any
    /// preceding assistant text from the same model turn) immediately
    /// followed by one user message (the tool_result blocks).
    pub fn render(&self) -> Vec<WireMessage> {
        render_turns(&self.turns)
    }

    /// Render only the most recent `limit` turns (see `window`).
    pub fn render_window(&self, limit: usize) -> Vec<WireMessage> {
        render_turns(self.window(limit))
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

fn render_turns(turns: &[Turn]) -> Vec<WireMessage> {
    let mut messages: Vec<WireMessage> = Vec::new();

    for turn in turns {
        let (role, blocks) = match turn {
            Turn::User { text } => (Role::User, vec![ContentBlock::Text { text: text.clone() }]),
            Turn::Assistant { text } => (
                Role::Assistant,
                vec![ContentBlock::Text { text: text.clone() }],
            ),
            Turn::ToolRequests { requests } => (
                Role::Assistant,
                requests
                    .iter()
                    .map(|r| ContentBlock::ToolUse {
                        id: r.id.clone(),
                        name: r.name.clone(),
                        input: r.input.clone(),
                    })
                    .collect(),
            ),
            Turn::ToolResults { results } => (
                Role::User,
                results
                    .iter()
                    .map(|r| ContentBlock::ToolResult {
                        tool_use_id: r.request_id.clone(),
                        content: r.payload.to_string(),
                        is_error: r.is_error,
                    })
                    .collect(),
            ),
        };

        // Adjacent same-role turns (assistant commentary followed by its
        // tool requests) merge into one wire message so role alternation
        // holds at the protocol level.
        match messages.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => messages.push(WireMessage { role, content: blocks }),
        }
    }

    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str, name: &str) -> ToolRequest {
        ToolRequest {
            id: id.into(),
            name: name.into(),
            input: json!({}),
        }
    }

    fn result(id: &str) -> ToolOutcome {
        ToolOutcome::success(id, json!({"ok": true}), false)
    }

    #[test]
    fn append_and_order() {
        let mut t = Transcript::new();
        t.append_user_text("api errors in checkout?");
        t.append_assistant("Looking now.");
        assert_eq!(t.len(), 2);
        assert!(matches!(t.turns()[0], Turn::User { .. }));
    }

    #[test]
    fn tool_round_requires_matching_ids() {
        let mut t = Transcript::new();
        let err = t
            .append_tool_round(vec![request("a", "log_search")], vec![result("b")])
            .unwrap_err();
        assert!(matches!(err, TranscriptError::UnpairedToolResult { .. }));
        // Nothing appended on failure.
        assert!(t.is_empty());
    }

    #[test]
    fn tool_round_rejects_partial_coverage() {
        let mut t = Transcript::new();
        let err = t
            .append_tool_round(
                vec![request("a", "log_search"), request("b", "ticket_lookup")],
                vec![result("a")],
            )
            .unwrap_err();
        let detail = err.to_string();
        assert!(detail.contains("\"b\""), "detail should name the missing id: {detail}");
    }

    #[test]
    fn tool_round_rejects_duplicate_ids() {
        let mut t = Transcript::new();
        let err = t
            .append_tool_round(
                vec![request("a", "log_search"), request("a", "log_search")],
                vec![result("a"), result("a")],
            )
            .unwrap_err();
        assert!(matches!(err, TranscriptError::UnpairedToolResult { .. }));
    }

    #[test]
    fn empty_tool_round_rejected() {
        let mut t = Transcript::new();
        let err = t.append_tool_round(vec![], vec![]).unwrap_err();
        assert!(matches!(err, TranscriptError::EmptyToolRound));
    }

    #[test]
    fn render_alternates_roles() {
        let mut t = Transcript::new();
        t.append_user_text("why is deploy stuck?");
        t.append_assistant("Checking the pipeline.");
        t.append_tool_round(
            vec![request("a", "pipeline_status")],
            vec![result("a")],
        )
        .unwrap();
        t.append_assistant("The deploy is waiting on approval.");

        let wire = t.render();
        let roles: Vec<Role> = wire.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
        );

        // Assistant commentary and its tool requests share one message.
        assert_eq!(wire[1].content.len(), 2);
        assert!(matches!(wire[1].content[0], ContentBlock::Text { .. }));
        assert!(matches!(wire[1].content[1], ContentBlock::ToolUse { .. }));
    }

    #[test]
    fn render_marks_error_results() {
        let mut t = Transcript::new();
        t.append_tool_round(
            vec![request("a", "log_search")],
            vec![ToolOutcome::error("a", "backend unreachable")],
        )
        .unwrap();

        let wire = t.render();
        match &wire[1].content[0] {
            ContentBlock::ToolResult {
                is_error, content, ..
            } => {
                assert!(is_error);
                assert!(content.contains("backend unreachable"));
            }
            other => panic!("expected tool_result, got {other:?}"),
        }
    }

    #[test]
    fn window_never_splits_a_round() {
        let mut t = Transcript::new();
        t.append_user_text("first");
        t.append_tool_round(vec![request("a", "log_search")], vec![result("a")])
            .unwrap();
        t.append_assistant("done");
        // turns: User, ToolRequests, ToolResults, Assistant

        // A window of 2 would start at ToolResults — the round is
        // dropped whole instead.
        let w = t.window(2);
        assert_eq!(w.len(), 1);
        assert!(matches!(w[0], Turn::Assistant { .. }));

        // A window of 3 keeps the full round.
        let w = t.window(3);
        assert_eq!(w.len(), 3);
        assert!(matches!(w[0], Turn::ToolRequests { .. }));
    }

    #[test]
    fn window_larger_than_transcript_returns_all() {
        let mut t = Transcript::new();
        t.append_user_text("hi");
        assert_eq!(t.window(50).len(), 1);
    }

    #[test]
    fn serialization_roundtrip() {
        let mut t = Transcript::new();
        t.append_user_text("errors in checkout");
        t.append_tool_round(vec![request("a", "log_search")], vec![result("a")])
            .unwrap();

        let j = serde_json::to_string(&t).unwrap();
        let back: Transcript = serde_json::from_str(&j).unwrap();
        assert_eq!(back.len(), 3);
        assert_eq!(back.id, t.id);
    }
}
