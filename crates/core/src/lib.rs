//! # opshound Core
//!
//! Domain types, traits, and error definitions for the opshound
//! diagnostics orchestrator. This crate has **zero framework
//! dependencies** — it defines the domain model that all other crates
//! implement against.
//!
//! ## Design Philosophy
//!
//! The orchestrator only ever talks to the outside world through two
//! traits defined here: [`ModelEndpoint`] (the LLM service) and
//! [`ToolHandler`] (a read-only diagnostic capability). Implementations
//! live in their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod compact;
pub mod error;
pub mod model;
pub mod tool;
pub mod transcript;

// Re-export key types at crate root for ergonomics
pub use compact::{CompactionRule, ResultCompactor, TRUNCATION_MARKER};
pub use error::{Error, ModelError, Result, ToolError, TranscriptError};
pub use model::{
    ContentBlock, ModelEndpoint, ModelEvent, ModelReply, ModelRequest, Role, StopReason, Usage,
    WireMessage,
};
pub use tool::{ToolCatalog, ToolHandler, ToolSpec};
pub use transcript::{ToolOutcome, ToolRequest, Transcript, TranscriptId, Turn};
