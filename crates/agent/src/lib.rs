//! The opshound orchestration loops.
//!
//! One exchange turns (user message, tool catalog, transcript) into a
//! final answer through a bounded iterate-call-execute-append cycle.
//! Two realizations share the contract: [`Orchestrator::run`] blocks
//! for each model turn, [`Orchestrator::run_streaming`] consumes the
//! turn as incremental events and forwards output while tools execute
//! in the background.

pub mod exchange;
pub mod stream_event;
pub mod streaming;

pub use exchange::{
    ExchangeBudget, ExchangeError, ExchangeOutcome, ExchangeResult, LoopState, Orchestrator,
};
pub use stream_event::ExchangeEvent;
