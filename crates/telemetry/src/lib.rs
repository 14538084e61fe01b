//! Process-wide metrics over completed exchanges.
//!
//! Many exchanges complete concurrently across independent transcripts;
//! the recorder is the single shared mutable resource between them, so
//! all counters live behind one lock and are only touched in `record`.

pub mod recorder;

pub use recorder::{ExchangeObservation, MetricsRecorder, MetricsSnapshot};
