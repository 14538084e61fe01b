//! The metrics recorder — a single synchronized counter block with an
//! explicit snapshot operation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// How many recent latency samples the ring buffer keeps.
pub const DEFAULT_LATENCY_SAMPLES: usize = 256;

/// One completed exchange as seen by the recorder.
#[derive(Debug, Clone)]
pub struct ExchangeObservation {
    /// Wall-clock duration of the whole exchange.
    pub duration: Duration,

    /// Tools invoked, in dispatch order (duplicates count separately).
    pub tools_used: Vec<String>,

    /// Whether any tool result was truncated by compaction.
    pub truncated: bool,

    /// Whether the iteration budget forced termination.
    pub hit_limit: bool,

    /// Whether the exchange ended in a hard failure.
    pub error: bool,
}

/// A consistent point-in-time view of the counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_exchanges: u64,
    pub truncation_count: u64,
    pub limit_hit_count: u64,
    pub error_count: u64,

    /// Invocation count per tool name.
    pub tool_invocations: BTreeMap<String, u64>,

    /// Most recent exchange latencies, oldest first.
    pub recent_latency_ms: Vec<u64>,

    /// Mean of the recent latency samples (0 when empty).
    pub avg_latency_ms: u64,

    /// When this snapshot was taken.
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Counters {
    total_exchanges: u64,
    truncation_count: u64,
    limit_hit_count: u64,
    error_count: u64,
    tool_invocations: BTreeMap<String, u64>,
    latencies: VecDeque<u64>,
}

/// Process-wide counters over completed exchanges.
///
/// `record` is the only mutating operation and is safe under concurrent
/// callers; `snapshot` never observes a counter mid-increment. This
/// component never fails the exchange it is observing.
pub struct MetricsRecorder {
    counters: Mutex<Counters>,
    latency_capacity: usize,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::with_latency_capacity(DEFAULT_LATENCY_SAMPLES)
    }

    /// Bound the latency ring buffer to `capacity` samples.
    pub fn with_latency_capacity(capacity: usize) -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            latency_capacity: capacity.max(1),
        }
    }

    /// Fold one completed exchange into the counters.
    pub fn record(&self, observation: &ExchangeObservation) {
        let mut counters = self.counters.lock().unwrap();

        counters.total_exchanges += 1;
        if observation.truncated {
            counters.truncation_count += 1;
        }
        if observation.hit_limit {
            counters.limit_hit_count += 1;
        }
        if observation.error {
            counters.error_count += 1;
        }
        for tool in &observation.tools_used {
            *counters.tool_invocations.entry(tool.clone()).or_insert(0) += 1;
        }

        let ms = observation.duration.as_millis().min(u64::MAX as u128) as u64;
        counters.latencies.push_back(ms);
        while counters.latencies.len() > self.latency_capacity {
            counters.latencies.pop_front();
        }
    }

    /// A consistent point-in-time view of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.counters.lock().unwrap();

        let recent_latency_ms: Vec<u64> = counters.latencies.iter().copied().collect();
        let avg_latency_ms = if recent_latency_ms.is_empty() {
            0
        } else {
            recent_latency_ms.iter().sum::<u64>() / recent_latency_ms.len() as u64
        };

        MetricsSnapshot {
            total_exchanges: counters.total_exchanges,
            truncation_count: counters.truncation_count,
            limit_hit_count: counters.limit_hit_count,
            error_count: counters.error_count,
            tool_invocations: counters.tool_invocations.clone(),
            recent_latency_ms,
            avg_latency_ms,
            taken_at: Utc::now(),
        }
    }

    /// Emit the periodic summary line.
    pub fn log_summary(&self) {
        let s = self.snapshot();
        tracing::info!(
            total_exchanges = s.total_exchanges,
            truncation_count = s.truncation_count,
            limit_hit_count = s.limit_hit_count,
            error_count = s.error_count,
            avg_latency_ms = s.avg_latency_ms,
            "exchange metrics"
        );
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(tools: &[&str]) -> ExchangeObservation {
        ExchangeObservation {
            duration: Duration::from_millis(120),
            tools_used: tools.iter().map(|s| s.to_string()).collect(),
            truncated: false,
            hit_limit: false,
            error: false,
        }
    }

    #[test]
    fn record_updates_counters() {
        let recorder = MetricsRecorder::new();
        recorder.record(&observation(&["log_search", "ticket_lookup", "log_search"]));

        let s = recorder.snapshot();
        assert_eq!(s.total_exchanges, 1);
        assert_eq!(s.tool_invocations["log_search"], 2);
        assert_eq!(s.tool_invocations["ticket_lookup"], 1);
        assert_eq!(s.recent_latency_ms, vec![120]);
        assert_eq!(s.avg_latency_ms, 120);
    }

    #[test]
    fn flags_counted_independently() {
        let recorder = MetricsRecorder::new();
        recorder.record(&ExchangeObservation {
            truncated: true,
            hit_limit: true,
            ..observation(&[])
        });
        recorder.record(&ExchangeObservation {
            error: true,
            ..observation(&[])
        });

        let s = recorder.snapshot();
        assert_eq!(s.total_exchanges, 2);
        assert_eq!(s.truncation_count, 1);
        assert_eq!(s.limit_hit_count, 1);
        assert_eq!(s.error_count, 1);
    }

    #[test]
    fn latency_ring_is_bounded() {
        let recorder = MetricsRecorder::with_latency_capacity(4);
        for i in 0..10u64 {
            recorder.record(&ExchangeObservation {
                duration: Duration::from_millis(i),
                ..observation(&[])
            });
        }

        let s = recorder.snapshot();
        assert_eq!(s.recent_latency_ms, vec![6, 7, 8, 9]);
        assert_eq!(s.total_exchanges, 10);
    }

    #[test]
    fn concurrent_recording_loses_nothing() {
        let recorder = std::sync::Arc::new(MetricsRecorder::new());

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let recorder = std::sync::Arc::clone(&recorder);
                scope.spawn(move || {
                    for _ in 0..100 {
                        recorder.record(&observation(&["log_search"]));
                    }
                });
            }
        });

        let s = recorder.snapshot();
        assert_eq!(s.total_exchanges, 800);
        assert_eq!(s.tool_invocations["log_search"], 800);
    }

    #[test]
    fn snapshot_serializes() {
        let recorder = MetricsRecorder::new();
        recorder.record(&observation(&["pipeline_status"]));
        let j = serde_json::to_string(&recorder.snapshot()).unwrap();
        assert!(j.contains("pipeline_status"));
        assert!(j.contains("total_exchanges"));
    }
}
