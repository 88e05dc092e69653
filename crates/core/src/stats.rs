//! Bounded call history shared by every guard
//!
//! [`StatsRecorder`] is a plain data structure: it has no lock of its own
//! and is embedded inside the state each component already guards. The
//! window is a fixed-capacity ring buffer, so memory stays bounded no matter
//! how many calls flow through; lifetime totals are kept as plain counters.

use std::time::{Duration, Instant};

use rampart_common::collections::RingBuffer;
use serde::Serialize;

use crate::latency::Percentiles;

/// Result of one invocation of a protected operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOutcome {
    /// Wall time spent in the operation
    pub latency: Duration,
    /// Whether the operation succeeded
    pub succeeded: bool,
    /// When the outcome was recorded
    pub timestamp: Instant,
}

impl CallOutcome {
    /// Successful call
    #[must_use]
    pub const fn success(latency: Duration, timestamp: Instant) -> Self {
        Self { latency, succeeded: true, timestamp }
    }

    /// Failed call
    #[must_use]
    pub const fn failure(latency: Duration, timestamp: Instant) -> Self {
        Self { latency, succeeded: false, timestamp }
    }

    /// Latency in fractional milliseconds
    #[must_use]
    pub fn latency_ms(&self) -> f64 {
        self.latency.as_secs_f64() * 1000.0
    }
}

/// Windowed success/failure counts and latency samples
#[derive(Debug, Clone)]
pub struct StatsRecorder {
    window: RingBuffer<CallOutcome>,
    window_failures: usize,
    total_calls: u64,
    total_failures: u64,
    consecutive_failures: u32,
    consecutive_successes: u32,
}

impl StatsRecorder {
    /// Create a recorder whose window keeps the last `capacity` outcomes
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            window: RingBuffer::new(capacity),
            window_failures: 0,
            total_calls: 0,
            total_failures: 0,
            consecutive_failures: 0,
            consecutive_successes: 0,
        }
    }

    /// Record an outcome, evicting the oldest one when the window is full
    pub fn record(&mut self, outcome: CallOutcome) {
        if let Some(evicted) = self.window.push(outcome) {
            if !evicted.succeeded {
                self.window_failures = self.window_failures.saturating_sub(1);
            }
        }

        self.total_calls += 1;
        if outcome.succeeded {
            self.consecutive_successes = self.consecutive_successes.saturating_add(1);
            self.consecutive_failures = 0;
        } else {
            self.window_failures += 1;
            self.total_failures += 1;
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.consecutive_successes = 0;
        }
    }

    /// Failures currently inside the window
    #[must_use]
    pub const fn failure_count(&self) -> usize {
        self.window_failures
    }

    /// Successes currently inside the window
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.window.len() - self.window_failures
    }

    /// Outcomes currently inside the window
    #[must_use]
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Window capacity
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.window.capacity()
    }

    /// Failures since the last success
    #[must_use]
    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Successes since the last failure
    #[must_use]
    pub const fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    /// Calls recorded since creation
    #[must_use]
    pub const fn total_calls(&self) -> u64 {
        self.total_calls
    }

    /// Failures recorded since creation
    #[must_use]
    pub const fn total_failures(&self) -> u64 {
        self.total_failures
    }

    /// Failure ratio over the window, 0.0 when empty
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            0.0
        } else {
            self.window_failures as f64 / self.window.len() as f64
        }
    }

    /// Outcomes in the window, oldest first
    pub fn outcomes(&self) -> impl Iterator<Item = &CallOutcome> {
        self.window.iter()
    }

    /// Latencies in the window, in milliseconds
    #[must_use]
    pub fn latencies_ms(&self) -> Vec<f64> {
        self.window.iter().map(CallOutcome::latency_ms).collect()
    }

    /// Forget the window and streaks, keeping lifetime totals
    pub fn clear_window(&mut self) {
        self.window.clear();
        self.window_failures = 0;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
    }

    /// Serializable summary of the window and totals
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self) -> StatsSnapshot {
        let latencies = self.latencies_ms();
        let mean_latency_ms = if latencies.is_empty() {
            None
        } else {
            Some(latencies.iter().sum::<f64>() / latencies.len() as f64)
        };

        StatsSnapshot {
            total_calls: self.total_calls,
            total_failures: self.total_failures,
            window_capacity: self.window.capacity(),
            window_calls: self.window.len(),
            window_failures: self.window_failures,
            failure_rate: self.failure_rate(),
            consecutive_failures: self.consecutive_failures,
            mean_latency_ms,
            latency: Percentiles::from_samples(&latencies),
        }
    }
}

/// Point-in-time view of a [`StatsRecorder`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Calls recorded since creation
    pub total_calls: u64,
    /// Failures recorded since creation
    pub total_failures: u64,
    /// Window capacity
    pub window_capacity: usize,
    /// Outcomes currently in the window
    pub window_calls: usize,
    /// Failures currently in the window
    pub window_failures: usize,
    /// `window_failures / window_calls`
    pub failure_rate: f64,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Mean latency over the window
    pub mean_latency_ms: Option<f64>,
    /// Latency percentiles over the window
    pub latency: Option<Percentiles>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(ms: u64, succeeded: bool) -> CallOutcome {
        CallOutcome { latency: Duration::from_millis(ms), succeeded, timestamp: Instant::now() }
    }

    /// Validates window counters stay exact across eviction.
    ///
    /// Assertions:
    /// - Confirms evicted failures leave the window count.
    /// - Confirms lifetime totals keep counting.
    #[test]
    fn test_window_counts_follow_eviction() {
        let mut stats = StatsRecorder::new(3);
        stats.record(outcome(10, false));
        stats.record(outcome(10, false));
        stats.record(outcome(10, true));
        assert_eq!(stats.failure_count(), 2);

        stats.record(outcome(10, true));
        stats.record(outcome(10, true));

        assert_eq!(stats.failure_count(), 0);
        assert_eq!(stats.success_count(), 3);
        assert_eq!(stats.total_calls(), 5);
        assert_eq!(stats.total_failures(), 2);
    }

    /// Validates consecutive streak tracking.
    ///
    /// Assertions:
    /// - Confirms a success resets the failure streak and vice versa.
    #[test]
    fn test_consecutive_streaks() {
        let mut stats = StatsRecorder::new(10);
        stats.record(outcome(1, false));
        stats.record(outcome(1, false));
        assert_eq!(stats.consecutive_failures(), 2);

        stats.record(outcome(1, true));
        assert_eq!(stats.consecutive_failures(), 0);
        assert_eq!(stats.consecutive_successes(), 1);

        stats.clear_window();
        assert_eq!(stats.window_len(), 0);
        assert_eq!(stats.consecutive_successes(), 0);
        assert_eq!(stats.total_calls(), 3);
    }

    /// Validates the serializable snapshot.
    ///
    /// Assertions:
    /// - Confirms failure rate and mean latency over the window.
    /// - Confirms the snapshot serializes to JSON.
    #[test]
    fn test_snapshot() {
        let mut stats = StatsRecorder::new(4);
        stats.record(outcome(10, true));
        stats.record(outcome(30, false));

        let snapshot = stats.snapshot();
        assert!((snapshot.failure_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(snapshot.mean_latency_ms, Some(20.0));
        assert_eq!(snapshot.latency.map(|p| p.p99), Some(30.0));

        let json = serde_json::to_value(&snapshot).expect("serializable");
        assert_eq!(json["window_failures"], 1);
    }
}
