//! Rolling latency percentiles

use std::time::Duration;

use rampart_common::collections::RingBuffer;
use serde::{Deserialize, Serialize};

/// Standard percentile set, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    /// 50th percentile (median)
    pub p50: f64,
    /// 95th percentile
    pub p95: f64,
    /// 99th percentile
    pub p99: f64,
    /// 99.9th percentile
    pub p999: f64,
}

impl Percentiles {
    /// Compute the percentile set from unsorted samples.
    ///
    /// Returns `None` for an empty slice.
    #[must_use]
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mut sorted = samples.to_vec();
        sorted.sort_unstable_by(f64::total_cmp);
        Some(Self {
            p50: percentile_of_sorted(&sorted, 0.50),
            p95: percentile_of_sorted(&sorted, 0.95),
            p99: percentile_of_sorted(&sorted, 0.99),
            p999: percentile_of_sorted(&sorted, 0.999),
        })
    }
}

/// Value at quantile `q` of an ascending slice.
///
/// Uses rank `ceil((n - 1) * q)`, so `q = 0.0` is the minimum and `q = 1.0`
/// the maximum. `q` is clamped to `[0, 1]`; the slice must be non-empty.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub(crate) fn percentile_of_sorted(sorted: &[f64], q: f64) -> f64 {
    let last = sorted.len().saturating_sub(1);
    let rank = ((last as f64) * q.clamp(0.0, 1.0)).ceil() as usize;
    sorted.get(rank.min(last)).copied().unwrap_or(0.0)
}

/// Bounded buffer of recent latencies with on-demand percentiles.
///
/// Memory is fixed at construction; the oldest sample is dropped once the
/// buffer is full.
#[derive(Debug, Clone)]
pub struct LatencyPercentileTable {
    samples: RingBuffer<f64>,
}

impl LatencyPercentileTable {
    /// Create a table retaining the last `capacity` samples
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { samples: RingBuffer::new(capacity) }
    }

    /// Record a latency
    pub fn record(&mut self, latency: Duration) {
        self.record_ms(latency.as_secs_f64() * 1000.0);
    }

    /// Record a latency given in milliseconds
    pub fn record_ms(&mut self, latency_ms: f64) {
        if latency_ms.is_finite() && latency_ms >= 0.0 {
            self.samples.push(latency_ms);
        }
    }

    /// Number of retained samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// `true` when nothing has been recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Single percentile in milliseconds, `None` when empty
    #[must_use]
    pub fn percentile(&self, q: f64) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted = self.samples.to_vec();
        sorted.sort_unstable_by(f64::total_cmp);
        Some(percentile_of_sorted(&sorted, q))
    }

    /// P50/P95/P99/P99.9 in milliseconds, `None` when empty
    #[must_use]
    pub fn percentiles(&self) -> Option<Percentiles> {
        Percentiles::from_samples(&self.samples.to_vec())
    }

    /// Drop every sample
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates percentile ranks over a uniform 1..=101 ms series.
    ///
    /// Assertions:
    /// - Confirms P50 is the median and P95/P99 land on the expected ranks.
    /// - Confirms the maximum is reachable with `q = 1.0`.
    #[test]
    fn test_percentile_ranks() {
        let mut table = LatencyPercentileTable::new(200);
        for ms in 1..=101 {
            table.record_ms(f64::from(ms));
        }

        let p = table.percentiles().expect("samples recorded");
        assert!((p.p50 - 51.0).abs() < f64::EPSILON);
        assert!((p.p95 - 96.0).abs() < f64::EPSILON);
        assert!((p.p99 - 100.0).abs() < f64::EPSILON);
        assert_eq!(table.percentile(1.0), Some(101.0));
        assert_eq!(table.percentile(0.0), Some(1.0));
    }

    /// Validates that the table is bounded and forgets old samples.
    ///
    /// Assertions:
    /// - Confirms `len()` never exceeds the capacity.
    /// - Confirms old slow samples no longer affect P95.
    #[test]
    fn test_rolling_window_forgets() {
        let mut table = LatencyPercentileTable::new(10);
        for _ in 0..10 {
            table.record(Duration::from_millis(900));
        }
        for _ in 0..10 {
            table.record(Duration::from_millis(20));
        }

        assert_eq!(table.len(), 10);
        assert_eq!(table.percentile(0.95), Some(20.0));
    }

    /// Validates empty and invalid input handling.
    ///
    /// Assertions:
    /// - Confirms an empty table yields `None`.
    /// - Confirms NaN and negative samples are ignored.
    #[test]
    fn test_empty_and_invalid_samples() {
        let mut table = LatencyPercentileTable::new(4);
        assert!(table.percentiles().is_none());

        table.record_ms(f64::NAN);
        table.record_ms(-3.0);
        assert!(table.is_empty());
    }
}
