//! Leaky bucket rate limiter
//!
//! Admitted work joins a virtual queue that drains at `drain_rate` units per
//! second. A call is admitted iff the queue has room for its cost, which
//! smooths bursts into a steady output rate.

use std::fmt;
use std::time::Instant;

use parking_lot::Mutex;
use rampart_common::time::{SharedClock, SystemClock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{RateLimitAlgorithm, RateLimiter, RateLimiterStats};
use crate::error::{ComponentKind, ConfigError};

/// Configuration for leaky bucket rate limiter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeakyBucketConfig {
    /// Queue capacity
    pub capacity: u64,
    /// Units drained per second
    pub drain_rate: f64,
}

impl Default for LeakyBucketConfig {
    fn default() -> Self {
        Self { capacity: 100, drain_rate: 10.0 }
    }
}

impl LeakyBucketConfig {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for zero capacity or a non-positive
    /// drain rate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::invalid(
                ComponentKind::RateLimiter,
                "capacity must be greater than 0",
            ));
        }
        if !(self.drain_rate.is_finite() && self.drain_rate > 0.0) {
            return Err(ConfigError::invalid(
                ComponentKind::RateLimiter,
                "drain_rate must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct QueueState {
    depth: f64,
    last_drain: Instant,
    allowed: u64,
    rejected: u64,
}

/// Leaky bucket rate limiter
pub struct LeakyBucket {
    name: String,
    config: LeakyBucketConfig,
    clock: SharedClock,
    state: Mutex<QueueState>,
}

impl fmt::Debug for LeakyBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeakyBucket")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("depth", &self.state.lock().depth)
            .finish_non_exhaustive()
    }
}

impl LeakyBucket {
    /// Create an empty bucket on the system clock
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn new(name: impl Into<String>, config: LeakyBucketConfig) -> Result<Self, ConfigError> {
        Self::with_clock(name, config, SystemClock::shared())
    }

    /// Create an empty bucket reading time from `clock`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn with_clock(
        name: impl Into<String>,
        config: LeakyBucketConfig,
        clock: SharedClock,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let state = QueueState { depth: 0.0, last_drain: clock.now(), allowed: 0, rejected: 0 };
        Ok(Self { name: name.into(), config, clock, state: Mutex::new(state) })
    }

    /// Current queue depth
    #[must_use]
    pub fn queue_depth(&self) -> f64 {
        let mut state = self.state.lock();
        self.drain(&mut state);
        state.depth
    }

    fn drain(&self, state: &mut QueueState) {
        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(state.last_drain).as_secs_f64();
        state.depth = (state.depth - elapsed * self.config.drain_rate).max(0.0);
        state.last_drain = now;
    }
}

impl RateLimiter for LeakyBucket {
    #[allow(clippy::cast_precision_loss)]
    fn allow(&self, cost: u32) -> bool {
        let mut state = self.state.lock();
        self.drain(&mut state);

        let cost = f64::from(cost);
        if state.depth + cost <= self.config.capacity as f64 {
            state.depth += cost;
            state.allowed += 1;
            true
        } else {
            state.rejected += 1;
            debug!(limiter = %self.name, depth = state.depth, cost, "Rate limit: bucket full");
            false
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn stats(&self) -> RateLimiterStats {
        let mut state = self.state.lock();
        self.drain(&mut state);
        let capacity = self.config.capacity as f64;
        RateLimiterStats {
            name: self.name.clone(),
            algorithm: RateLimitAlgorithm::LeakyBucket,
            allowed: state.allowed,
            rejected: state.rejected,
            available: (capacity - state.depth).max(0.0),
            limit: capacity,
        }
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        state.depth = 0.0;
        state.last_drain = self.clock.now();
        state.allowed = 0;
        state.rejected = 0;
    }

    fn algorithm(&self) -> RateLimitAlgorithm {
        RateLimitAlgorithm::LeakyBucket
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rampart_common::time::MockClock;

    use super::*;

    fn bucket(clock: &MockClock) -> LeakyBucket {
        let config = LeakyBucketConfig { capacity: 4, drain_rate: 2.0 };
        LeakyBucket::with_clock("search", config, clock.shared()).expect("valid config")
    }

    /// Validates admission against queue capacity.
    ///
    /// Assertions:
    /// - Confirms the bucket fills to capacity and then refuses.
    #[test]
    fn test_fills_to_capacity() {
        let clock = MockClock::new();
        let limiter = bucket(&clock);

        for _ in 0..4 {
            assert!(limiter.allow(1));
        }
        assert!(!limiter.allow(1));
        assert_eq!(limiter.stats().rejected, 1);
    }

    /// Validates continuous draining between calls.
    ///
    /// Assertions:
    /// - Confirms half a second at 2/s frees exactly one unit.
    /// - Confirms the depth never goes negative.
    #[test]
    fn test_drains_over_time() {
        let clock = MockClock::new();
        let limiter = bucket(&clock);
        assert!(limiter.allow(4));

        clock.advance(Duration::from_millis(500));
        assert!(limiter.allow(1));
        assert!(!limiter.allow(1));

        clock.advance(Duration::from_secs(60));
        assert!(limiter.queue_depth().abs() < f64::EPSILON);
        assert!(!limiter.allow(5));
        assert!(limiter.allow(4));
    }
}
