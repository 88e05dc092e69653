//! Token bucket rate limiter
//!
//! Tokens accrue continuously at `refill_rate` per second up to `capacity`.
//! A call of weight `cost` is admitted iff at least `cost` tokens are
//! available, and then consumes them.

use std::fmt;
use std::time::Instant;

use parking_lot::Mutex;
use rampart_common::time::{SharedClock, SystemClock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{RateLimitAlgorithm, RateLimiter, RateLimiterStats};
use crate::error::{ComponentKind, ConfigError};

/// Configuration for token bucket rate limiter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenBucketConfig {
    /// Maximum tokens, and so the largest burst
    pub capacity: u64,
    /// Tokens added per second
    pub refill_rate: f64,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self { capacity: 100, refill_rate: 10.0 }
    }
}

impl TokenBucketConfig {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for zero capacity or a non-positive
    /// refill rate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::invalid(
                ComponentKind::RateLimiter,
                "capacity must be greater than 0",
            ));
        }
        if !(self.refill_rate.is_finite() && self.refill_rate > 0.0) {
            return Err(ConfigError::invalid(
                ComponentKind::RateLimiter,
                "refill_rate must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    allowed: u64,
    rejected: u64,
}

/// Token bucket rate limiter
///
/// ```rust
/// use rampart_core::rate_limiter::{RateLimiter, TokenBucket, TokenBucketConfig};
///
/// let limiter =
///     TokenBucket::new("search", TokenBucketConfig { capacity: 10, refill_rate: 5.0 }).unwrap();
/// assert!(limiter.allow(3));
/// ```
pub struct TokenBucket {
    name: String,
    config: TokenBucketConfig,
    clock: SharedClock,
    state: Mutex<BucketState>,
}

impl fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBucket")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("tokens", &self.state.lock().tokens)
            .finish_non_exhaustive()
    }
}

impl TokenBucket {
    /// Create a full bucket on the system clock
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn new(name: impl Into<String>, config: TokenBucketConfig) -> Result<Self, ConfigError> {
        Self::with_clock(name, config, SystemClock::shared())
    }

    /// Create a full bucket reading time from `clock`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    #[allow(clippy::cast_precision_loss)]
    pub fn with_clock(
        name: impl Into<String>,
        config: TokenBucketConfig,
        clock: SharedClock,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let state = BucketState {
            tokens: config.capacity as f64,
            last_refill: clock.now(),
            allowed: 0,
            rejected: 0,
        };
        Ok(Self { name: name.into(), config, clock, state: Mutex::new(state) })
    }

    /// Tokens available right now
    #[must_use]
    pub fn available_tokens(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }

    #[allow(clippy::cast_precision_loss)]
    fn refill(&self, state: &mut BucketState) {
        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens =
            (state.tokens + elapsed * self.config.refill_rate).min(self.config.capacity as f64);
        state.last_refill = now;
    }
}

impl RateLimiter for TokenBucket {
    fn allow(&self, cost: u32) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);

        let cost = f64::from(cost);
        if state.tokens >= cost {
            state.tokens -= cost;
            state.allowed += 1;
            true
        } else {
            state.rejected += 1;
            debug!(limiter = %self.name, tokens = state.tokens, cost, "Rate limit: insufficient tokens");
            false
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn stats(&self) -> RateLimiterStats {
        let mut state = self.state.lock();
        self.refill(&mut state);
        RateLimiterStats {
            name: self.name.clone(),
            algorithm: RateLimitAlgorithm::TokenBucket,
            allowed: state.allowed,
            rejected: state.rejected,
            available: state.tokens,
            limit: self.config.capacity as f64,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn reset(&self) {
        let mut state = self.state.lock();
        state.tokens = self.config.capacity as f64;
        state.last_refill = self.clock.now();
        state.allowed = 0;
        state.rejected = 0;
    }

    fn algorithm(&self) -> RateLimitAlgorithm {
        RateLimitAlgorithm::TokenBucket
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rampart_common::time::MockClock;

    use super::*;

    fn bucket(clock: &MockClock, capacity: u64, refill_rate: f64) -> TokenBucket {
        TokenBucket::with_clock("search", TokenBucketConfig { capacity, refill_rate }, clock.shared())
            .expect("valid config")
    }

    /// Validates burst, exhaustion and refill.
    ///
    /// Assertions:
    /// - Confirms a full burst of `capacity` is admitted.
    /// - Confirms the next call is refused until one token has refilled.
    #[test]
    fn test_burst_then_refill() {
        let clock = MockClock::new();
        let limiter = bucket(&clock, 10, 1.0);

        assert!(limiter.allow(10));
        assert!(!limiter.allow(1));

        clock.advance(Duration::from_secs(1));
        assert!(limiter.allow(1));
        assert!(!limiter.allow(1));
    }

    /// Validates that tokens saturate at capacity.
    ///
    /// Assertions:
    /// - Confirms tokens equal capacity after `capacity / refill_rate` seconds.
    /// - Confirms a much longer idle period does not overflow.
    #[test]
    fn test_tokens_saturate_at_capacity() {
        let clock = MockClock::new();
        let limiter = bucket(&clock, 20, 4.0);
        assert!(limiter.allow(20));

        clock.advance(Duration::from_secs(5));
        assert!((limiter.available_tokens() - 20.0).abs() < f64::EPSILON);

        clock.advance(Duration::from_secs(3600));
        assert!((limiter.available_tokens() - 20.0).abs() < f64::EPSILON);
        assert!(!limiter.allow(21));
    }

    #[test]
    fn test_reset_and_validation() {
        let clock = MockClock::new();
        let limiter = bucket(&clock, 5, 1.0);
        assert!(limiter.allow(5));
        limiter.reset();
        assert_eq!(limiter.stats().allowed, 0);
        assert!(limiter.allow(5));

        assert!(TokenBucketConfig { capacity: 0, refill_rate: 1.0 }.validate().is_err());
        assert!(TokenBucketConfig { capacity: 1, refill_rate: -1.0 }.validate().is_err());
    }
}
