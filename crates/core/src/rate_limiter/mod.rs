//! Admission control algorithms
//!
//! Three limiters share the [`RateLimiter`] contract: `allow(cost)` answers
//! immediately and consumes capacity only when it answers `true`.
//!
//! - [`TokenBucket`]: bursts up to `capacity`, refilled at `refill_rate`/s.
//! - [`SlidingWindow`]: at most `limit` units over a window split into
//!   sub-buckets, so a boundary cannot admit two full windows back to back.
//! - [`LeakyBucket`]: a queue draining at `drain_rate`/s; smooth output.
//!
//! [`build_rate_limiter`] turns a [`RateLimiterConfig`] document into any of
//! them.

mod leaky_bucket;
mod sliding_window;
mod token_bucket;

use std::fmt;
use std::sync::Arc;

use rampart_common::impl_label_conversions;
use rampart_common::time::SharedClock;
use serde::{Deserialize, Serialize};

pub use self::leaky_bucket::{LeakyBucket, LeakyBucketConfig};
pub use self::sliding_window::{SlidingWindow, SlidingWindowConfig};
pub use self::token_bucket::{TokenBucket, TokenBucketConfig};
use crate::error::ConfigError;

/// Rate limiting algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
    /// Bursty refill
    TokenBucket,
    /// Sub-bucketed rolling count
    SlidingWindow,
    /// Constant drain
    LeakyBucket,
}

impl_label_conversions!(RateLimitAlgorithm {
    TokenBucket => "token_bucket",
    SlidingWindow => "sliding_window",
    LeakyBucket => "leaky_bucket",
});

/// Non-blocking admission check shared by every algorithm
pub trait RateLimiter: Send + Sync + fmt::Debug {
    /// Admit a call of weight `cost`, consuming capacity only on `true`
    fn allow(&self, cost: u32) -> bool;

    /// Counters and current headroom
    fn stats(&self) -> RateLimiterStats;

    /// Restore full capacity and clear counters
    fn reset(&self);

    /// Algorithm implemented by this limiter
    fn algorithm(&self) -> RateLimitAlgorithm;
}

/// Rate limiter snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimiterStats {
    /// Dependency name
    pub name: String,
    /// Algorithm in use
    pub algorithm: RateLimitAlgorithm,
    /// Admitted calls
    pub allowed: u64,
    /// Refused calls
    pub rejected: u64,
    /// Units that could be admitted right now
    pub available: f64,
    /// Capacity or window limit
    pub limit: f64,
}

impl RateLimiterStats {
    /// Refused calls as a share of all checks (0.0 to 1.0)
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rejection_rate(&self) -> f64 {
        let total = self.allowed + self.rejected;
        if total == 0 {
            0.0
        } else {
            self.rejected as f64 / total as f64
        }
    }
}

/// Config document for any rate limiter, tagged by `algorithm`
///
/// ```toml
/// algorithm = "token_bucket"
/// capacity = 100
/// refill_rate = 20.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum RateLimiterConfig {
    /// [`TokenBucket`] settings
    TokenBucket(TokenBucketConfig),
    /// [`SlidingWindow`] settings
    SlidingWindow(SlidingWindowConfig),
    /// [`LeakyBucket`] settings
    LeakyBucket(LeakyBucketConfig),
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::TokenBucket(TokenBucketConfig::default())
    }
}

impl RateLimiterConfig {
    /// Algorithm this document selects
    #[must_use]
    pub const fn algorithm(&self) -> RateLimitAlgorithm {
        match self {
            Self::TokenBucket(_) => RateLimitAlgorithm::TokenBucket,
            Self::SlidingWindow(_) => RateLimitAlgorithm::SlidingWindow,
            Self::LeakyBucket(_) => RateLimitAlgorithm::LeakyBucket,
        }
    }

    /// Validate the selected algorithm's settings
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] from the algorithm's own validation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::TokenBucket(config) => config.validate(),
            Self::SlidingWindow(config) => config.validate(),
            Self::LeakyBucket(config) => config.validate(),
        }
    }
}

/// Build the limiter described by `config`
///
/// # Errors
///
/// Returns [`ConfigError`] if `config` fails validation.
pub fn build_rate_limiter(
    name: impl Into<String>,
    config: &RateLimiterConfig,
    clock: SharedClock,
) -> Result<Arc<dyn RateLimiter>, ConfigError> {
    let name = name.into();
    let limiter: Arc<dyn RateLimiter> = match config {
        RateLimiterConfig::TokenBucket(config) => {
            Arc::new(TokenBucket::with_clock(name, config.clone(), clock)?)
        }
        RateLimiterConfig::SlidingWindow(config) => {
            Arc::new(SlidingWindow::with_clock(name, config.clone(), clock)?)
        }
        RateLimiterConfig::LeakyBucket(config) => {
            Arc::new(LeakyBucket::with_clock(name, config.clone(), clock)?)
        }
    };
    Ok(limiter)
}

#[cfg(test)]
mod tests {
    use rampart_common::time::MockClock;

    use super::*;

    #[test]
    fn test_config_document_selects_algorithm() {
        let config: RateLimiterConfig = toml::from_str(
            "algorithm = \"sliding_window\"\nlimit = 5\nwindow_seconds = 1.0\nbuckets = 10",
        )
        .expect("valid document");
        assert_eq!(config.algorithm(), RateLimitAlgorithm::SlidingWindow);

        let limiter =
            build_rate_limiter("search", &config, MockClock::new().shared()).expect("valid");
        assert_eq!(limiter.algorithm(), RateLimitAlgorithm::SlidingWindow);
        assert!(limiter.allow(5));
        assert!(!limiter.allow(1));

        let stats = limiter.stats();
        assert_eq!(stats.allowed, 1);
        assert_eq!(stats.rejected, 1);
        assert!((stats.rejection_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = RateLimiterConfig::LeakyBucket(LeakyBucketConfig {
            capacity: 10,
            drain_rate: 0.0,
        });
        assert!(config.validate().is_err());
        assert!(build_rate_limiter("search", &config, MockClock::new().shared()).is_err());
    }

    #[test]
    fn test_algorithm_labels() {
        assert_eq!(RateLimitAlgorithm::LeakyBucket.as_str(), "leaky_bucket");
        assert_eq!("TOKEN_BUCKET".parse(), Ok(RateLimitAlgorithm::TokenBucket));
    }
}
