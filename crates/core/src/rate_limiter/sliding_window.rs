//! Sliding window counter
//!
//! The window is divided into `buckets` equal sub-windows. A call is admitted
//! iff the sum over the live sub-windows plus its cost stays within `limit`.
//! Sub-windows older than the window are dropped as time advances.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rampart_common::time::{SharedClock, SystemClock};
use rampart_common::utils::serde::duration_secs_f64;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{RateLimitAlgorithm, RateLimiter, RateLimiterStats};
use crate::error::{ComponentKind, ConfigError};

/// Configuration for the sliding window counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlidingWindowConfig {
    /// Units admitted per window
    pub limit: u64,
    /// Window length
    #[serde(rename = "window_seconds", with = "duration_secs_f64")]
    pub window: Duration,
    /// Sub-windows per window
    pub buckets: u32,
}

impl Default for SlidingWindowConfig {
    fn default() -> Self {
        Self { limit: 600, window: Duration::from_secs(60), buckets: 60 }
    }
}

impl SlidingWindowConfig {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero limit, window or bucket
    /// count, or sub-windows shorter than a millisecond.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid =
            |message: &str| Err(ConfigError::invalid(ComponentKind::RateLimiter, message));

        if self.limit == 0 {
            return invalid("limit must be greater than 0");
        }
        if self.buckets == 0 {
            return invalid("buckets must be greater than 0");
        }
        if self.window / self.buckets < Duration::from_millis(1) {
            return invalid("window_seconds / buckets must be at least 1ms");
        }
        Ok(())
    }

    fn bucket_width(&self) -> Duration {
        self.window / self.buckets
    }
}

#[derive(Debug)]
struct WindowState {
    counts: VecDeque<(u64, u64)>,
    total: u64,
    allowed: u64,
    rejected: u64,
}

impl WindowState {
    fn evict(&mut self, current: u64, buckets: u32) {
        let oldest_live = current.saturating_sub(u64::from(buckets) - 1);
        while let Some(&(index, count)) = self.counts.front() {
            if index >= oldest_live {
                break;
            }
            self.total -= count;
            self.counts.pop_front();
        }
    }
}

/// Sliding window counter rate limiter
pub struct SlidingWindow {
    name: String,
    config: SlidingWindowConfig,
    origin: Instant,
    clock: SharedClock,
    state: Mutex<WindowState>,
}

impl fmt::Debug for SlidingWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlidingWindow")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("in_window", &self.state.lock().total)
            .finish_non_exhaustive()
    }
}

impl SlidingWindow {
    /// Create an empty window on the system clock
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn new(name: impl Into<String>, config: SlidingWindowConfig) -> Result<Self, ConfigError> {
        Self::with_clock(name, config, SystemClock::shared())
    }

    /// Create an empty window reading time from `clock`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn with_clock(
        name: impl Into<String>,
        config: SlidingWindowConfig,
        clock: SharedClock,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            origin: clock.now(),
            config,
            clock,
            state: Mutex::new(WindowState {
                counts: VecDeque::new(),
                total: 0,
                allowed: 0,
                rejected: 0,
            }),
        })
    }

    /// Units counted in the current window
    #[must_use]
    pub fn current_count(&self) -> u64 {
        let current = self.current_bucket();
        let mut state = self.state.lock();
        state.evict(current, self.config.buckets);
        state.total
    }

    #[allow(clippy::cast_possible_truncation)]
    fn current_bucket(&self) -> u64 {
        let elapsed = self.clock.now().saturating_duration_since(self.origin);
        (elapsed.as_nanos() / self.config.bucket_width().as_nanos().max(1)) as u64
    }
}

impl RateLimiter for SlidingWindow {
    fn allow(&self, cost: u32) -> bool {
        let current = self.current_bucket();
        let cost = u64::from(cost);
        let mut state = self.state.lock();
        state.evict(current, self.config.buckets);

        let admitted = state.total.checked_add(cost).filter(|total| *total <= self.config.limit);
        let Some(new_total) = admitted else {
            state.rejected += 1;
            debug!(
                limiter = %self.name,
                in_window = state.total,
                cost,
                limit = self.config.limit,
                "Rate limit: window full"
            );
            return false;
        };

        match state.counts.back_mut() {
            Some((index, count)) if *index == current => *count += cost,
            _ => state.counts.push_back((current, cost)),
        }
        state.total = new_total;
        state.allowed += 1;
        true
    }

    #[allow(clippy::cast_precision_loss)]
    fn stats(&self) -> RateLimiterStats {
        let current = self.current_bucket();
        let mut state = self.state.lock();
        state.evict(current, self.config.buckets);
        RateLimiterStats {
            name: self.name.clone(),
            algorithm: RateLimitAlgorithm::SlidingWindow,
            allowed: state.allowed,
            rejected: state.rejected,
            available: self.config.limit.saturating_sub(state.total) as f64,
            limit: self.config.limit as f64,
        }
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        state.counts.clear();
        state.total = 0;
        state.allowed = 0;
        state.rejected = 0;
    }

    fn algorithm(&self) -> RateLimitAlgorithm {
        RateLimitAlgorithm::SlidingWindow
    }
}
