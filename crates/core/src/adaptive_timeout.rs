//! Latency-driven timeout recommendations
//!
//! [`AdaptiveTimeout`] keeps a rolling [`LatencyPercentileTable`] per
//! dependency and recommends `percentile(latency) * multiplier`, clamped to
//! `[min_timeout, max_timeout]`. Until `min_samples` latencies have been
//! seen for a dependency it recommends the static `default_timeout`.
//!
//! The value is advisory: callers apply it to their own call-site timeout.

use std::time::Duration;

use dashmap::DashMap;
use rampart_common::utils::serde::duration_millis;
use serde::{Deserialize, Serialize};

use crate::error::{ComponentKind, ConfigError};
use crate::latency::{LatencyPercentileTable, Percentiles};
use crate::stats::CallOutcome;

/// Configuration for adaptive timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveTimeoutConfig {
    /// Quantile the timeout is derived from
    pub percentile: f64,
    /// Factor applied to the quantile
    pub multiplier: f64,
    /// Lower clamp
    #[serde(rename = "min_timeout_ms", with = "duration_millis")]
    pub min_timeout: Duration,
    /// Upper clamp
    #[serde(rename = "max_timeout_ms", with = "duration_millis")]
    pub max_timeout: Duration,
    /// Recommendation while samples are scarce
    #[serde(rename = "default_timeout_ms", with = "duration_millis")]
    pub default_timeout: Duration,
    /// Samples required before the percentile is trusted
    pub min_samples: usize,
    /// Latencies retained per dependency
    pub window_size: usize,
}

impl Default for AdaptiveTimeoutConfig {
    fn default() -> Self {
        Self {
            percentile: 0.95,
            multiplier: 1.5,
            min_timeout: Duration::from_millis(50),
            max_timeout: Duration::from_secs(30),
            default_timeout: Duration::from_secs(5),
            min_samples: 20,
            window_size: 1000,
        }
    }
}

impl AdaptiveTimeoutConfig {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the percentile or multiplier is
    /// out of range, the clamp bounds are inverted, or the window cannot
    /// hold `min_samples`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid =
            |message: &str| Err(ConfigError::invalid(ComponentKind::AdaptiveTimeout, message));

        if !(self.percentile > 0.0 && self.percentile <= 1.0) {
            return invalid("percentile must be within (0, 1]");
        }
        if !(self.multiplier.is_finite() && self.multiplier > 0.0) {
            return invalid("multiplier must be a positive number");
        }
        if self.min_timeout > self.max_timeout {
            return invalid("min_timeout_ms must not exceed max_timeout_ms");
        }
        if self.default_timeout.is_zero() {
            return invalid("default_timeout_ms must be greater than 0");
        }
        if self.min_samples == 0 || self.window_size < self.min_samples {
            return invalid("window_size must be at least min_samples (>= 1)");
        }
        Ok(())
    }
}

/// Adaptive timeout snapshot for one dependency
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdaptiveTimeoutStats {
    /// Dependency name
    pub name: String,
    /// Latencies retained
    pub samples: usize,
    /// Current recommendation
    #[serde(rename = "recommended_timeout_ms", with = "duration_millis")]
    pub recommended_timeout: Duration,
    /// `true` while too few samples exist and the static default applies
    pub using_default: bool,
    /// Latency percentiles, `None` before the first sample
    pub percentiles: Option<Percentiles>,
}

/// Per-dependency latency tables and timeout calculation
#[derive(Debug, Default)]
pub struct AdaptiveTimeout {
    config: AdaptiveTimeoutConfig,
    tables: DashMap<String, LatencyPercentileTable>,
}

impl AdaptiveTimeout {
    /// Create an empty calculator
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn new(config: AdaptiveTimeoutConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, tables: DashMap::new() })
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &AdaptiveTimeoutConfig {
        &self.config
    }

    /// Record one latency sample for `name`
    pub fn record(&self, name: &str, latency: Duration) {
        if let Some(mut table) = self.tables.get_mut(name) {
            table.record(latency);
            return;
        }
        self.tables
            .entry(name.to_owned())
            .or_insert_with(|| LatencyPercentileTable::new(self.config.window_size))
            .record(latency);
    }

    /// Feed a call outcome; failed calls count too, since a slow failure is
    /// still time the caller spent waiting.
    pub fn observe(&self, name: &str, outcome: &CallOutcome) {
        self.record(name, outcome.latency);
    }

    /// Recommended timeout for `name`
    #[must_use]
    pub fn compute_timeout(&self, name: &str) -> Duration {
        let quantile_ms = self.tables.get(name).and_then(|table| {
            if table.len() < self.config.min_samples {
                None
            } else {
                table.percentile(self.config.percentile)
            }
        });

        let Some(quantile_ms) = quantile_ms else {
            return self.config.default_timeout;
        };

        let scaled = millis_to_duration(quantile_ms * self.config.multiplier)
            .unwrap_or(self.config.max_timeout);
        scaled.clamp(self.config.min_timeout, self.config.max_timeout)
    }

    /// Latency percentiles for `name`, `None` before the first sample
    #[must_use]
    pub fn percentiles(&self, name: &str) -> Option<Percentiles> {
        self.tables.get(name).and_then(|table| table.percentiles())
    }

    /// Samples retained for `name`
    #[must_use]
    pub fn sample_count(&self, name: &str) -> usize {
        self.tables.get(name).map_or(0, |table| table.len())
    }

    /// Recommendation and percentiles for `name`
    #[must_use]
    pub fn stats(&self, name: &str) -> AdaptiveTimeoutStats {
        let samples = self.sample_count(name);
        AdaptiveTimeoutStats {
            name: name.to_owned(),
            samples,
            recommended_timeout: self.compute_timeout(name),
            using_default: samples < self.config.min_samples,
            percentiles: self.percentiles(name),
        }
    }

    /// Dependencies with at least one sample
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.tables.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Forget the samples for `name`
    pub fn remove(&self, name: &str) {
        self.tables.remove(name);
    }
}

/// Fractional milliseconds to a whole-nanosecond duration, `None` when the
/// value does not fit.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn millis_to_duration(millis: f64) -> Option<Duration> {
    let nanos = (millis * 1_000_000.0).round();
    if nanos.is_finite() && nanos >= 0.0 && nanos < u64::MAX as f64 {
        Some(Duration::from_nanos(nanos as u64))
    } else {
        None
    }
}
