//! Tracing subscriber setup for hosts, demos and tests
//!
//! Library code only emits `tracing` events; installing a subscriber is the
//! host's decision. [`init_tracing`] is the one-call setup used by the demo
//! binary and by tests that want log output:
//!
//! ```rust
//! use rampart_common::observability::{init_tracing, LogFormat, TracingConfig};
//!
//! let config =
//!     TracingConfig::builder().filter("rampart_core=debug").format(LogFormat::Json).build();
//! // A second initialisation in the same process returns an error instead of panicking.
//! let _ = init_tracing(&config);
//! ```

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::error::{CommonError, CommonResult};

/// Output format for the fmt subscriber
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable single-line output
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Subscriber settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// `EnvFilter` directive string, e.g. `info,rampart_core=debug`
    pub filter: String,
    /// Output format
    pub format: LogFormat,
    /// Include the event target (module path) in output
    pub with_target: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self { filter: "info".to_string(), format: LogFormat::Pretty, with_target: true }
    }
}

impl TracingConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> TracingConfigBuilder {
        TracingConfigBuilder::default()
    }

    /// Parse the filter directive without installing anything.
    ///
    /// # Errors
    ///
    /// Returns [`CommonError::Config`] when the directive is malformed.
    pub fn env_filter(&self) -> CommonResult<EnvFilter> {
        EnvFilter::try_new(&self.filter).map_err(|e| {
            CommonError::config(format!("invalid tracing filter '{}': {e}", self.filter))
        })
    }
}

/// Builder for [`TracingConfig`]
#[derive(Debug, Default)]
pub struct TracingConfigBuilder {
    config: TracingConfig,
}

impl TracingConfigBuilder {
    /// Set the filter directive
    #[must_use]
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.config.filter = filter.into();
        self
    }

    /// Set the output format
    #[must_use]
    pub const fn format(mut self, format: LogFormat) -> Self {
        self.config.format = format;
        self
    }

    /// Toggle target output
    #[must_use]
    pub const fn with_target(mut self, enabled: bool) -> Self {
        self.config.with_target = enabled;
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> TracingConfig {
        self.config
    }
}

/// Install a global fmt subscriber.
///
/// # Errors
///
/// Returns [`CommonError::Config`] if the filter is malformed or a global
/// subscriber is already installed.
pub fn init_tracing(config: &TracingConfig) -> CommonResult<()> {
    let filter = config.env_filter()?;
    let builder =
        tracing_subscriber::fmt().with_env_filter(filter).with_target(config.with_target);

    let result = match config.format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    result.map_err(|e| CommonError::config(format!("tracing subscriber already set: {e}")))?;
    tracing::debug!(filter = %config.filter, format = ?config.format, "Tracing initialized");
    Ok(())
}
