//! Engine configuration documents
//!
//! An [`EngineConfig`] describes a whole registry: the per-dependency stats
//! window, adaptive timeout tuning, and a [`PolicySet`] for every named
//! dependency. Hosts usually keep it in a TOML file:
//!
//! ```toml
//! stats_window = 500
//!
//! [adaptive_timeout]
//! percentile = 0.99
//!
//! [dependencies.payments.circuit_breaker]
//! failure_threshold = 3
//! timeout_seconds = 30.0
//!
//! [dependencies.payments.rate_limiter]
//! algorithm = "token_bucket"
//! capacity = 50
//! refill_rate = 10.0
//! ```
//!
//! Files ending in `.json` are read as JSON instead.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::adaptive_timeout::AdaptiveTimeoutConfig;
use crate::bulkhead::BulkheadConfig;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::ConfigError;
use crate::health::HealthCheckConfig;
use crate::rate_limiter::RateLimiterConfig;
use crate::retry::RetryConfig;

/// Policies applied to one dependency; absent entries are not applied
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySet {
    /// Circuit breaker settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    /// Retry settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    /// Bulkhead settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bulkhead: Option<BulkheadConfig>,
    /// Rate limiter settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limiter: Option<RateLimiterConfig>,
    /// Health checker settings, used when the registry creates a checker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthCheckConfig>,
}

impl PolicySet {
    /// Policy set with nothing configured
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a circuit breaker
    #[must_use]
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    /// Add retries
    #[must_use]
    pub fn with_retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    /// Add a bulkhead
    #[must_use]
    pub fn with_bulkhead(mut self, config: BulkheadConfig) -> Self {
        self.bulkhead = Some(config);
        self
    }

    /// Add a rate limiter
    #[must_use]
    pub fn with_rate_limiter(mut self, config: RateLimiterConfig) -> Self {
        self.rate_limiter = Some(config);
        self
    }

    /// Add health check settings
    #[must_use]
    pub fn with_health(mut self, config: HealthCheckConfig) -> Self {
        self.health = Some(config);
        self
    }

    /// `true` when no guard is configured
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.circuit_breaker.is_none()
            && self.retry.is_none()
            && self.bulkhead.is_none()
            && self.rate_limiter.is_none()
    }

    /// Validate every configured policy
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(config) = &self.circuit_breaker {
            config.validate()?;
        }
        if let Some(config) = &self.retry {
            config.validate()?;
        }
        if let Some(config) = &self.bulkhead {
            config.validate()?;
        }
        if let Some(config) = &self.rate_limiter {
            config.validate()?;
        }
        if let Some(config) = &self.health {
            config.validate()?;
        }
        Ok(())
    }
}

/// Configuration for a whole registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Outcomes retained per dependency for call stats
    pub stats_window: usize,
    /// Adaptive timeout tuning shared by every dependency
    pub adaptive_timeout: AdaptiveTimeoutConfig,
    /// Named dependencies
    pub dependencies: BTreeMap<String, PolicySet>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stats_window: 1000,
            adaptive_timeout: AdaptiveTimeoutConfig::default(),
            dependencies: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] for values that fail validation.
    pub fn from_toml_str(document: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(document).map_err(|err| ConfigError::Parse { message: err.to_string() })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON and
    /// [`ConfigError::Invalid`] for values that fail validation.
    pub fn from_json_str(document: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(document)
            .map_err(|err| ConfigError::Parse { message: err.to_string() })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file, JSON when the extension is `.json` and
    /// TOML otherwise
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise the
    /// parse or validation error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::Io { path: path.to_path_buf(), message: err.to_string() })?;

        let is_json = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        debug!(path = %path.display(), format = if is_json { "json" } else { "toml" }, "Parsing resilience configuration");
        let config =
            if is_json { Self::from_json_str(&document)? } else { Self::from_toml_str(&document)? };

        info!(
            path = %path.display(),
            dependencies = config.dependencies.len(),
            "Loaded resilience configuration"
        );
        Ok(config)
    }

    /// Validate the engine settings and every policy set
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found. Policy errors name the
    /// dependency they came from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stats_window == 0 {
            return Err(ConfigError::Engine {
                message: "stats_window must be greater than 0".to_owned(),
            });
        }
        self.adaptive_timeout.validate()?;
        for (name, policies) in &self.dependencies {
            policies.validate().map_err(|err| match err {
                ConfigError::Invalid { component, message } => {
                    ConfigError::invalid(component, format!("dependency '{name}': {message}"))
                }
                other => other,
            })?;
        }
        Ok(())
    }

    /// Policies for `name`
    #[must_use]
    pub fn policies(&self, name: &str) -> Option<&PolicySet> {
        self.dependencies.get(name)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::rate_limiter::RateLimitAlgorithm;

    const DOCUMENT: &str = r#"
stats_window = 500

[adaptive_timeout]
percentile = 0.99
min_samples = 5

[dependencies.payments.circuit_breaker]
failure_threshold = 3
timeout_seconds = 30.0

[dependencies.payments.retry]
max_retries = 2
base_delay_ms = 50

[dependencies.payments.rate_limiter]
algorithm = "token_bucket"
capacity = 50
refill_rate = 10.0

[dependencies.search.bulkhead]
max_concurrent_calls = 4
max_queue_size = 0
"#;

    /// Validates a full TOML document.
    ///
    /// Assertions:
    /// - Confirms engine settings, per-dependency policies and defaults for
    ///   unset fields.
    #[test]
    fn test_parse_full_document() {
        let config = EngineConfig::from_toml_str(DOCUMENT).expect("valid document");

        assert_eq!(config.stats_window, 500);
        assert!((config.adaptive_timeout.percentile - 0.99).abs() < f64::EPSILON);
        assert!((config.adaptive_timeout.multiplier - 1.5).abs() < f64::EPSILON);

        let payments = config.policies("payments").expect("payments configured");
        let breaker = payments.circuit_breaker.as_ref().expect("breaker configured");
        assert_eq!(breaker.failure_threshold, 3);
        assert_eq!(breaker.timeout, Duration::from_secs(30));
        assert_eq!(breaker.success_threshold, 2);
        assert_eq!(payments.retry.as_ref().map(|r| r.base_delay), Some(Duration::from_millis(50)));
        assert_eq!(
            payments.rate_limiter.as_ref().map(RateLimiterConfig::algorithm),
            Some(RateLimitAlgorithm::TokenBucket)
        );
        assert!(payments.bulkhead.is_none());

        let search = config.policies("search").expect("search configured");
        assert_eq!(search.bulkhead.as_ref().map(|b| b.max_queue_size), Some(0));
    }

    /// Validates error reporting.
    ///
    /// Assertions:
    /// - Confirms malformed TOML is a parse error.
    /// - Confirms an invalid policy names its dependency.
    #[test]
    fn test_errors() {
        assert!(matches!(
            EngineConfig::from_toml_str("stats_window = ["),
            Err(ConfigError::Parse { .. })
        ));

        let err = EngineConfig::from_toml_str(
            "[dependencies.payments.circuit_breaker]\nfailure_threshold = 0",
        )
        .expect_err("zero threshold");
        assert_eq!(
            err.to_string(),
            "invalid circuit_breaker configuration: dependency 'payments': failure_threshold must be greater than 0"
        );
    }

    #[test]
    fn test_zero_stats_window() {
        assert!(matches!(
            EngineConfig::from_toml_str("stats_window = 0"),
            Err(ConfigError::Engine { .. })
        ));
    }

    #[test]
    fn test_json_matches_toml() {
        let toml_config = EngineConfig::from_toml_str(DOCUMENT).expect("valid toml");
        let json = serde_json::to_string(&toml_config).expect("serializable");
        let json_config = EngineConfig::from_json_str(&json).expect("valid json");
        assert_eq!(json_config, toml_config);
    }

    #[test]
    fn test_policy_set_builders() {
        let policies = PolicySet::new().with_retry(RetryConfig::default());
        assert!(!policies.is_empty());
        let health_only = PolicySet::new().with_health(HealthCheckConfig::default());
        assert!(health_only.is_empty());
        assert!(health_only.health.is_some());
        assert!(PolicySet::new().is_empty());
        assert!(policies.validate().is_ok());
    }
}
