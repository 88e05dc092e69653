//! Liveness, readiness and deep health checks with hysteresis
//!
//! A [`HealthChecker`] holds up to three [`HealthProbe`]s, one per
//! [`CheckKind`]. Every run updates that kind's consecutive success/failure
//! streaks, but the visible status only flips after `grace_period`
//! consecutive opposite results, so a single noisy probe cannot make the
//! status flap.
//!
//! A kind with no registered probe always passes.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rampart_common::impl_label_conversions;
use rampart_common::time::{SharedClock, SystemClock};
use rampart_common::utils::serde::option_duration_millis;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{BoxError, ComponentKind, ConfigError, ResilienceError};

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    /// Checks are passing
    Healthy,
    /// Alive, but a dependency or the deep probe is failing
    Degraded,
    /// Checks are failing
    Unhealthy,
}

impl_label_conversions!(HealthStatus {
    Healthy => "healthy",
    Degraded => "degraded",
    Unhealthy => "unhealthy",
});

/// The three check kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// The process is responsive
    Liveness,
    /// Dependencies are reachable
    Readiness,
    /// A representative operation succeeds quickly enough
    Deep,
}

impl_label_conversions!(CheckKind {
    Liveness => "liveness",
    Readiness => "readiness",
    Deep => "deep",
});

impl CheckKind {
    const fn index(self) -> usize {
        match self {
            Self::Liveness => 0,
            Self::Readiness => 1,
            Self::Deep => 2,
        }
    }
}

/// A single probe. Return `Err` to report a failed check.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Run the probe once
    async fn check(&self) -> Result<(), BoxError>;
}

/// [`HealthProbe`] backed by an async closure
pub struct FnProbe<F>(F);

impl<F> fmt::Debug for FnProbe<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnProbe")
    }
}

/// Wrap an async closure as a [`HealthProbe`]
///
/// ```rust
/// use rampart_core::health::{probe_fn, HealthChecker};
///
/// let checker = HealthChecker::new("db", Default::default())
///     .unwrap()
///     .with_readiness(probe_fn(|| async { Ok(()) }));
/// # drop(checker);
/// ```
pub fn probe_fn<F, Fut>(probe: F) -> FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    FnProbe(probe)
}

#[async_trait]
impl<F, Fut> HealthProbe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    async fn check(&self) -> Result<(), BoxError> {
        (self.0)().await
    }
}

/// Configuration for health checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Consecutive opposite results required to flip the status
    pub grace_period: u32,
    /// Upper bound on a single probe run
    #[serde(rename = "check_timeout_ms", with = "option_duration_millis")]
    pub check_timeout: Option<Duration>,
    /// Deep probes slower than this count as failures
    #[serde(rename = "max_deep_latency_ms", with = "option_duration_millis")]
    pub max_deep_latency: Option<Duration>,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            grace_period: 3,
            check_timeout: Some(Duration::from_secs(5)),
            max_deep_latency: Some(Duration::from_secs(1)),
        }
    }
}

impl HealthCheckConfig {
    /// Create a configuration builder
    #[must_use]
    pub fn builder() -> HealthCheckConfigBuilder {
        HealthCheckConfigBuilder::default()
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero grace period or zero
    /// timeouts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid =
            |message: &str| Err(ConfigError::invalid(ComponentKind::HealthCheck, message));

        if self.grace_period == 0 {
            return invalid("grace_period must be greater than 0");
        }
        if self.check_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return invalid("check_timeout_ms must be greater than 0");
        }
        if self.max_deep_latency.is_some_and(|latency| latency.is_zero()) {
            return invalid("max_deep_latency_ms must be greater than 0");
        }
        Ok(())
    }
}

/// Builder for [`HealthCheckConfig`]
#[derive(Debug, Default)]
pub struct HealthCheckConfigBuilder {
    config: HealthCheckConfig,
}

impl HealthCheckConfigBuilder {
    /// Set the hysteresis depth
    #[must_use]
    pub const fn grace_period(mut self, results: u32) -> Self {
        self.config.grace_period = results;
        self
    }

    /// Bound each probe run
    #[must_use]
    pub const fn check_timeout(mut self, timeout: Duration) -> Self {
        self.config.check_timeout = Some(timeout);
        self
    }

    /// Slowest acceptable deep probe
    #[must_use]
    pub const fn max_deep_latency(mut self, latency: Duration) -> Self {
        self.config.max_deep_latency = Some(latency);
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid.
    pub fn build(self) -> Result<HealthCheckConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// State of one check kind
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheckResult {
    /// Which check this is
    pub kind: CheckKind,
    /// Status after hysteresis
    pub status: HealthStatus,
    /// Current failure streak
    pub consecutive_failures: u32,
    /// Current success streak
    pub consecutive_successes: u32,
    /// When the check last ran
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Message from the last failed run
    pub last_error: Option<String>,
    /// Duration of the last run
    pub last_latency_ms: Option<f64>,
}

impl HealthCheckResult {
    const fn initial(kind: CheckKind) -> Self {
        Self {
            kind,
            status: HealthStatus::Healthy,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_checked_at: None,
            last_error: None,
            last_latency_ms: None,
        }
    }

    /// `true` while the status is not UNHEALTHY
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status != HealthStatus::Unhealthy
    }
}

/// Aggregated view over all three kinds
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// Checker name
    pub name: String,
    /// UNHEALTHY when liveness fails, DEGRADED when readiness or deep
    /// fails, HEALTHY otherwise
    pub status: HealthStatus,
    /// Liveness state
    pub liveness: HealthCheckResult,
    /// Readiness state
    pub readiness: HealthCheckResult,
    /// Deep check state
    pub deep: HealthCheckResult,
}

/// Runs probes and tracks hysteresis for one dependency
pub struct HealthChecker {
    name: String,
    config: HealthCheckConfig,
    clock: SharedClock,
    probes: [Option<Arc<dyn HealthProbe>>; 3],
    results: Mutex<[HealthCheckResult; 3]>,
}

impl fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthChecker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("liveness_probe", &self.probes[0].is_some())
            .field("readiness_probe", &self.probes[1].is_some())
            .field("deep_probe", &self.probes[2].is_some())
            .finish_non_exhaustive()
    }
}

impl HealthChecker {
    /// Create a checker with no probes on the system clock
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn new(name: impl Into<String>, config: HealthCheckConfig) -> Result<Self, ConfigError> {
        Self::with_clock(name, config, SystemClock::shared())
    }

    /// Create a checker with no probes, timing probe runs with `clock`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn with_clock(
        name: impl Into<String>,
        config: HealthCheckConfig,
        clock: SharedClock,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            config,
            clock,
            probes: [None, None, None],
            results: Mutex::new([
                HealthCheckResult::initial(CheckKind::Liveness),
                HealthCheckResult::initial(CheckKind::Readiness),
                HealthCheckResult::initial(CheckKind::Deep),
            ]),
        })
    }

    /// Register the liveness probe
    #[must_use]
    pub fn with_liveness(self, probe: impl HealthProbe + 'static) -> Self {
        self.with_probe(CheckKind::Liveness, probe)
    }

    /// Register the readiness probe
    #[must_use]
    pub fn with_readiness(self, probe: impl HealthProbe + 'static) -> Self {
        self.with_probe(CheckKind::Readiness, probe)
    }

    /// Register the deep probe
    #[must_use]
    pub fn with_deep(self, probe: impl HealthProbe + 'static) -> Self {
        self.with_probe(CheckKind::Deep, probe)
    }

    /// Register a probe for `kind`, replacing any earlier one
    #[must_use]
    pub fn with_probe(mut self, kind: CheckKind, probe: impl HealthProbe + 'static) -> Self {
        self.probes[kind.index()] = Some(Arc::new(probe));
        self
    }

    /// Checker name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// Run the liveness probe
    pub async fn liveness(&self) -> HealthCheckResult {
        self.run(CheckKind::Liveness).await
    }

    /// Run the readiness probe
    pub async fn readiness(&self) -> HealthCheckResult {
        self.run(CheckKind::Readiness).await
    }

    /// Run the deep probe, failing it when slower than `max_deep_latency`
    pub async fn deep_check(&self) -> HealthCheckResult {
        self.run(CheckKind::Deep).await
    }

    /// Run all three probes concurrently and aggregate
    pub async fn report(&self) -> HealthReport {
        futures::join!(self.liveness(), self.readiness(), self.deep_check());
        self.snapshot()
    }

    /// Aggregate the last results without running any probe
    #[must_use]
    pub fn snapshot(&self) -> HealthReport {
        let [liveness, readiness, deep] = self.results.lock().clone();
        let status = if !liveness.is_healthy() {
            HealthStatus::Unhealthy
        } else if !readiness.is_healthy() || !deep.is_healthy() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        HealthReport { name: self.name.clone(), status, liveness, readiness, deep }
    }

    async fn run(&self, kind: CheckKind) -> HealthCheckResult {
        let started = self.clock.now();
        let mut outcome = match &self.probes[kind.index()] {
            None => Ok(()),
            Some(probe) => self.probe_once(probe.as_ref()).await,
        };
        let latency = self.clock.now().saturating_duration_since(started);

        if kind == CheckKind::Deep && outcome.is_ok() {
            if let Some(limit) = self.config.max_deep_latency {
                if latency > limit {
                    outcome = Err(format!("deep check took {latency:?}, limit is {limit:?}"));
                }
            }
        }

        self.apply(kind, outcome, latency)
    }

    async fn probe_once(&self, probe: &dyn HealthProbe) -> Result<(), String> {
        let Some(limit) = self.config.check_timeout else {
            return probe.check().await.map_err(|err| err.to_string());
        };
        match tokio::time::timeout(limit, probe.check()).await {
            Ok(result) => result.map_err(|err| err.to_string()),
            Err(_) => Err(ResilienceError::<std::convert::Infallible>::Timeout {
                component: ComponentKind::HealthCheck,
                name: self.name.clone(),
                elapsed: limit,
            }
            .to_string()),
        }
    }

    fn apply(
        &self,
        kind: CheckKind,
        outcome: Result<(), String>,
        latency: Duration,
    ) -> HealthCheckResult {
        let grace = self.config.grace_period;
        let mut results = self.results.lock();
        let entry = &mut results[kind.index()];
        entry.last_checked_at = Some(DateTime::<Utc>::from(self.clock.system_time()));
        entry.last_latency_ms = Some(latency.as_secs_f64() * 1000.0);

        let previous = entry.status;
        match outcome {
            Ok(()) => {
                entry.consecutive_successes = entry.consecutive_successes.saturating_add(1);
                entry.consecutive_failures = 0;
                if previous == HealthStatus::Unhealthy && entry.consecutive_successes >= grace {
                    entry.status = HealthStatus::Healthy;
                }
            }
            Err(message) => {
                debug!(checker = %self.name, %kind, error = %message, "Health probe failed");
                entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
                entry.consecutive_successes = 0;
                entry.last_error = Some(message);
                if previous == HealthStatus::Healthy && entry.consecutive_failures >= grace {
                    entry.status = HealthStatus::Unhealthy;
                }
            }
        }

        if entry.status != previous {
            info!(
                checker = %self.name,
                %kind,
                from = %previous,
                to = %entry.status,
                "Health status changed"
            );
        }
        entry.clone()
    }
}
