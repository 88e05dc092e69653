//! Budgeted retries with idempotent result caching
//!
//! [`RetryManager::execute_with_retry`] re-invokes an operation while its
//! error classifies as retryable, sleeping a jittered exponential backoff in
//! between. Every retry must be granted by the manager's [`RetryBudget`];
//! when the rolling retried/total ratio would exceed the configured percent
//! the call fails with [`ResilienceError::RetryBudgetExceeded`] instead.
//!
//! With an idempotency key, the first successful result is cached for
//! `idempotency_ttl_seconds` and returned to later calls with the same key
//! without invoking the operation again.
//!
//! A `retry_after` hint carried by the error replaces the computed backoff
//! for that retry. The `max_total_time` deadline is measured on the
//! manager's [`Clock`](rampart_common::time::Clock) while backoff waits run
//! on the tokio timer, so tests drive the deadline with a mock clock and the
//! waits with paused tokio time.

mod backoff;
mod budget;

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::TryFutureExt;
use rampart_common::cache::Cache;
use rampart_common::error::ErrorClassification;
use rampart_common::time::{SharedClock, SystemClock};
use rampart_common::utils::serde::{duration_millis, duration_secs_f64, option_duration_millis};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use self::backoff::Backoff;
pub use self::budget::{RetryBudget, RetryBudgetStats};
use crate::error::{ComponentKind, ConfigError, ResilienceError};

type CachedValue = Arc<dyn Any + Send + Sync>;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    #[serde(rename = "base_delay_ms", with = "duration_millis")]
    pub base_delay: Duration,
    /// Cap on the un-jittered delay
    #[serde(rename = "max_delay_ms", with = "duration_millis")]
    pub max_delay: Duration,
    /// Uniform jitter applied to each delay; 0.5 means ±50%
    pub jitter_fraction: f64,
    /// Ceiling on retries as a percentage of all attempts in the window
    pub retry_budget_percent: f64,
    /// Span of the rolling budget window
    #[serde(rename = "budget_window_seconds", with = "duration_secs_f64")]
    pub budget_window: Duration,
    /// How long a successful result stays cached under its idempotency key
    #[serde(rename = "idempotency_ttl_seconds", with = "duration_secs_f64")]
    pub idempotency_ttl: Duration,
    /// Deadline for the whole call including backoff sleeps, read from the
    /// manager's clock
    #[serde(rename = "max_total_time_ms", with = "option_duration_millis")]
    pub max_total_time: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter_fraction: 0.5,
            retry_budget_percent: 10.0,
            budget_window: Duration::from_secs(10),
            idempotency_ttl: Duration::from_secs(300),
            max_total_time: None,
        }
    }
}

impl RetryConfig {
    /// Create a configuration builder
    #[must_use]
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::default()
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for out-of-range fractions or
    /// percentages, a base delay above the cap, or zero-length windows.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| Err(ConfigError::invalid(ComponentKind::Retry, message));

        if self.base_delay > self.max_delay {
            return invalid("base_delay_ms must not exceed max_delay_ms");
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return invalid("jitter_fraction must be within [0, 1]");
        }
        if !(0.0..=100.0).contains(&self.retry_budget_percent) {
            return invalid("retry_budget_percent must be within [0, 100]");
        }
        if self.budget_window.is_zero() {
            return invalid("budget_window_seconds must be greater than 0");
        }
        if self.idempotency_ttl.is_zero() {
            return invalid("idempotency_ttl_seconds must be greater than 0");
        }
        if self.max_total_time.is_some_and(|limit| limit.is_zero()) {
            return invalid("max_total_time_ms must be greater than 0 when set");
        }
        Ok(())
    }
}

/// Builder for [`RetryConfig`]
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    /// Retries after the first attempt
    #[must_use]
    pub const fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Delay before the first retry
    #[must_use]
    pub const fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    /// Cap on the un-jittered delay
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    /// Uniform jitter fraction in `[0, 1]`
    #[must_use]
    pub fn jitter_fraction(mut self, fraction: f64) -> Self {
        self.config.jitter_fraction = fraction;
        self
    }

    /// Retry budget as a percentage of attempts
    #[must_use]
    pub fn retry_budget_percent(mut self, percent: f64) -> Self {
        self.config.retry_budget_percent = percent;
        self
    }

    /// Span of the rolling budget window
    #[must_use]
    pub const fn budget_window(mut self, window: Duration) -> Self {
        self.config.budget_window = window;
        self
    }

    /// TTL of cached idempotent results
    #[must_use]
    pub const fn idempotency_ttl(mut self, ttl: Duration) -> Self {
        self.config.idempotency_ttl = ttl;
        self
    }

    /// Deadline for the whole call
    #[must_use]
    pub const fn max_total_time(mut self, limit: Duration) -> Self {
        self.config.max_total_time = Some(limit);
        self
    }

    /// Validate and build
    ///
    /// # Errors
    ///
    /// See [`RetryConfig::validate`].
    pub fn build(self) -> Result<RetryConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Retry counters and budget window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryStats {
    /// Dependency name
    pub name: String,
    /// Calls that reached the operation
    pub total_calls: u64,
    /// Retries performed
    pub total_retries: u64,
    /// Retries refused by the budget
    pub budget_rejections: u64,
    /// Calls answered from the idempotency cache
    pub idempotent_hits: u64,
    /// Calls that failed after using every retry
    pub exhausted: u64,
    /// Live idempotency entries
    pub idempotency_entries: usize,
    /// Current budget window
    pub budget: RetryBudgetStats,
}

/// Retry executor for one named dependency
pub struct RetryManager {
    name: String,
    config: RetryConfig,
    backoff: Backoff,
    budget: RetryBudget,
    idempotency: Cache<String, CachedValue, SharedClock>,
    total_calls: AtomicU64,
    total_retries: AtomicU64,
    budget_rejections: AtomicU64,
    idempotent_hits: AtomicU64,
    exhausted: AtomicU64,
    clock: SharedClock,
}

impl fmt::Debug for RetryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryManager")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("budget", &self.budget.stats())
            .finish_non_exhaustive()
    }
}

impl RetryManager {
    /// Create a retry manager on the system clock
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn new(name: impl Into<String>, config: RetryConfig) -> Result<Self, ConfigError> {
        Self::with_clock(name, config, SystemClock::shared())
    }

    /// Create a retry manager reading time from `clock`.
    ///
    /// The clock drives the budget window, the idempotency TTL and the total
    /// time deadline; backoff sleeps always use the tokio timer.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn with_clock(
        name: impl Into<String>,
        config: RetryConfig,
        clock: SharedClock,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            backoff: Backoff::new(config.base_delay, config.max_delay, config.jitter_fraction),
            budget: RetryBudget::new(
                config.retry_budget_percent,
                config.budget_window,
                Arc::clone(&clock),
            ),
            idempotency: Cache::with_clock(config.idempotency_ttl, Arc::clone(&clock)),
            config,
            total_calls: AtomicU64::new(0),
            total_retries: AtomicU64::new(0),
            budget_rejections: AtomicU64::new(0),
            idempotent_hits: AtomicU64::new(0),
            exhausted: AtomicU64::new(0),
            clock,
        })
    }

    /// Dependency name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// The manager's retry budget
    #[must_use]
    pub const fn budget(&self) -> &RetryBudget {
        &self.budget
    }

    /// Run `operation`, retrying retryable failures.
    ///
    /// # Errors
    ///
    /// - The operation's error, unchanged, if it is not retryable or every
    ///   retry was used.
    /// - [`ResilienceError::RetryBudgetExceeded`] if the budget refused a
    ///   retry.
    /// - [`ResilienceError::Timeout`] if the next backoff would cross
    ///   `max_total_time`.
    pub async fn execute_with_retry<F, Fut, T, E>(
        &self,
        idempotency_key: Option<&str>,
        mut operation: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Clone + Send + Sync + 'static,
        E: ErrorClassification,
    {
        self.run(idempotency_key, || operation().map_err(ResilienceError::Operation)).await
    }

    /// Retry loop over an attempt function that already yields resilience
    /// errors, so inner guard errors keep their own classification.
    pub(crate) async fn run<F, Fut, T, E>(
        &self,
        idempotency_key: Option<&str>,
        mut attempt_fn: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        T: Clone + Send + Sync + 'static,
        E: ErrorClassification,
    {
        if let Some(key) = idempotency_key {
            if let Some(value) = self.cached::<T>(key) {
                self.idempotent_hits.fetch_add(1, Ordering::Relaxed);
                debug!(retry = %self.name, key, "Returning cached idempotent result");
                return Ok(value);
            }
        }

        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.budget.record_call();
        let started = self.clock.now();
        let mut attempt: u32 = 0;

        loop {
            let err = match attempt_fn().await {
                Ok(value) => {
                    if let Some(key) = idempotency_key {
                        self.idempotency.cleanup_expired();
                        self.idempotency.insert(key.to_owned(), Arc::new(value.clone()));
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= self.config.max_retries {
                self.exhausted.fetch_add(1, Ordering::Relaxed);
                warn!(retry = %self.name, attempts = attempt + 1, "Retries exhausted");
                return Err(err);
            }

            let backoff = self.backoff.delay(attempt);
            let delay = err.retry_after().unwrap_or(backoff);

            if let Some(limit) = self.config.max_total_time {
                let elapsed = self.clock.now().saturating_duration_since(started);
                if elapsed + delay > limit {
                    warn!(retry = %self.name, ?elapsed, ?delay, "Retry deadline would be exceeded");
                    return Err(ResilienceError::Timeout {
                        component: ComponentKind::Retry,
                        name: self.name.clone(),
                        elapsed,
                    });
                }
            }

            if !self.budget.try_acquire_retry() {
                self.budget_rejections.fetch_add(1, Ordering::Relaxed);
                warn!(retry = %self.name, attempts = attempt + 1, "Retry budget exhausted");
                return Err(ResilienceError::RetryBudgetExceeded {
                    name: self.name.clone(),
                    attempts: attempt + 1,
                });
            }

            self.total_retries.fetch_add(1, Ordering::Relaxed);
            attempt += 1;
            debug!(retry = %self.name, attempt, ?delay, error = %err.kind_name(), "Backing off before retry");
            tokio::time::sleep(delay).await;
        }
    }

    /// Drop every cached idempotent result
    pub fn clear_idempotency_cache(&self) {
        self.idempotency.clear();
    }

    /// Counters and budget snapshot
    #[must_use]
    pub fn get_stats(&self) -> RetryStats {
        RetryStats {
            name: self.name.clone(),
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_retries: self.total_retries.load(Ordering::Relaxed),
            budget_rejections: self.budget_rejections.load(Ordering::Relaxed),
            idempotent_hits: self.idempotent_hits.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            idempotency_entries: self.idempotency.len(),
            budget: self.budget.stats(),
        }
    }

    fn cached<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        // A value cached under the same key by a different result type is a miss.
        self.idempotency.get(&key.to_owned()).and_then(|value| value.downcast_ref::<T>().cloned())
    }
}
