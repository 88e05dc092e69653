//! Named component registry and the `protect` entry point
//!
//! One [`ResilienceRegistry`] is created at startup and cloned into every
//! caller (it is an `Arc` inside). Components are created lazily per
//! dependency name on first use; the first config registered for a name
//! wins and later calls get the cached instance.
//!
//! ```rust
//! use rampart_core::circuit_breaker::CircuitBreakerConfig;
//! use rampart_core::config::PolicySet;
//! use rampart_core::registry::ResilienceRegistry;
//! use rampart_common::error::CommonError;
//!
//! # tokio_test::block_on(async {
//! let registry = ResilienceRegistry::new();
//! let policies = PolicySet::new().with_circuit_breaker(CircuitBreakerConfig::default());
//!
//! let user = registry
//!     .protect("users", &policies, || async { Ok::<_, CommonError>("ada".to_owned()) })
//!     .await
//!     .unwrap();
//! assert_eq!(user, "ada");
//! # });
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use rampart_common::error::ErrorClassification;
use rampart_common::time::{SharedClock, SystemClock};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::adaptive_timeout::{AdaptiveTimeout, AdaptiveTimeoutStats};
use crate::bulkhead::{Bulkhead, BulkheadConfig, BulkheadStats, Priority};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};
use crate::config::{EngineConfig, PolicySet};
use crate::error::{ComponentKind, ConfigError, ResilienceError};
use crate::fallback::{FallbackChain, FallbackCounters, FallbackStats};
use crate::health::{HealthCheckConfig, HealthChecker, HealthReport};
use crate::pipeline::{BulkheadStage, CircuitStage, Pipeline, RateLimitStage, RetryStage};
use crate::rate_limiter::{build_rate_limiter, RateLimiter, RateLimiterConfig, RateLimiterStats};
use crate::retry::{RetryConfig, RetryManager, RetryStats};
use crate::stats::{CallOutcome, StatsRecorder, StatsSnapshot};

/// Per-call options for [`ResilienceRegistry::protect_with`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOptions {
    /// Bulkhead queue priority
    pub priority: Priority,
    /// Key under which a successful result is cached by the retry manager
    pub idempotency_key: Option<String>,
    /// Rate limiter cost
    pub cost: u32,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self { priority: Priority::Normal, idempotency_key: None, cost: 1 }
    }
}

impl CallOptions {
    /// Default options: normal priority, no idempotency key, cost 1
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bulkhead priority
    #[must_use]
    pub const fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the idempotency key
    #[must_use]
    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Set the rate limiter cost
    #[must_use]
    pub const fn cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }
}

/// Stats of one component, tagged with its kind
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "component", rename_all = "snake_case")]
pub enum ComponentStats {
    /// Circuit breaker snapshot
    CircuitBreaker(CircuitBreakerStats),
    /// Retry manager snapshot
    Retry(RetryStats),
    /// Bulkhead snapshot
    Bulkhead(BulkheadStats),
    /// Rate limiter snapshot
    RateLimiter(RateLimiterStats),
    /// Adaptive timeout snapshot
    AdaptiveTimeout(AdaptiveTimeoutStats),
    /// Last health results
    HealthCheck(HealthReport),
    /// Fallback serve counts
    Fallback(FallbackStats),
}

/// Everything known about one dependency
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyStats {
    /// Outcomes of the underlying calls
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calls: Option<StatsSnapshot>,
    /// Circuit breaker snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerStats>,
    /// Retry manager snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryStats>,
    /// Bulkhead snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bulkhead: Option<BulkheadStats>,
    /// Rate limiter snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limiter: Option<RateLimiterStats>,
    /// Adaptive timeout snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adaptive_timeout: Option<AdaptiveTimeoutStats>,
    /// Last health results
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthReport>,
    /// Fallback serve counts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackStats>,
}

struct RegistryInner {
    clock: SharedClock,
    stats_window: usize,
    timeouts: AdaptiveTimeout,
    policies: DashMap<String, PolicySet>,
    circuit_breakers: DashMap<String, Arc<CircuitBreaker>>,
    retry_managers: DashMap<String, Arc<RetryManager>>,
    bulkheads: DashMap<String, Arc<Bulkhead>>,
    rate_limiters: DashMap<String, Arc<dyn RateLimiter>>,
    health_checkers: DashMap<String, Arc<HealthChecker>>,
    fallbacks: DashMap<String, Arc<FallbackCounters>>,
    call_stats: DashMap<String, Arc<Mutex<StatsRecorder>>>,
}

/// Registry of named resilience components
#[derive(Clone)]
pub struct ResilienceRegistry {
    inner: Arc<RegistryInner>,
}

impl fmt::Debug for ResilienceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilienceRegistry")
            .field("circuit_breakers", &self.inner.circuit_breakers.len())
            .field("retry_managers", &self.inner.retry_managers.len())
            .field("bulkheads", &self.inner.bulkheads.len())
            .field("rate_limiters", &self.inner.rate_limiters.len())
            .field("health_checkers", &self.inner.health_checkers.len())
            .finish_non_exhaustive()
    }
}

impl Default for ResilienceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ResilienceRegistry {
    /// Empty registry with default engine settings on the system clock
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(SystemClock::shared())
    }

    /// Empty registry with default engine settings on `clock`
    #[must_use]
    pub fn with_clock(clock: SharedClock) -> Self {
        Self::assemble(EngineConfig::default().stats_window, AdaptiveTimeout::default(), clock)
    }

    /// Registry with every dependency in `config` created up front
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any part of `config` is invalid.
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        Self::from_config_with_clock(config, SystemClock::shared())
    }

    /// [`ResilienceRegistry::from_config`] on `clock`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any part of `config` is invalid.
    pub fn from_config_with_clock(
        config: &EngineConfig,
        clock: SharedClock,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let registry = Self::assemble(
            config.stats_window,
            AdaptiveTimeout::new(config.adaptive_timeout.clone())?,
            clock,
        );

        for (name, policies) in &config.dependencies {
            registry.ensure_components(name, policies)?;
            if let Some(health) = &policies.health {
                registry.get_or_create_health_checker(name, health)?;
            }
            registry.inner.policies.insert(name.clone(), policies.clone());
        }

        info!(dependencies = config.dependencies.len(), "Resilience registry configured");
        Ok(registry)
    }

    fn assemble(stats_window: usize, timeouts: AdaptiveTimeout, clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                clock,
                stats_window,
                timeouts,
                policies: DashMap::new(),
                circuit_breakers: DashMap::new(),
                retry_managers: DashMap::new(),
                bulkheads: DashMap::new(),
                rate_limiters: DashMap::new(),
                health_checkers: DashMap::new(),
                fallbacks: DashMap::new(),
                call_stats: DashMap::new(),
            }),
        }
    }

    /// Clock shared by every component of this registry
    #[must_use]
    pub fn clock(&self) -> SharedClock {
        Arc::clone(&self.inner.clock)
    }

    /// Adaptive timeout calculator
    #[must_use]
    pub fn adaptive_timeout(&self) -> &AdaptiveTimeout {
        &self.inner.timeouts
    }

    /// Circuit breaker for `name`, created from `config` on first use
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the breaker must be created and `config`
    /// is invalid.
    pub fn get_or_create_circuit_breaker(
        &self,
        name: &str,
        config: &CircuitBreakerConfig,
    ) -> Result<Arc<CircuitBreaker>, ConfigError> {
        get_or_create(&self.inner.circuit_breakers, name, ComponentKind::CircuitBreaker, || {
            CircuitBreaker::with_clock(name, config.clone(), self.clock()).map(Arc::new)
        })
    }

    /// Retry manager for `name`, created from `config` on first use
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the manager must be created and `config`
    /// is invalid.
    pub fn get_or_create_retry_manager(
        &self,
        name: &str,
        config: &RetryConfig,
    ) -> Result<Arc<RetryManager>, ConfigError> {
        get_or_create(&self.inner.retry_managers, name, ComponentKind::Retry, || {
            RetryManager::with_clock(name, config.clone(), self.clock()).map(Arc::new)
        })
    }

    /// Bulkhead for `name`, created from `config` on first use
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the bulkhead must be created and `config`
    /// is invalid.
    pub fn get_or_create_bulkhead(
        &self,
        name: &str,
        config: &BulkheadConfig,
    ) -> Result<Arc<Bulkhead>, ConfigError> {
        get_or_create(&self.inner.bulkheads, name, ComponentKind::Bulkhead, || {
            Bulkhead::new(name, config.clone()).map(Arc::new)
        })
    }

    /// Rate limiter for `name`, created from `config` on first use
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the limiter must be created and `config`
    /// is invalid.
    pub fn get_or_create_rate_limiter(
        &self,
        name: &str,
        config: &RateLimiterConfig,
    ) -> Result<Arc<dyn RateLimiter>, ConfigError> {
        get_or_create(&self.inner.rate_limiters, name, ComponentKind::RateLimiter, || {
            build_rate_limiter(name, config, self.clock())
        })
    }

    /// Health checker for `name`, created without probes on first use
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the checker must be created and `config`
    /// is invalid.
    pub fn get_or_create_health_checker(
        &self,
        name: &str,
        config: &HealthCheckConfig,
    ) -> Result<Arc<HealthChecker>, ConfigError> {
        get_or_create(&self.inner.health_checkers, name, ComponentKind::HealthCheck, || {
            HealthChecker::with_clock(name, config.clone(), self.clock()).map(Arc::new)
        })
    }

    /// Register a fully built health checker under its own name, replacing
    /// any earlier one
    pub fn register_health_checker(&self, checker: HealthChecker) -> Arc<HealthChecker> {
        let checker = Arc::new(checker);
        let name = checker.name().to_owned();
        debug!(dependency = %name, "Registered health checker");
        self.inner.health_checkers.insert(name, Arc::clone(&checker));
        checker
    }

    /// Publish a fallback chain's serve counts under the chain's name
    pub fn register_fallback<T: Send + 'static>(&self, chain: &FallbackChain<T>) {
        self.inner.fallbacks.insert(chain.name().to_owned(), chain.counters());
    }

    /// Existing circuit breaker for `name`
    #[must_use]
    pub fn circuit_breaker(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.inner.circuit_breakers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Existing retry manager for `name`
    #[must_use]
    pub fn retry_manager(&self, name: &str) -> Option<Arc<RetryManager>> {
        self.inner.retry_managers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Existing bulkhead for `name`
    #[must_use]
    pub fn bulkhead(&self, name: &str) -> Option<Arc<Bulkhead>> {
        self.inner.bulkheads.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Existing rate limiter for `name`
    #[must_use]
    pub fn rate_limiter(&self, name: &str) -> Option<Arc<dyn RateLimiter>> {
        self.inner.rate_limiters.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Existing health checker for `name`
    #[must_use]
    pub fn health_checker(&self, name: &str) -> Option<Arc<HealthChecker>> {
        self.inner.health_checkers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Policies loaded for `name` by [`ResilienceRegistry::from_config`]
    #[must_use]
    pub fn policies(&self, name: &str) -> Option<PolicySet> {
        self.inner.policies.get(name).map(|entry| entry.value().clone())
    }

    /// Run `operation` under `policies` with default [`CallOptions`].
    ///
    /// # Errors
    ///
    /// See [`ResilienceRegistry::protect_with`].
    pub async fn protect<F, Fut, T, E>(
        &self,
        name: &str,
        policies: &PolicySet,
        operation: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Clone + Send + Sync + 'static,
        E: ErrorClassification + Send + 'static,
    {
        self.protect_with(name, policies, &CallOptions::default(), operation).await
    }

    /// Run `operation` under the policies loaded for `name`; a name with no
    /// loaded policies runs unguarded but is still measured.
    ///
    /// # Errors
    ///
    /// See [`ResilienceRegistry::protect_with`].
    pub async fn protect_configured<F, Fut, T, E>(
        &self,
        name: &str,
        options: &CallOptions,
        operation: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Clone + Send + Sync + 'static,
        E: ErrorClassification + Send + 'static,
    {
        let policies = self.policies(name).unwrap_or_default();
        self.protect_with(name, &policies, options, operation).await
    }

    /// Run `operation` behind every guard configured in `policies`.
    ///
    /// Guards always apply in the order rate limit → bulkhead → circuit
    /// breaker → retry. Every invocation of `operation` is recorded in the
    /// dependency's call stats and adaptive timeout table.
    ///
    /// # Errors
    ///
    /// - The rejecting guard's own [`ResilienceError`] variant.
    /// - [`ResilienceError::Operation`] with the operation's error.
    /// - [`ResilienceError::Configuration`] if a policy is invalid.
    #[instrument(skip_all, fields(dependency = %name, priority = %options.priority))]
    pub async fn protect_with<F, Fut, T, E>(
        &self,
        name: &str,
        policies: &PolicySet,
        options: &CallOptions,
        operation: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Clone + Send + Sync + 'static,
        E: ErrorClassification + Send + 'static,
    {
        let limiter = policies
            .rate_limiter
            .as_ref()
            .map(|config| self.get_or_create_rate_limiter(name, config))
            .transpose()?;
        let bulkhead = policies
            .bulkhead
            .as_ref()
            .map(|config| self.get_or_create_bulkhead(name, config))
            .transpose()?;
        let breaker = policies
            .circuit_breaker
            .as_ref()
            .map(|config| self.get_or_create_circuit_breaker(name, config))
            .transpose()?;
        let retry = policies
            .retry
            .as_ref()
            .map(|config| self.get_or_create_retry_manager(name, config))
            .transpose()?;

        let recorder = self.recorder(name);
        let recorder = &recorder;
        let clock = &self.inner.clock;
        let timeouts = &self.inner.timeouts;
        let operation = &operation;
        let terminal = move || {
            async move {
                let started = clock.now();
                let result = operation().await;
                let finished = clock.now();
                let latency = finished.saturating_duration_since(started);
                let outcome = if result.is_ok() {
                    CallOutcome::success(latency, finished)
                } else {
                    CallOutcome::failure(latency, finished)
                };
                timeouts.observe(name, &outcome);
                recorder.lock().record(outcome);
                result.map_err(ResilienceError::Operation)
            }
            .boxed()
        };

        let mut pipeline = Pipeline::new();
        if let Some(limiter) = &limiter {
            pipeline = pipeline.stage(RateLimitStage::new(name, limiter.as_ref(), options.cost));
        }
        if let Some(bulkhead) = &bulkhead {
            pipeline = pipeline.stage(BulkheadStage::new(bulkhead, options.priority));
        }
        if let Some(breaker) = &breaker {
            pipeline = pipeline.stage(CircuitStage::new(breaker));
        }
        if let Some(retry) = &retry {
            pipeline = pipeline.stage(RetryStage::new(retry, options.idempotency_key.as_deref()));
        }

        let result = pipeline.execute(&terminal).await;
        if let Err(err) = &result {
            debug!(error = err.kind_name(), "Protected call failed");
        }
        result
    }

    /// Recommended timeout for `name`
    #[must_use]
    pub fn compute_timeout(&self, name: &str) -> Duration {
        self.inner.timeouts.compute_timeout(name)
    }

    /// Call stats for `name`, `None` before its first protected call
    #[must_use]
    pub fn call_stats(&self, name: &str) -> Option<StatsSnapshot> {
        self.inner.call_stats.get(name).map(|entry| entry.value().lock().snapshot())
    }

    /// Stats of one component, `None` if it does not exist
    #[must_use]
    pub fn get_stats(&self, kind: ComponentKind, name: &str) -> Option<ComponentStats> {
        let inner = &self.inner;
        match kind {
            ComponentKind::CircuitBreaker => inner
                .circuit_breakers
                .get(name)
                .map(|entry| ComponentStats::CircuitBreaker(entry.get_stats())),
            ComponentKind::Retry => {
                inner.retry_managers.get(name).map(|entry| ComponentStats::Retry(entry.get_stats()))
            }
            ComponentKind::Bulkhead => {
                inner.bulkheads.get(name).map(|entry| ComponentStats::Bulkhead(entry.get_stats()))
            }
            ComponentKind::RateLimiter => {
                inner.rate_limiters.get(name).map(|entry| ComponentStats::RateLimiter(entry.stats()))
            }
            ComponentKind::AdaptiveTimeout => (inner.timeouts.sample_count(name) > 0)
                .then(|| ComponentStats::AdaptiveTimeout(inner.timeouts.stats(name))),
            ComponentKind::HealthCheck => inner
                .health_checkers
                .get(name)
                .map(|entry| ComponentStats::HealthCheck(entry.snapshot())),
            ComponentKind::Fallback => inner
                .fallbacks
                .get(name)
                .map(|entry| ComponentStats::Fallback(entry.snapshot(name))),
        }
    }

    /// Stats for every known dependency, keyed by name
    #[must_use]
    pub fn get_comprehensive_stats(&self) -> BTreeMap<String, DependencyStats> {
        self.names()
            .into_iter()
            .map(|name| {
                let stats = self.dependency_stats(&name);
                (name, stats)
            })
            .collect()
    }

    /// [`ResilienceRegistry::get_comprehensive_stats`] as a JSON value
    ///
    /// # Errors
    ///
    /// Returns the serializer error, which only happens if a stats value
    /// cannot be represented in JSON.
    pub fn comprehensive_stats_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self.get_comprehensive_stats())
    }

    /// Every dependency name known to any component, sorted
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let inner = &self.inner;
        let mut names: BTreeSet<String> = BTreeSet::new();
        names.extend(inner.policies.iter().map(|entry| entry.key().clone()));
        names.extend(inner.circuit_breakers.iter().map(|entry| entry.key().clone()));
        names.extend(inner.retry_managers.iter().map(|entry| entry.key().clone()));
        names.extend(inner.bulkheads.iter().map(|entry| entry.key().clone()));
        names.extend(inner.rate_limiters.iter().map(|entry| entry.key().clone()));
        names.extend(inner.health_checkers.iter().map(|entry| entry.key().clone()));
        names.extend(inner.fallbacks.iter().map(|entry| entry.key().clone()));
        names.extend(inner.call_stats.iter().map(|entry| entry.key().clone()));
        names.extend(inner.timeouts.names());
        names.into_iter().collect()
    }

    /// Drop every component and statistic for `name`; `true` if anything
    /// was removed
    pub fn remove(&self, name: &str) -> bool {
        let inner = &self.inner;
        let had_samples = inner.timeouts.sample_count(name) > 0;
        inner.timeouts.remove(name);

        let removed = [
            inner.policies.remove(name).is_some(),
            inner.circuit_breakers.remove(name).is_some(),
            inner.retry_managers.remove(name).is_some(),
            inner.bulkheads.remove(name).is_some(),
            inner.rate_limiters.remove(name).is_some(),
            inner.health_checkers.remove(name).is_some(),
            inner.fallbacks.remove(name).is_some(),
            inner.call_stats.remove(name).is_some(),
        ]
        .into_iter()
        .any(|removed| removed)
            || had_samples;

        if removed {
            info!(dependency = %name, "Removed dependency from registry");
        }
        removed
    }

    fn dependency_stats(&self, name: &str) -> DependencyStats {
        let inner = &self.inner;
        DependencyStats {
            calls: self.call_stats(name),
            circuit_breaker: inner.circuit_breakers.get(name).map(|entry| entry.get_stats()),
            retry: inner.retry_managers.get(name).map(|entry| entry.get_stats()),
            bulkhead: inner.bulkheads.get(name).map(|entry| entry.get_stats()),
            rate_limiter: inner.rate_limiters.get(name).map(|entry| entry.stats()),
            adaptive_timeout: (inner.timeouts.sample_count(name) > 0)
                .then(|| inner.timeouts.stats(name)),
            health: inner.health_checkers.get(name).map(|entry| entry.snapshot()),
            fallback: inner.fallbacks.get(name).map(|entry| entry.snapshot(name)),
        }
    }

    fn ensure_components(&self, name: &str, policies: &PolicySet) -> Result<(), ConfigError> {
        if let Some(config) = &policies.circuit_breaker {
            self.get_or_create_circuit_breaker(name, config)?;
        }
        if let Some(config) = &policies.retry {
            self.get_or_create_retry_manager(name, config)?;
        }
        if let Some(config) = &policies.bulkhead {
            self.get_or_create_bulkhead(name, config)?;
        }
        if let Some(config) = &policies.rate_limiter {
            self.get_or_create_rate_limiter(name, config)?;
        }
        Ok(())
    }

    fn recorder(&self, name: &str) -> Arc<Mutex<StatsRecorder>> {
        if let Some(existing) = self.inner.call_stats.get(name) {
            return Arc::clone(existing.value());
        }
        let window = self.inner.stats_window;
        Arc::clone(
            self.inner
                .call_stats
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(StatsRecorder::new(window))))
                .value(),
        )
    }
}

fn get_or_create<V: ?Sized>(
    map: &DashMap<String, Arc<V>>,
    name: &str,
    kind: ComponentKind,
    create: impl FnOnce() -> Result<Arc<V>, ConfigError>,
) -> Result<Arc<V>, ConfigError> {
    if let Some(existing) = map.get(name) {
        return Ok(Arc::clone(existing.value()));
    }

    let created = create()?;
    let entry = map.entry(name.to_owned()).or_insert_with(|| {
        debug!(dependency = %name, component = %kind, "Created component");
        created
    });
    Ok(Arc::clone(entry.value()))
}
