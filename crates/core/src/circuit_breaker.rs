//! Three-state circuit breaker
//!
//! The breaker counts failures over a sliding window of recent outcomes.
//! Once `failure_threshold` failures sit inside the window while CLOSED, it
//! opens and fails fast for `timeout`. The first call after the cooldown is
//! let through as a trial (HALF_OPEN); `success_threshold` consecutive
//! trial successes close it again and any trial failure reopens it.
//!
//! All mutable state sits behind one mutex that is never held while the
//! protected operation runs.
//!
//! ```rust
//! use std::time::Duration;
//!
//! use rampart_core::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
//!
//! # tokio_test::block_on(async {
//! let config = CircuitBreakerConfig::builder()
//!     .failure_threshold(2)
//!     .timeout(Duration::from_secs(30))
//!     .build()
//!     .unwrap();
//! let breaker = CircuitBreaker::new("billing", config).unwrap();
//!
//! let value: Result<u32, _> = breaker.call(|| async { Ok::<_, std::io::Error>(7) }).await;
//! assert_eq!(value.unwrap(), 7);
//! assert_eq!(breaker.state(), CircuitState::Closed);
//! # });
//! ```

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rampart_common::time::{SharedClock, SystemClock};
use rampart_common::utils::serde::duration_secs_f64;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ComponentKind, ConfigError, ResilienceError};
use crate::stats::{CallOutcome, StatsRecorder};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are rejected until the cooldown elapses
    Open,
    /// Limited trial calls probe for recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures inside the window that open the circuit
    pub failure_threshold: u32,
    /// Consecutive trial successes that close the circuit
    pub success_threshold: u32,
    /// Cooldown between opening and the first trial call
    #[serde(rename = "timeout_seconds", with = "duration_secs_f64")]
    pub timeout: Duration,
    /// Number of recent outcomes failures are counted over
    pub window_size: usize,
    /// Concurrent trial calls allowed while half-open
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
            window_size: 20,
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    #[must_use]
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a threshold is zero, the timeout
    /// is zero, or the window cannot hold `failure_threshold` outcomes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| Err(ConfigError::invalid(ComponentKind::CircuitBreaker, message));

        if self.failure_threshold == 0 {
            return invalid("failure_threshold must be greater than 0");
        }
        if self.success_threshold == 0 {
            return invalid("success_threshold must be greater than 0");
        }
        if self.timeout.is_zero() {
            return invalid("timeout_seconds must be greater than 0");
        }
        if self.half_open_max_calls == 0 {
            return invalid("half_open_max_calls must be greater than 0");
        }
        if self.window_size < self.failure_threshold as usize {
            return invalid("window_size must be at least failure_threshold");
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`]
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    /// Failures inside the window that open the circuit
    #[must_use]
    pub const fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Consecutive trial successes that close the circuit
    #[must_use]
    pub const fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    /// Cooldown before the first trial call
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Sliding window size
    #[must_use]
    pub const fn window_size(mut self, size: usize) -> Self {
        self.config.window_size = size;
        self
    }

    /// Concurrent trial calls while half-open
    #[must_use]
    pub const fn half_open_max_calls(mut self, max_calls: u32) -> Self {
        self.config.half_open_max_calls = max_calls;
        self
    }

    /// Validate and build
    ///
    /// # Errors
    ///
    /// See [`CircuitBreakerConfig::validate`].
    pub fn build(self) -> Result<CircuitBreakerConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Observable circuit breaker state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerStats {
    /// Dependency name
    pub name: String,
    /// Current state
    pub state: CircuitState,
    /// Failures inside the sliding window
    pub failure_count: usize,
    /// Consecutive trial successes while half-open
    pub success_count: u32,
    /// Wall-clock time of the last state change
    pub last_transition_at: DateTime<Utc>,
    /// Calls admitted since creation
    pub total_calls: u64,
    /// Calls rejected without invoking the operation
    pub rejected_calls: u64,
    /// Failed calls since creation
    pub total_failures: u64,
    /// Successful calls since creation
    pub total_successes: u64,
    /// State changes since creation
    pub transitions: u64,
    /// Failure ratio over the sliding window
    pub failure_rate: f64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    window: StatsRecorder,
    half_open_successes: u32,
    half_open_in_flight: u32,
    opened_at: Option<Instant>,
    last_transition_at: SystemTime,
    total_calls: u64,
    rejected_calls: u64,
    transitions: u64,
}

/// Admission ticket for one call.
///
/// Dropping a trial permit without reporting a result frees its half-open
/// slot, so a cancelled trial cannot wedge the breaker.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Permit<'_> {
    fn settle(mut self, outcome: CallOutcome) {
        self.settled = true;
        self.breaker.on_result(self.trial, outcome);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            let mut inner = self.breaker.inner.lock();
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }
}

/// Circuit breaker protecting one named dependency
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: SharedClock,
    inner: Mutex<BreakerState>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Create a circuit breaker on the system clock
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        Self::with_clock(name, config, SystemClock::shared())
    }

    /// Create a circuit breaker reading time from `clock`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: SharedClock,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let inner = BreakerState {
            state: CircuitState::Closed,
            window: StatsRecorder::new(config.window_size),
            half_open_successes: 0,
            half_open_in_flight: 0,
            opened_at: None,
            last_transition_at: clock.system_time(),
            total_calls: 0,
            rejected_calls: 0,
            transitions: 0,
        };
        Ok(Self { name: name.into(), config, clock, inner: Mutex::new(inner) })
    }

    /// Dependency name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run an async operation under the breaker.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::CircuitOpen`] without invoking `operation`
    /// while the circuit is open, otherwise the operation's own error wrapped
    /// in [`ResilienceError::Operation`].
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.guard(|| async move { operation().await.map_err(ResilienceError::Operation) }).await
    }

    /// Run a synchronous operation under the breaker.
    ///
    /// # Errors
    ///
    /// Same as [`CircuitBreaker::call`].
    pub fn call_blocking<F, T, E>(&self, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let permit = self.try_acquire()?;
        let started = self.clock.now();
        let result = operation();
        permit.settle(self.outcome(started, result.is_ok()));
        result.map_err(ResilienceError::Operation)
    }

    /// Run an inner stage whose errors are already resilience errors.
    ///
    /// Any error returned by the inner stage counts as a failure.
    pub(crate) async fn guard<F, Fut, T, E>(&self, next: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        let permit = self.try_acquire()?;
        let started = self.clock.now();
        let result = next().await;
        permit.settle(self.outcome(started, result.is_ok()));
        result
    }

    /// Current state, applying the OPEN→HALF_OPEN cooldown check lazily on
    /// the next admission rather than here.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// `true` if a call issued now would be admitted
    #[must_use]
    pub fn is_call_permitted(&self) -> bool {
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.remaining_cooldown(&inner).is_zero(),
            CircuitState::HalfOpen => inner.half_open_in_flight < self.config.half_open_max_calls,
        }
    }

    /// Snapshot of state and counters
    #[must_use]
    pub fn get_stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.window.failure_count(),
            success_count: inner.half_open_successes,
            last_transition_at: DateTime::<Utc>::from(inner.last_transition_at),
            total_calls: inner.total_calls,
            rejected_calls: inner.rejected_calls,
            total_failures: inner.window.total_failures(),
            total_successes: inner.window.total_calls() - inner.window.total_failures(),
            transitions: inner.transitions,
            failure_rate: inner.window.failure_rate(),
        }
    }

    /// Force the breaker back to CLOSED with an empty window
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, CircuitState::Closed);
        info!(breaker = %self.name, "Circuit breaker manually reset to closed state");
    }

    fn try_acquire<E>(&self) -> Result<Permit<'_>, ResilienceError<E>> {
        let mut inner = self.inner.lock();

        if inner.state == CircuitState::Open {
            let remaining = self.remaining_cooldown(&inner);
            if !remaining.is_zero() {
                inner.rejected_calls += 1;
                debug!(breaker = %self.name, ?remaining, "Circuit breaker rejecting call");
                return Err(ResilienceError::CircuitOpen {
                    name: self.name.clone(),
                    retry_after: remaining,
                });
            }
            self.transition(&mut inner, CircuitState::HalfOpen);
        }

        let trial = inner.state == CircuitState::HalfOpen;
        if trial {
            if inner.half_open_in_flight >= self.config.half_open_max_calls {
                inner.rejected_calls += 1;
                debug!(breaker = %self.name, "Circuit breaker trial slots busy, rejecting call");
                return Err(ResilienceError::CircuitOpen {
                    name: self.name.clone(),
                    retry_after: Duration::ZERO,
                });
            }
            inner.half_open_in_flight += 1;
        }

        inner.total_calls += 1;
        Ok(Permit { breaker: self, trial, settled: false })
    }

    fn on_result(&self, trial: bool, outcome: CallOutcome) {
        let mut inner = self.inner.lock();
        inner.window.record(outcome);

        if trial {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }

        match inner.state {
            CircuitState::Closed => {
                let failures = inner.window.failure_count();
                if !outcome.succeeded && failures >= self.config.failure_threshold as usize {
                    warn!(breaker = %self.name, failures, "Circuit breaker opened");
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen if trial => {
                if outcome.succeeded {
                    inner.half_open_successes += 1;
                    if inner.half_open_successes >= self.config.success_threshold {
                        info!(
                            breaker = %self.name,
                            successes = inner.half_open_successes,
                            "Circuit breaker closed after successful trials"
                        );
                        self.transition(&mut inner, CircuitState::Closed);
                    }
                } else {
                    warn!(breaker = %self.name, "Trial call failed, circuit breaker reopened");
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            // Results of calls admitted before the last transition only feed the window.
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.last_transition_at = self.clock.system_time();
        inner.half_open_successes = 0;
        inner.transitions += 1;

        match to {
            CircuitState::Open => {
                inner.opened_at = Some(self.clock.now());
                inner.window.clear_window();
            }
            CircuitState::HalfOpen => {
                inner.half_open_in_flight = 0;
            }
            CircuitState::Closed => {
                inner.opened_at = None;
                inner.half_open_in_flight = 0;
                inner.window.clear_window();
            }
        }

        debug!(breaker = %self.name, %from, %to, "Circuit breaker state change");
    }

    fn remaining_cooldown(&self, inner: &BreakerState) -> Duration {
        inner.opened_at.map_or(Duration::ZERO, |opened_at| {
            let elapsed = self.clock.now().saturating_duration_since(opened_at);
            self.config.timeout.saturating_sub(elapsed)
        })
    }

    fn outcome(&self, started: Instant, succeeded: bool) -> CallOutcome {
        let now = self.clock.now();
        CallOutcome { latency: now.saturating_duration_since(started), succeeded, timestamp: now }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use rampart_common::error::CommonError;
    use rampart_common::time::MockClock;

    use super::*;

    fn breaker(clock: &MockClock, failures: u32, successes: u32, timeout_secs: u64) -> CircuitBreaker {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(failures)
            .success_threshold(successes)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("valid config");
        CircuitBreaker::with_clock("orders", config, clock.shared()).expect("valid breaker")
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), ResilienceError<CommonError>> {
        cb.call(|| async { Err(CommonError::connection("orders", "refused")) }).await
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<(), ResilienceError<CommonError>> {
        cb.call(|| async { Ok(()) }).await
    }

    /// Validates configuration validation for the zero-threshold scenario.
    ///
    /// Assertions:
    /// - Ensures zero thresholds, zero timeout and short windows are rejected.
    #[test]
    fn test_config_validation() {
        assert!(CircuitBreakerConfig::builder().failure_threshold(0).build().is_err());
        assert!(CircuitBreakerConfig::builder().success_threshold(0).build().is_err());
        assert!(CircuitBreakerConfig::builder().timeout(Duration::ZERO).build().is_err());
        assert!(CircuitBreakerConfig::builder()
            .failure_threshold(10)
            .window_size(5)
            .build()
            .is_err());
        assert!(CircuitBreakerConfig::default().validate().is_ok());
    }

    /// Validates the full open, trial and close cycle.
    ///
    /// Assertions:
    /// - Confirms the circuit opens after `failure_threshold` failures.
    /// - Confirms calls are rejected without invoking the operation.
    /// - Confirms the circuit stays half-open until `success_threshold`.
    #[tokio::test]
    async fn test_open_trial_close_cycle() {
        let clock = MockClock::new();
        let cb = breaker(&clock, 5, 3, 60);

        for _ in 0..5 {
            assert!(matches!(fail(&cb).await, Err(ResilienceError::Operation(_))));
        }
        assert_eq!(cb.state(), CircuitState::Open);

        let invoked = AtomicU32::new(0);
        let rejected: Result<(), ResilienceError<CommonError>> = cb
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(rejected, Err(ResilienceError::CircuitOpen { .. })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);

        clock.advance(Duration::from_secs(61));
        succeed(&cb).await.expect("trial admitted");
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        succeed(&cb).await.expect("trial admitted");
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        succeed(&cb).await.expect("trial admitted");
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    /// Validates that a trial failure reopens the circuit.
    ///
    /// Assertions:
    /// - Confirms the state returns to OPEN and the cooldown restarts.
    #[tokio::test]
    async fn test_trial_failure_reopens() {
        let clock = MockClock::new();
        let cb = breaker(&clock, 2, 2, 30);

        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        clock.advance(Duration::from_secs(30));

        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        match succeed(&cb).await {
            Err(ResilienceError::CircuitOpen { retry_after, .. }) => {
                assert_eq!(retry_after, Duration::from_secs(30));
            }
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
    }

    /// Validates failure counting over the sliding window.
    ///
    /// Assertions:
    /// - Confirms interleaved successes do not reset windowed failures.
    /// - Confirms failures that slide out of the window stop counting.
    #[tokio::test]
    async fn test_sliding_window_counting() {
        let clock = MockClock::new();
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(3)
            .window_size(4)
            .build()
            .expect("valid config");
        let cb = CircuitBreaker::with_clock("search", config, clock.shared()).expect("valid");

        let _ = fail(&cb).await;
        let _ = succeed(&cb).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.get_stats().failure_count, 2);

        let _ = succeed(&cb).await;
        let _ = succeed(&cb).await;
        assert_eq!(cb.get_stats().failure_count, 1);
        assert_eq!(cb.state(), CircuitState::Closed);

        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);
    }

    /// Validates the stats snapshot and manual reset.
    ///
    /// Assertions:
    /// - Confirms transitions move `last_transition_at` with the clock.
    /// - Confirms rejected calls are counted.
    /// - Confirms `reset()` closes the circuit.
    #[tokio::test]
    async fn test_stats_and_reset() {
        let clock = MockClock::new();
        let cb = breaker(&clock, 1, 1, 10);
        let created = cb.get_stats().last_transition_at;

        clock.advance(Duration::from_secs(5));
        let _ = fail(&cb).await;
        let _ = succeed(&cb).await;

        let stats = cb.get_stats();
        assert_eq!(stats.state, CircuitState::Open);
        assert_eq!(stats.rejected_calls, 1);
        assert_eq!(stats.total_calls, 1);
        assert_eq!((stats.last_transition_at - created).num_seconds(), 5);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.is_call_permitted());
    }

    /// Validates the blocking variant and half-open slot limits.
    ///
    /// Assertions:
    /// - Confirms `call_blocking` trips the breaker like the async path.
    /// - Confirms a dropped trial future frees its half-open slot.
    #[tokio::test]
    async fn test_blocking_call_and_cancelled_trial() {
        let clock = MockClock::new();
        let cb = breaker(&clock, 1, 1, 1);

        let result: Result<(), ResilienceError<CommonError>> =
            cb.call_blocking(|| Err(CommonError::timeout("orders", Duration::from_millis(5))));
        assert!(result.is_err());
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(1));
        {
            let pending = cb.call(|| std::future::pending::<Result<(), CommonError>>());
            let _ = futures::poll!(Box::pin(pending));
        }
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.is_call_permitted());

        succeed(&cb).await.expect("trial admitted after cancelled trial");
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
