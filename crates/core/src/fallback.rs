//! Degrading handler chain
//!
//! A [`FallbackChain`] tries its handlers in [`FallbackLevel`] order until
//! one succeeds. Anything served below PRIMARY is flagged `degraded` so the
//! caller can mark the response as reduced quality.
//!
//! The DEFAULT level is mandatory and must not depend on anything that can
//! fail; a chain without it is rejected by [`FallbackChainBuilder::build`].
//!
//! ```rust
//! use rampart_core::fallback::{FallbackChain, FallbackLevel};
//!
//! # tokio_test::block_on(async {
//! let chain = FallbackChain::builder("profile")
//!     .level(FallbackLevel::Primary, || async { Err::<String, _>("primary down") })
//!     .level(FallbackLevel::Default, || async { Ok::<_, &str>("anonymous".to_owned()) })
//!     .build()
//!     .unwrap();
//!
//! let outcome = chain.execute().await.unwrap();
//! assert_eq!(outcome.value, "anonymous");
//! assert!(outcome.degraded);
//! # });
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use rampart_common::impl_label_conversions;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{BoxError, ComponentKind, ConfigError};

/// Quality levels, best first
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FallbackLevel {
    /// The authoritative source
    Primary,
    /// A read replica
    Replica,
    /// A shared cache
    DistributedCache,
    /// An in-process cache
    LocalCache,
    /// A backup system
    Backup,
    /// Static, dependency-free answer
    Default,
}

impl_label_conversions!(FallbackLevel {
    Primary => "primary",
    Replica => "replica",
    DistributedCache => "distributed_cache",
    LocalCache => "local_cache",
    Backup => "backup",
    Default => "default",
});

impl FallbackLevel {
    /// Every level in execution order
    pub const ALL: [Self; 6] = [
        Self::Primary,
        Self::Replica,
        Self::DistributedCache,
        Self::LocalCache,
        Self::Backup,
        Self::Default,
    ];

    /// `true` for every level below PRIMARY
    #[must_use]
    pub const fn is_degraded(self) -> bool {
        !matches!(self, Self::Primary)
    }

    const fn index(self) -> usize {
        self as usize
    }
}

/// One level's failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelFailure {
    /// Level that failed
    pub level: FallbackLevel,
    /// Handler error message
    pub message: String,
}

impl fmt::Display for LevelFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.level, self.message)
    }
}

/// Errors from [`FallbackChain::execute`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FallbackError {
    /// Every level, DEFAULT included, failed
    #[error("all fallbacks for '{name}' exhausted [{}]", join_failures(.failures))]
    AllFallbacksExhausted {
        /// Chain name
        name: String,
        /// Failures in execution order
        failures: Vec<LevelFailure>,
    },
}

fn join_failures(failures: &[LevelFailure]) -> String {
    failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Successful chain execution
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackOutcome<T> {
    /// Value produced by the serving level
    pub value: T,
    /// Level that served the value
    pub level: FallbackLevel,
    /// `true` when `level` is below PRIMARY
    pub degraded: bool,
    /// Failures of the levels tried before `level`
    pub failures: Vec<LevelFailure>,
}

/// Per-level serve counts, shared with the registry for stats
#[derive(Debug, Default)]
pub struct FallbackCounters {
    served: [AtomicU64; 6],
    exhausted: AtomicU64,
}

impl FallbackCounters {
    fn record_served(&self, level: FallbackLevel) {
        self.served[level.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot under `name`
    #[must_use]
    pub fn snapshot(&self, name: &str) -> FallbackStats {
        let served = FallbackLevel::ALL
            .iter()
            .map(|&level| (level, self.served[level.index()].load(Ordering::Relaxed)))
            .filter(|&(_, count)| count > 0)
            .collect();
        FallbackStats {
            name: name.to_owned(),
            served,
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

/// Fallback chain snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FallbackStats {
    /// Chain name
    pub name: String,
    /// Executions served per level
    pub served: BTreeMap<FallbackLevel, u64>,
    /// Executions where every level failed
    pub exhausted: u64,
}

impl FallbackStats {
    /// Executions served below PRIMARY
    #[must_use]
    pub fn degraded(&self) -> u64 {
        self.served
            .iter()
            .filter(|(level, _)| level.is_degraded())
            .map(|(_, count)| count)
            .sum()
    }
}

type Handler<T> = Box<dyn Fn() -> BoxFuture<'static, Result<T, BoxError>> + Send + Sync>;

struct LevelHandler<T> {
    handler: Handler<T>,
    timeout: Option<Duration>,
}

/// Builder for [`FallbackChain`]
pub struct FallbackChainBuilder<T> {
    name: String,
    handlers: BTreeMap<FallbackLevel, LevelHandler<T>>,
}

impl<T> fmt::Debug for FallbackChainBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackChainBuilder")
            .field("name", &self.name)
            .field("levels", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<T: Send + 'static> FallbackChainBuilder<T> {
    /// Register the handler for `level`, replacing any earlier one
    #[must_use]
    pub fn level<F, Fut, E>(self, level: FallbackLevel, handler: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.insert(level, None, handler)
    }

    /// Register a handler that fails once it runs longer than `timeout`
    #[must_use]
    pub fn level_with_timeout<F, Fut, E>(
        self,
        level: FallbackLevel,
        timeout: Duration,
        handler: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.insert(level, Some(timeout), handler)
    }

    fn insert<F, Fut, E>(mut self, level: FallbackLevel, timeout: Option<Duration>, handler: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        let handler: Handler<T> =
            Box::new(move || handler().map(|result| result.map_err(Into::into)).boxed());
        self.handlers.insert(level, LevelHandler { handler, timeout });
        self
    }

    /// Build the chain
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if no DEFAULT handler is registered
    /// or a level timeout is zero.
    pub fn build(self) -> Result<FallbackChain<T>, ConfigError> {
        if !self.handlers.contains_key(&FallbackLevel::Default) {
            return Err(ConfigError::invalid(
                ComponentKind::Fallback,
                format!("chain '{}' has no DEFAULT handler", self.name),
            ));
        }
        if self.handlers.values().any(|entry| entry.timeout.is_some_and(|t| t.is_zero())) {
            return Err(ConfigError::invalid(
                ComponentKind::Fallback,
                "level timeouts must be greater than 0",
            ));
        }
        Ok(FallbackChain {
            name: self.name,
            handlers: self.handlers,
            counters: Arc::new(FallbackCounters::default()),
        })
    }
}

/// Ordered chain of degrading handlers
pub struct FallbackChain<T> {
    name: String,
    handlers: BTreeMap<FallbackLevel, LevelHandler<T>>,
    counters: Arc<FallbackCounters>,
}

impl<T> fmt::Debug for FallbackChain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackChain")
            .field("name", &self.name)
            .field("levels", &self.handlers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> FallbackChain<T> {
    /// Start building a chain
    #[must_use]
    pub fn builder(name: impl Into<String>) -> FallbackChainBuilder<T> {
        FallbackChainBuilder { name: name.into(), handlers: BTreeMap::new() }
    }

    /// Chain name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registered levels in execution order
    #[must_use]
    pub fn levels(&self) -> Vec<FallbackLevel> {
        self.handlers.keys().copied().collect()
    }

    /// Shared serve counters
    #[must_use]
    pub fn counters(&self) -> Arc<FallbackCounters> {
        Arc::clone(&self.counters)
    }

    /// Serve counts so far
    #[must_use]
    pub fn get_stats(&self) -> FallbackStats {
        self.counters.snapshot(&self.name)
    }

    /// Try each level in order until one succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`FallbackError::AllFallbacksExhausted`] when every level,
    /// DEFAULT included, failed.
    pub async fn execute(&self) -> Result<FallbackOutcome<T>, FallbackError> {
        let mut failures = Vec::new();

        for (&level, entry) in &self.handlers {
            let attempt = (entry.handler)();
            let result = match entry.timeout {
                Some(limit) => tokio::time::timeout(limit, attempt)
                    .await
                    .unwrap_or_else(|_| Err(format!("timed out after {limit:?}").into())),
                None => attempt.await,
            };

            match result {
                Ok(value) => {
                    self.counters.record_served(level);
                    if level.is_degraded() {
                        debug!(chain = %self.name, %level, skipped = failures.len(), "Served degraded response");
                    }
                    return Ok(FallbackOutcome {
                        value,
                        level,
                        degraded: level.is_degraded(),
                        failures,
                    });
                }
                Err(err) => {
                    debug!(chain = %self.name, %level, error = %err, "Fallback level failed");
                    failures.push(LevelFailure { level, message: err.to_string() });
                }
            }
        }

        self.counters.exhausted.fetch_add(1, Ordering::Relaxed);
        warn!(chain = %self.name, levels = failures.len(), "All fallback levels failed");
        Err(FallbackError::AllFallbacksExhausted { name: self.name.clone(), failures })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn failing(message: &'static str) -> impl Fn() -> futures::future::Ready<Result<String, BoxError>> {
        move || futures::future::ready(Err(message.into()))
    }

    /// Validates ordering when the first levels fail.
    ///
    /// Assertions:
    /// - Confirms DISTRIBUTED_CACHE serves when PRIMARY and REPLICA fail.
    /// - Confirms the outcome is degraded and lists both failures.
    /// - Confirms later levels are never invoked.
    #[tokio::test]
    async fn test_falls_through_in_order() {
        let default_calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&default_calls);
        let chain = FallbackChain::builder("profile")
            .level(FallbackLevel::Default, move || {
                counted.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, BoxError>("default".to_owned()) }
            })
            .level(FallbackLevel::Replica, failing("replica lagging"))
            .level(FallbackLevel::Primary, failing("primary down"))
            .level(FallbackLevel::DistributedCache, || async {
                Ok::<_, BoxError>("cached".to_owned())
            })
            .build()
            .expect("has default");

        let outcome = chain.execute().await.expect("cache serves");
        assert_eq!(outcome.value, "cached");
        assert_eq!(outcome.level, FallbackLevel::DistributedCache);
        assert!(outcome.degraded);
        assert_eq!(
            outcome.failures.iter().map(|f| f.level).collect::<Vec<_>>(),
            vec![FallbackLevel::Primary, FallbackLevel::Replica]
        );
        assert_eq!(default_calls.load(Ordering::SeqCst), 0);
        assert_eq!(chain.get_stats().degraded(), 1);
    }

    /// Validates the primary path.
    ///
    /// Assertions:
    /// - Confirms a healthy PRIMARY is not degraded.
    #[tokio::test]
    async fn test_primary_not_degraded() {
        let chain = FallbackChain::builder("profile")
            .level(FallbackLevel::Primary, || async { Ok::<_, BoxError>(1) })
            .level(FallbackLevel::Default, || async { Ok::<_, BoxError>(0) })
            .build()
            .expect("has default");

        let outcome = chain.execute().await.expect("primary serves");
        assert_eq!(outcome.level, FallbackLevel::Primary);
        assert!(!outcome.degraded);
        assert!(outcome.failures.is_empty());
    }

    #[test]
    fn test_default_is_required() {
        let result = FallbackChain::builder("profile")
            .level(FallbackLevel::Primary, || async { Ok::<_, BoxError>(1) })
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { component: ComponentKind::Fallback, .. })
        ));
    }

    /// Validates the exhausted path.
    ///
    /// Assertions:
    /// - Confirms a failing DEFAULT yields `AllFallbacksExhausted` naming
    ///   every level's failure.
    #[tokio::test]
    async fn test_all_levels_fail() {
        let chain = FallbackChain::builder("profile")
            .level(FallbackLevel::Primary, failing("primary down"))
            .level(FallbackLevel::Default, failing("misconfigured"))
            .build()
            .expect("has default");

        let err = chain.execute().await.expect_err("every level fails");
        assert_eq!(
            err.to_string(),
            "all fallbacks for 'profile' exhausted [primary: primary down; default: misconfigured]"
        );
        assert_eq!(chain.get_stats().exhausted, 1);
    }

    /// Validates per-level timeouts.
    ///
    /// Assertions:
    /// - Confirms a hanging level is abandoned and the next level serves.
    #[tokio::test(start_paused = true)]
    async fn test_level_timeout() {
        let chain = FallbackChain::builder("profile")
            .level_with_timeout(FallbackLevel::Primary, Duration::from_millis(50), || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, BoxError>("late")
            })
            .level(FallbackLevel::Default, || async { Ok::<_, BoxError>("default") })
            .build()
            .expect("has default");

        let outcome = chain.execute().await.expect("default serves");
        assert_eq!(outcome.level, FallbackLevel::Default);
        assert_eq!(outcome.failures[0].message, "timed out after 50ms");
    }
}
