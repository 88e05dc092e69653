//! Guard stage composition
//!
//! A [`Pipeline`] is an ordered list of [`GuardStage`]s wrapped around a
//! terminal call. Each stage receives a [`Next`] handle for the rest of the
//! pipeline and decides whether, and how often, to run it. The registry
//! always assembles rate limit → bulkhead → circuit breaker → retry, so a
//! call refused by a cheap guard never takes a bulkhead slot.

use std::fmt;

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use rampart_common::error::ErrorClassification;
use tracing::warn;

use crate::bulkhead::{Bulkhead, Priority};
use crate::circuit_breaker::CircuitBreaker;
use crate::error::ResilienceError;
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryManager;

/// Result type flowing through the pipeline
pub type StageResult<T, E> = Result<T, ResilienceError<E>>;

/// Innermost call of a pipeline. It may run more than once under retry.
pub type Terminal<'a, T, E> = dyn Fn() -> BoxFuture<'a, StageResult<T, E>> + Send + Sync + 'a;

/// One guard around the rest of the pipeline
pub trait GuardStage<T, E>: Send + Sync {
    /// Run this guard, invoking `next` zero or more times
    fn execute<'a>(&'a self, next: Next<'a, T, E>) -> BoxFuture<'a, StageResult<T, E>>;
}

/// The stages after the current one, plus the terminal call
pub struct Next<'a, T, E> {
    stages: &'a [Box<dyn GuardStage<T, E> + 'a>],
    terminal: &'a Terminal<'a, T, E>,
}

impl<T, E> Clone for Next<'_, T, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, E> Copy for Next<'_, T, E> {}

impl<T, E> fmt::Debug for Next<'_, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").field("remaining_stages", &self.stages.len()).finish()
    }
}

impl<'a, T, E> Next<'a, T, E> {
    /// Run the remainder of the pipeline
    #[must_use]
    pub fn run(self) -> BoxFuture<'a, StageResult<T, E>> {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.execute(Next { stages: rest, terminal: self.terminal }),
            None => (self.terminal)(),
        }
    }
}

/// Ordered guard stages
pub struct Pipeline<'a, T, E> {
    stages: Vec<Box<dyn GuardStage<T, E> + 'a>>,
}

impl<T, E> fmt::Debug for Pipeline<'_, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").field("stages", &self.stages.len()).finish()
    }
}

impl<T, E> Default for Pipeline<'_, T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T, E> Pipeline<'a, T, E> {
    /// Empty pipeline; executing it runs the terminal call directly
    #[must_use]
    pub fn new() -> Self {
        Self { stages: Vec::with_capacity(4) }
    }

    /// Append a stage inside the ones already added
    #[must_use]
    pub fn stage(mut self, stage: impl GuardStage<T, E> + 'a) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Number of stages
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// `true` when no stage has been added
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage around `terminal`
    pub fn execute(&'a self, terminal: &'a Terminal<'a, T, E>) -> BoxFuture<'a, StageResult<T, E>> {
        Next { stages: &self.stages, terminal }.run()
    }
}

/// Refuses the call when the limiter denies admission
pub struct RateLimitStage<'a> {
    name: &'a str,
    limiter: &'a dyn RateLimiter,
    cost: u32,
}

impl<'a> RateLimitStage<'a> {
    /// Admit calls of weight `cost` through `limiter`
    pub fn new(name: &'a str, limiter: &'a dyn RateLimiter, cost: u32) -> Self {
        Self { name, limiter, cost }
    }
}

impl<T, E> GuardStage<T, E> for RateLimitStage<'_>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn execute<'a>(&'a self, next: Next<'a, T, E>) -> BoxFuture<'a, StageResult<T, E>> {
        if self.limiter.allow(self.cost) {
            next.run()
        } else {
            warn!(dependency = %self.name, algorithm = %self.limiter.algorithm(), "Rate limit exceeded");
            future::ready(Err(ResilienceError::RateLimitExceeded { name: self.name.to_owned() }))
                .boxed()
        }
    }
}

/// Holds a bulkhead slot around the rest of the pipeline
pub struct BulkheadStage<'a> {
    bulkhead: &'a Bulkhead,
    priority: Priority,
}

impl<'a> BulkheadStage<'a> {
    /// Queue at `priority` for a slot in `bulkhead`
    pub const fn new(bulkhead: &'a Bulkhead, priority: Priority) -> Self {
        Self { bulkhead, priority }
    }
}

impl<T, E> GuardStage<T, E> for BulkheadStage<'_>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn execute<'a>(&'a self, next: Next<'a, T, E>) -> BoxFuture<'a, StageResult<T, E>> {
        self.bulkhead.guard(self.priority, move || next.run()).boxed()
    }
}

/// Gates the rest of the pipeline on the circuit state
pub struct CircuitStage<'a> {
    breaker: &'a CircuitBreaker,
}

impl<'a> CircuitStage<'a> {
    /// Guard with `breaker`
    pub const fn new(breaker: &'a CircuitBreaker) -> Self {
        Self { breaker }
    }
}

impl<T, E> GuardStage<T, E> for CircuitStage<'_>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn execute<'a>(&'a self, next: Next<'a, T, E>) -> BoxFuture<'a, StageResult<T, E>> {
        self.breaker.guard(move || next.run()).boxed()
    }
}

/// Retries the rest of the pipeline
pub struct RetryStage<'a> {
    manager: &'a RetryManager,
    idempotency_key: Option<&'a str>,
}

impl<'a> RetryStage<'a> {
    /// Retry with `manager`, caching success under `idempotency_key`
    pub const fn new(manager: &'a RetryManager, idempotency_key: Option<&'a str>) -> Self {
        Self { manager, idempotency_key }
    }
}

impl<T, E> GuardStage<T, E> for RetryStage<'_>
where
    T: Clone + Send + Sync + 'static,
    E: ErrorClassification + Send + 'static,
{
    fn execute<'a>(&'a self, next: Next<'a, T, E>) -> BoxFuture<'a, StageResult<T, E>> {
        self.manager.run(self.idempotency_key, move || next.run()).boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;
    use rampart_common::error::CommonError;

    use super::*;

    /// Records entry and exit around the rest of the pipeline.
    struct Trace {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl GuardStage<u32, CommonError> for Trace {
        fn execute<'a>(
            &'a self,
            next: Next<'a, u32, CommonError>,
        ) -> BoxFuture<'a, StageResult<u32, CommonError>> {
            async move {
                self.log.lock().push(format!("enter {}", self.label));
                let result = next.run().await;
                self.log.lock().push(format!("exit {}", self.label));
                result
            }
            .boxed()
        }
    }

    /// Validates stage nesting.
    ///
    /// Assertions:
    /// - Confirms the first stage added is the outermost.
    #[tokio::test]
    async fn test_stages_nest_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .stage(Trace { label: "outer", log: Arc::clone(&log) })
            .stage(Trace { label: "inner", log: Arc::clone(&log) });

        let terminal_log = Arc::clone(&log);
        let terminal = move || {
            terminal_log.lock().push("call".to_owned());
            future::ready(Ok::<u32, ResilienceError<CommonError>>(7)).boxed()
        };

        assert_eq!(pipeline.execute(&terminal).await.expect("call succeeds"), 7);
        assert_eq!(
            *log.lock(),
            vec!["enter outer", "enter inner", "call", "exit inner", "exit outer"]
        );
    }

    /// Validates that an empty pipeline is just the call.
    #[tokio::test]
    async fn test_empty_pipeline_runs_terminal() {
        let calls = AtomicU32::new(0);
        let pipeline: Pipeline<'_, u32, CommonError> = Pipeline::new();
        let terminal = || {
            calls.fetch_add(1, Ordering::SeqCst);
            future::ready(Err::<u32, _>(ResilienceError::Operation(CommonError::internal("boom"))))
                .boxed()
        };

        assert!(pipeline.is_empty());
        assert!(pipeline.execute(&terminal).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
