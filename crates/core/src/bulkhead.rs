//! Bulkhead pattern for limiting concurrent calls to one dependency
//!
//! A bulkhead owns `max_concurrent_calls` execution slots and a bounded wait
//! queue. A call takes a free slot, or waits in the queue, or is rejected
//! immediately with [`ResilienceError::BulkheadFull`] when the queue is full
//! too. A finished call hands its slot straight to the highest-priority
//! waiter, FIFO within a priority, so a freed slot is never stolen by a
//! newcomer.
//!
//! Slots are released by a drop guard, so success, failure, timeout and
//! cancellation of the protected future all give the slot back.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use futures::TryFutureExt;
use parking_lot::Mutex;
use rampart_common::impl_label_conversions;
use rampart_common::utils::serde::option_duration_millis;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{ComponentKind, ConfigError, ResilienceError};

/// Queue priority of a call
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background work
    Low,
    /// Regular traffic
    #[default]
    Normal,
    /// User-facing traffic
    High,
    /// Must run before anything else
    Critical,
}

impl_label_conversions!(Priority {
    Low => "low",
    Normal => "normal",
    High => "high",
    Critical => "critical",
});

/// Configuration for bulkhead behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkheadConfig {
    /// Execution slots
    pub max_concurrent_calls: usize,
    /// Waiters allowed once every slot is busy
    pub max_queue_size: usize,
    /// Order the queue by priority; plain FIFO when `false`
    pub prioritized: bool,
    /// Longest time a call may wait in the queue
    #[serde(rename = "queue_timeout_ms", with = "option_duration_millis")]
    pub queue_timeout: Option<Duration>,
    /// Longest time a call may hold a slot
    #[serde(rename = "call_timeout_ms", with = "option_duration_millis")]
    pub call_timeout: Option<Duration>,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 10,
            max_queue_size: 10,
            prioritized: true,
            queue_timeout: Some(Duration::from_secs(5)),
            call_timeout: None,
        }
    }
}

impl BulkheadConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> BulkheadConfigBuilder {
        BulkheadConfigBuilder::default()
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when there are no slots or a timeout
    /// is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| Err(ConfigError::invalid(ComponentKind::Bulkhead, message));

        if self.max_concurrent_calls == 0 {
            return invalid("max_concurrent_calls must be greater than 0");
        }
        if self.queue_timeout.is_some_and(|t| t.is_zero()) {
            return invalid("queue_timeout_ms must be greater than 0 when set");
        }
        if self.call_timeout.is_some_and(|t| t.is_zero()) {
            return invalid("call_timeout_ms must be greater than 0 when set");
        }
        Ok(())
    }
}

/// Builder for [`BulkheadConfig`]
#[derive(Debug, Default)]
pub struct BulkheadConfigBuilder {
    config: BulkheadConfig,
}

impl BulkheadConfigBuilder {
    /// Slots that may run at once
    #[must_use]
    pub const fn max_concurrent_calls(mut self, max: usize) -> Self {
        self.config.max_concurrent_calls = max;
        self
    }

    /// Callers that may wait for a slot
    #[must_use]
    pub const fn max_queue_size(mut self, max: usize) -> Self {
        self.config.max_queue_size = max;
        self
    }

    /// Order the queue by priority instead of arrival
    #[must_use]
    pub const fn prioritized(mut self, enabled: bool) -> Self {
        self.config.prioritized = enabled;
        self
    }

    /// Longest wait in the queue
    #[must_use]
    pub const fn queue_timeout(mut self, timeout: Duration) -> Self {
        self.config.queue_timeout = Some(timeout);
        self
    }

    /// Wait in the queue for as long as it takes
    #[must_use]
    pub const fn no_queue_timeout(mut self) -> Self {
        self.config.queue_timeout = None;
        self
    }

    /// Longest a call may hold its slot
    #[must_use]
    pub const fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = Some(timeout);
        self
    }

    /// Validate and build
    ///
    /// # Errors
    ///
    /// See [`BulkheadConfig::validate`].
    pub fn build(self) -> Result<BulkheadConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Metrics for bulkhead monitoring
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkheadStats {
    /// Dependency name
    pub name: String,
    /// Calls currently holding a slot
    pub active_calls: usize,
    /// Calls currently waiting
    pub queued_calls: usize,
    /// Configured slots
    pub max_concurrent_calls: usize,
    /// Configured queue positions
    pub max_queue_size: usize,
    /// Calls that obtained a slot
    pub total_calls: u64,
    /// Calls rejected because slots and queue were full
    pub rejected_calls: u64,
    /// Queue waits and executions that hit their deadline
    pub timed_out_calls: u64,
    /// Highest `active_calls` observed
    pub peak_active: usize,
}

impl BulkheadStats {
    /// Current utilization (0.0 to 1.0)
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn utilization(&self) -> f64 {
        self.active_calls as f64 / self.max_concurrent_calls.max(1) as f64
    }

    /// Rejections as a share of all admission attempts (0.0 to 1.0)
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rejection_rate(&self) -> f64 {
        let total = self.total_calls + self.rejected_calls;
        if total == 0 {
            return 0.0;
        }
        self.rejected_calls as f64 / total as f64
    }

    /// Check if every slot is taken
    #[must_use]
    pub const fn is_at_capacity(&self) -> bool {
        self.active_calls >= self.max_concurrent_calls
    }

    /// Get a human-readable status message
    #[must_use]
    pub fn status_message(&self) -> String {
        format!(
            "Bulkhead '{}': {}/{} active ({:.1}% utilized), {} queued, {} rejected, {} timeouts",
            self.name,
            self.active_calls,
            self.max_concurrent_calls,
            self.utilization() * 100.0,
            self.queued_calls,
            self.rejected_calls,
            self.timed_out_calls
        )
    }
}

type QueueKey = (Reverse<Priority>, u64);

#[derive(Debug, Default)]
struct SlotState {
    active: usize,
    queue: BTreeMap<QueueKey, oneshot::Sender<()>>,
    next_seq: u64,
    total_calls: u64,
    rejected_calls: u64,
    timed_out_calls: u64,
    peak_active: usize,
}

impl SlotState {
    fn note_admitted(&mut self) {
        self.total_calls += 1;
        self.peak_active = self.peak_active.max(self.active);
    }

    /// Give a slot back, handing it to the first live waiter if there is one.
    fn release(&mut self) {
        while let Some((_, waiter)) = self.queue.pop_first() {
            if waiter.send(()).is_ok() {
                return;
            }
        }
        self.active = self.active.saturating_sub(1);
    }
}

/// Held slot; dropping it releases the slot.
struct SlotPermit<'a> {
    bulkhead: &'a Bulkhead,
}

impl Drop for SlotPermit<'_> {
    fn drop(&mut self) {
        self.bulkhead.state.lock().release();
    }
}

/// Queue position; dropping it before the slot arrives leaves the queue, and
/// dropping it after a slot was handed over returns that slot.
struct QueueTicket<'a> {
    bulkhead: &'a Bulkhead,
    key: QueueKey,
    receiver: oneshot::Receiver<()>,
    settled: bool,
}

impl Drop for QueueTicket<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.bulkhead.state.lock();
        if state.queue.remove(&self.key).is_none() && self.receiver.try_recv().is_ok() {
            state.release();
        }
    }
}

/// Bulkhead for limiting concurrent calls
pub struct Bulkhead {
    name: String,
    config: BulkheadConfig,
    state: Mutex<SlotState>,
}

impl fmt::Debug for Bulkhead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Bulkhead")
            .field("name", &self.name)
            .field("max_concurrent_calls", &self.config.max_concurrent_calls)
            .field("max_queue_size", &self.config.max_queue_size)
            .field("active_calls", &state.active)
            .field("queued_calls", &state.queue.len())
            .finish()
    }
}

impl Bulkhead {
    /// Create a new bulkhead
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn new(name: impl Into<String>, config: BulkheadConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { name: name.into(), config, state: Mutex::new(SlotState::default()) })
    }

    /// Dependency name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &BulkheadConfig {
        &self.config
    }

    /// Execute an operation at [`Priority::Normal`]
    ///
    /// # Errors
    ///
    /// See [`Bulkhead::execute_with_priority`].
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with_priority(Priority::Normal, operation).await
    }

    /// Execute an operation once a slot is available.
    ///
    /// # Errors
    ///
    /// - [`ResilienceError::BulkheadFull`] when slots and queue are full.
    /// - [`ResilienceError::Timeout`] when the queue wait or the call itself
    ///   exceeds its deadline.
    /// - [`ResilienceError::Operation`] when the operation fails.
    pub async fn execute_with_priority<F, Fut, T, E>(
        &self,
        priority: Priority,
        operation: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.guard(priority, || operation().map_err(ResilienceError::Operation)).await
    }

    /// Run an inner stage while holding a slot
    pub(crate) async fn guard<F, Fut, T, E>(
        &self,
        priority: Priority,
        next: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        let _permit = self.acquire(priority).await?;

        match self.config.call_timeout {
            Some(limit) => {
                if let Ok(result) = tokio::time::timeout(limit, next()).await {
                    result
                } else {
                    self.state.lock().timed_out_calls += 1;
                    warn!(bulkhead = %self.name, ?limit, "Call exceeded bulkhead call timeout");
                    Err(self.timeout(limit))
                }
            }
            None => next().await,
        }
    }

    /// Calls currently holding a slot
    #[must_use]
    pub fn active_calls(&self) -> usize {
        self.state.lock().active
    }

    /// Calls currently waiting for a slot
    #[must_use]
    pub fn queued_calls(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Get bulkhead metrics
    #[must_use]
    pub fn get_stats(&self) -> BulkheadStats {
        let state = self.state.lock();
        BulkheadStats {
            name: self.name.clone(),
            active_calls: state.active,
            queued_calls: state.queue.len(),
            max_concurrent_calls: self.config.max_concurrent_calls,
            max_queue_size: self.config.max_queue_size,
            total_calls: state.total_calls,
            rejected_calls: state.rejected_calls,
            timed_out_calls: state.timed_out_calls,
            peak_active: state.peak_active,
        }
    }

    async fn acquire<E>(&self, priority: Priority) -> Result<SlotPermit<'_>, ResilienceError<E>> {
        let mut ticket = {
            let mut state = self.state.lock();

            if state.active < self.config.max_concurrent_calls {
                state.active += 1;
                state.note_admitted();
                return Ok(SlotPermit { bulkhead: self });
            }

            if state.queue.len() >= self.config.max_queue_size {
                state.rejected_calls += 1;
                warn!(
                    bulkhead = %self.name,
                    active = state.active,
                    queued = state.queue.len(),
                    "Bulkhead full, rejecting call"
                );
                return Err(ResilienceError::BulkheadFull {
                    name: self.name.clone(),
                    max_concurrent: self.config.max_concurrent_calls,
                    max_queue: self.config.max_queue_size,
                });
            }

            let ordering = if self.config.prioritized { priority } else { Priority::Normal };
            let key = (Reverse(ordering), state.next_seq);
            state.next_seq += 1;
            let (sender, receiver) = oneshot::channel();
            state.queue.insert(key, sender);
            debug!(bulkhead = %self.name, %priority, queued = state.queue.len(), "Call queued");

            QueueTicket { bulkhead: self, key, receiver, settled: false }
        };

        let granted = match self.config.queue_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut ticket.receiver).await {
                Ok(received) => received.is_ok(),
                Err(_) => {
                    let mut state = self.state.lock();
                    ticket.settled = true;
                    if state.queue.remove(&ticket.key).is_some() {
                        state.timed_out_calls += 1;
                        drop(state);
                        warn!(bulkhead = %self.name, ?limit, "Timed out waiting for a bulkhead slot");
                        return Err(self.timeout(limit));
                    }
                    // The slot was handed over while the deadline fired.
                    ticket.receiver.try_recv().is_ok()
                }
            },
            None => (&mut ticket.receiver).await.is_ok(),
        };
        ticket.settled = true;

        if !granted {
            return Err(ResilienceError::BulkheadFull {
                name: self.name.clone(),
                max_concurrent: self.config.max_concurrent_calls,
                max_queue: self.config.max_queue_size,
            });
        }

        self.state.lock().note_admitted();
        Ok(SlotPermit { bulkhead: self })
    }

    fn timeout<E>(&self, limit: Duration) -> ResilienceError<E> {
        ResilienceError::Timeout {
            component: ComponentKind::Bulkhead,
            name: self.name.clone(),
            elapsed: limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use rampart_common::error::CommonError;

    use super::*;

    fn bulkhead(max_concurrent: usize, max_queue: usize) -> Arc<Bulkhead> {
        let config = BulkheadConfig::builder()
            .max_concurrent_calls(max_concurrent)
            .max_queue_size(max_queue)
            .no_queue_timeout()
            .build()
            .expect("valid config");
        Arc::new(Bulkhead::new("payments", config).expect("valid bulkhead"))
    }

    async fn hold(bulkhead: &Bulkhead, priority: Priority, release: oneshot::Receiver<()>) {
        let _ = bulkhead
            .execute_with_priority(priority, || async move {
                let _ = release.await;
                Ok::<_, CommonError>(())
            })
            .await;
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_bulkhead_basic() {
        let bulkhead = bulkhead(2, 1);
        let result = bulkhead.execute(|| async { Ok::<_, CommonError>(42) }).await;
        assert_eq!(result.expect("slot available"), 42);

        let stats = bulkhead.get_stats();
        assert_eq!(stats.total_calls, 1);
        assert_eq!(stats.active_calls, 0);
    }

    #[test]
    fn test_bulkhead_config_validation() {
        assert!(BulkheadConfig::builder().max_concurrent_calls(0).build().is_err());
        assert!(BulkheadConfig::builder().queue_timeout(Duration::ZERO).build().is_err());
        assert!(BulkheadConfig::builder().max_concurrent_calls(1).max_queue_size(0).build().is_ok());
    }

    /// Validates fail-fast rejection when slots and queue are exhausted.
    ///
    /// Assertions:
    /// - Confirms the third call is rejected with `BulkheadFull`.
    /// - Confirms the slot is returned after the holder finishes.
    #[tokio::test]
    async fn test_rejects_when_full() {
        let bulkhead = bulkhead(1, 1);
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();

        let first = tokio::spawn({
            let bulkhead = Arc::clone(&bulkhead);
            async move { hold(&bulkhead, Priority::Normal, rx1).await }
        });
        settle().await;
        let second = tokio::spawn({
            let bulkhead = Arc::clone(&bulkhead);
            async move { hold(&bulkhead, Priority::Normal, rx2).await }
        });
        settle().await;
        assert_eq!(bulkhead.active_calls(), 1);
        assert_eq!(bulkhead.queued_calls(), 1);

        let rejected = bulkhead.execute(|| async { Ok::<_, CommonError>(()) }).await;
        assert!(matches!(rejected, Err(ResilienceError::BulkheadFull { .. })));

        tx1.send(()).expect("holder waiting");
        tx2.send(()).expect("waiter queued");
        first.await.expect("task ran");
        second.await.expect("task ran");

        let stats = bulkhead.get_stats();
        assert_eq!(stats.active_calls, 0);
        assert_eq!(stats.rejected_calls, 1);
        assert_eq!(stats.total_calls, 2);
        assert_eq!(stats.peak_active, 1);
    }

    /// Validates priority ordering of queued waiters.
    ///
    /// Assertions:
    /// - Confirms a freed slot goes to Critical before High before Low.
    #[tokio::test]
    async fn test_priority_jumps_queue() {
        let bulkhead = bulkhead(1, 3);
        let order = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = oneshot::channel();

        let holder = tokio::spawn({
            let bulkhead = Arc::clone(&bulkhead);
            async move { hold(&bulkhead, Priority::Normal, rx).await }
        });
        settle().await;

        let mut waiters = Vec::new();
        for priority in [Priority::Low, Priority::High, Priority::Critical] {
            let bulkhead = Arc::clone(&bulkhead);
            let order = Arc::clone(&order);
            waiters.push(tokio::spawn(async move {
                let _ = bulkhead
                    .execute_with_priority(priority, || async {
                        order.lock().push(priority);
                        Ok::<_, CommonError>(())
                    })
                    .await;
            }));
            settle().await;
        }
        assert_eq!(bulkhead.queued_calls(), 3);

        tx.send(()).expect("holder waiting");
        holder.await.expect("task ran");
        for waiter in waiters {
            waiter.await.expect("task ran");
        }

        assert_eq!(*order.lock(), vec![Priority::Critical, Priority::High, Priority::Low]);
    }

    /// Validates the queue wait deadline.
    ///
    /// Assertions:
    /// - Confirms a bulkhead `Timeout` and that the queue entry is removed.
    #[tokio::test(start_paused = true)]
    async fn test_queue_timeout() {
        let config = BulkheadConfig::builder()
            .max_concurrent_calls(1)
            .max_queue_size(1)
            .queue_timeout(Duration::from_millis(50))
            .build()
            .expect("valid config");
        let bulkhead = Arc::new(Bulkhead::new("payments", config).expect("valid"));
        let (tx, rx) = oneshot::channel();

        let holder = tokio::spawn({
            let bulkhead = Arc::clone(&bulkhead);
            async move { hold(&bulkhead, Priority::Normal, rx).await }
        });
        settle().await;

        let result = bulkhead.execute(|| async { Ok::<_, CommonError>(()) }).await;
        assert!(matches!(
            result,
            Err(ResilienceError::Timeout { component: ComponentKind::Bulkhead, .. })
        ));
        assert_eq!(bulkhead.queued_calls(), 0);
        assert_eq!(bulkhead.get_stats().timed_out_calls, 1);

        tx.send(()).expect("holder waiting");
        holder.await.expect("task ran");
        assert_eq!(bulkhead.active_calls(), 0);
    }

    /// Validates the per-call deadline.
    ///
    /// Assertions:
    /// - Confirms a slow call fails with a bulkhead `Timeout` and frees its slot.
    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_releases_slot() {
        let config = BulkheadConfig::builder()
            .max_concurrent_calls(1)
            .call_timeout(Duration::from_millis(20))
            .build()
            .expect("valid config");
        let bulkhead = Bulkhead::new("payments", config).expect("valid");

        let result = bulkhead
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, CommonError>(())
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::Timeout { .. })));
        assert_eq!(bulkhead.active_calls(), 0);
    }

    /// Validates cleanup when a queued future is dropped.
    ///
    /// Assertions:
    /// - Confirms the abandoned entry leaves the queue.
    /// - Confirms the next waiter still receives the freed slot.
    #[tokio::test]
    async fn test_cancelled_waiter_leaves_queue() {
        let bulkhead = bulkhead(1, 2);
        let (tx, rx) = oneshot::channel();
        let ran = Arc::new(AtomicUsize::new(0));

        let holder = tokio::spawn({
            let bulkhead = Arc::clone(&bulkhead);
            async move { hold(&bulkhead, Priority::Normal, rx).await }
        });
        settle().await;

        let abandoned = tokio::spawn({
            let bulkhead = Arc::clone(&bulkhead);
            async move { bulkhead.execute(|| async { Ok::<_, CommonError>(()) }).await }
        });
        settle().await;
        assert_eq!(bulkhead.queued_calls(), 1);
        abandoned.abort();
        let _ = abandoned.await;
        assert_eq!(bulkhead.queued_calls(), 0);

        let follower = tokio::spawn({
            let bulkhead = Arc::clone(&bulkhead);
            let ran = Arc::clone(&ran);
            async move {
                bulkhead
                    .execute(|| async move {
                        ran.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, CommonError>(())
                    })
                    .await
            }
        });
        settle().await;

        tx.send(()).expect("holder waiting");
        holder.await.expect("task ran");
        follower.await.expect("task ran").expect("slot handed over");
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(bulkhead.active_calls(), 0);
    }

    #[test]
    fn test_bulkhead_stats_methods() {
        let stats = BulkheadStats {
            name: "payments".into(),
            active_calls: 5,
            queued_calls: 0,
            max_concurrent_calls: 10,
            max_queue_size: 4,
            total_calls: 80,
            rejected_calls: 20,
            timed_out_calls: 5,
            peak_active: 9,
        };

        assert!((stats.utilization() - 0.5).abs() < f64::EPSILON);
        assert!((stats.rejection_rate() - 0.2).abs() < f64::EPSILON);
        assert!(!stats.is_at_capacity());
        assert!(stats.status_message().contains("5/10 active"));
    }
}
