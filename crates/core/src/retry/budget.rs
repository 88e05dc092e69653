//! Rolling retry budget
//!
//! The budget tracks how many attempts went out over the last window and how
//! many of those were retries. A retry is granted only if, counting the retry
//! itself, retries stay at or below `percent` of all attempts. Time is split
//! into ten buckets so old traffic ages out gradually instead of all at once.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rampart_common::time::SharedClock;
use serde::Serialize;

const BUCKETS_PER_WINDOW: u32 = 10;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    index: u64,
    attempts: u64,
    retries: u64,
}

#[derive(Debug)]
struct BudgetWindow {
    buckets: VecDeque<Bucket>,
}

/// Snapshot of the current window
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RetryBudgetStats {
    /// Attempts in the window, first attempts and retries
    pub total_calls: u64,
    /// Retries in the window
    pub retried_calls: u64,
    /// Configured ceiling for `retried_calls / total_calls`, in percent
    pub budget_percent: f64,
}

impl RetryBudgetStats {
    /// Observed retry ratio, 0.0 when no traffic was seen
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn retry_ratio(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.retried_calls as f64 / self.total_calls as f64
        }
    }
}

/// Time-bucketed cap on the share of attempts that are retries
#[derive(Debug)]
pub struct RetryBudget {
    percent: f64,
    bucket_width: Duration,
    origin: Instant,
    clock: SharedClock,
    window: Mutex<BudgetWindow>,
}

impl RetryBudget {
    /// Create a budget allowing `percent` retries over `window`
    #[must_use]
    pub fn new(percent: f64, window: Duration, clock: SharedClock) -> Self {
        let bucket_width = (window / BUCKETS_PER_WINDOW).max(Duration::from_millis(1));
        Self {
            percent: percent.clamp(0.0, 100.0),
            bucket_width,
            origin: clock.now(),
            clock,
            window: Mutex::new(BudgetWindow { buckets: VecDeque::new() }),
        }
    }

    /// Count a first attempt
    pub fn record_call(&self) {
        let index = self.current_index();
        let mut window = self.window.lock();
        Self::bucket_mut(&mut window, index).attempts += 1;
    }

    /// Ask for one retry. A granted retry is counted as an attempt and as a
    /// retry in the same step.
    pub fn try_acquire_retry(&self) -> bool {
        let index = self.current_index();
        let mut window = self.window.lock();
        let (attempts, retries) = Self::totals(&mut window, index);

        #[allow(clippy::cast_precision_loss)]
        let allowed = ((retries + 1) as f64) * 100.0 <= ((attempts + 1) as f64) * self.percent;
        if allowed {
            let bucket = Self::bucket_mut(&mut window, index);
            bucket.attempts += 1;
            bucket.retries += 1;
        }
        allowed
    }

    /// Current window totals
    #[must_use]
    pub fn stats(&self) -> RetryBudgetStats {
        let index = self.current_index();
        let mut window = self.window.lock();
        let (total_calls, retried_calls) = Self::totals(&mut window, index);
        RetryBudgetStats { total_calls, retried_calls, budget_percent: self.percent }
    }

    /// Forget all recorded traffic
    pub fn reset(&self) {
        self.window.lock().buckets.clear();
    }

    #[allow(clippy::cast_possible_truncation)]
    fn current_index(&self) -> u64 {
        let elapsed = self.clock.now().saturating_duration_since(self.origin);
        (elapsed.as_nanos() / self.bucket_width.as_nanos().max(1)) as u64
    }

    fn evict(window: &mut BudgetWindow, index: u64) {
        let oldest_live = index.saturating_sub(u64::from(BUCKETS_PER_WINDOW) - 1);
        while window.buckets.front().is_some_and(|b| b.index < oldest_live) {
            window.buckets.pop_front();
        }
    }

    fn totals(window: &mut BudgetWindow, index: u64) -> (u64, u64) {
        Self::evict(window, index);
        window.buckets.iter().fold((0, 0), |(a, r), b| (a + b.attempts, r + b.retries))
    }

    fn bucket_mut(window: &mut BudgetWindow, index: u64) -> &mut Bucket {
        Self::evict(window, index);
        if window.buckets.back().map_or(true, |b| b.index != index) {
            window.buckets.push_back(Bucket { index, attempts: 0, retries: 0 });
        }
        let last = window.buckets.len() - 1;
        &mut window.buckets[last]
    }
}
