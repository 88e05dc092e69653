//! Time abstraction for testability
//!
//! Every time-dependent component in the workspace reads time through the
//! [`Clock`] trait so tests can drive cooldowns, refill rates and TTLs
//! deterministically with [`MockClock`] instead of sleeping.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use rampart_common::time::{Clock, MockClock, SystemClock};
//!
//! // Use system clock in production
//! let clock = SystemClock;
//! let _now = clock.now();
//!
//! // Use mock clock in tests
//! let mock = MockClock::new();
//! let start = mock.now();
//! mock.advance(Duration::from_secs(5));
//! assert_eq!(mock.now().duration_since(start), Duration::from_secs(5));
//! ```

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Trait for time operations to enable testing
pub trait Clock: Debug + Send + Sync {
    /// Get current instant (monotonic time)
    fn now(&self) -> Instant;

    /// Get current system time (wall clock)
    fn system_time(&self) -> SystemTime;
}

/// Clock handle shared between components of one registry.
pub type SharedClock = Arc<dyn Clock>;

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }
}

/// Real system clock implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Wrap the system clock in a [`SharedClock`].
    #[must_use]
    pub fn shared() -> SharedClock {
        Arc::new(Self)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Mock clock for deterministic testing
///
/// Clones share the same elapsed offset, so a test can hand one clone to a
/// component and advance time through another.
///
/// ```
/// use std::time::Duration;
///
/// use rampart_common::time::{Clock, MockClock};
///
/// let clock = MockClock::new();
/// let start = clock.now();
/// clock.advance(Duration::from_secs(61));
/// assert_eq!(clock.now().duration_since(start), Duration::from_secs(61));
/// ```
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed_nanos: Arc<AtomicU64>,
    base_system_time: SystemTime,
}

impl MockClock {
    /// Create a new mock clock anchored at the current real time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed_nanos: Arc::new(AtomicU64::new(0)),
            base_system_time: SystemTime::now(),
        }
    }

    /// Advance the mock clock by a duration.
    pub fn advance(&self, duration: Duration) {
        self.elapsed_nanos.fetch_add(duration_to_nanos(duration), Ordering::SeqCst);
    }

    /// Advance the mock clock by a number of milliseconds.
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Time simulated since the clock was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_nanos.load(Ordering::SeqCst))
    }

    /// Wrap a clone of this clock in a [`SharedClock`].
    #[must_use]
    pub fn shared(&self) -> SharedClock {
        Arc::new(self.clone())
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        self.base_system_time + self.elapsed()
    }
}

fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    //! Unit tests for time::clock.
    use super::*;

    /// Validates the system clock scenario.
    ///
    /// Assertions:
    /// - Ensures `now2 >= now1` evaluates to true.
    #[test]
    fn test_system_clock() {
        let clock = SystemClock;
        let now1 = clock.now();
        let now2 = clock.now();

        assert!(now2 >= now1);
        assert!(clock.system_time() > std::time::UNIX_EPOCH);
    }

    /// Validates `MockClock::advance` for the cooldown scenario.
    ///
    /// Assertions:
    /// - Confirms `after.duration_since(start)` equals 61 seconds.
    #[test]
    fn test_mock_clock_advance() {
        let clock = MockClock::new();
        let start = clock.now();

        clock.advance(Duration::from_secs(60));
        clock.advance_millis(1000);

        assert_eq!(clock.now().duration_since(start), Duration::from_secs(61));
    }

    /// Validates that clones and shared handles observe the same time.
    ///
    /// Assertions:
    /// - Confirms a shared handle sees advances made on the original.
    #[test]
    fn test_mock_clock_shared_handle() {
        let clock = MockClock::new();
        let shared: SharedClock = clock.shared();
        let start = shared.now();

        clock.advance(Duration::from_secs(15));

        assert_eq!(shared.now().duration_since(start), Duration::from_secs(15));
    }
}
