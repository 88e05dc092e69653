//! Clock-driven TTL cache
//!
//! [`Cache`] is a small thread-safe map whose entries expire a fixed time
//! after insertion. Expiry is evaluated against a [`Clock`], so tests can
//! advance time with [`MockClock`] instead of sleeping.
//!
//! The retry layer uses it to remember the first successful result for an
//! idempotency key.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use rampart_common::cache::Cache;
//! use rampart_common::time::MockClock;
//!
//! let clock = MockClock::new();
//! let cache: Cache<String, u32, MockClock> =
//!     Cache::with_clock(Duration::from_secs(30), clock.clone());
//!
//! cache.insert("order-17".to_string(), 200);
//! assert_eq!(cache.get(&"order-17".to_string()), Some(200));
//!
//! clock.advance(Duration::from_secs(31));
//! assert_eq!(cache.get(&"order-17".to_string()), None);
//! ```
//!
//! [`MockClock`]: crate::time::MockClock

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::time::{Clock, SystemClock};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// Thread-safe cache whose entries expire `ttl` after insertion
///
/// # Type Parameters
/// - `K`: Key type
/// - `V`: Value type, cloned out on every hit
/// - `C`: Clock used for expiry (defaults to `SystemClock`)
pub struct Cache<K, V, C = SystemClock>
where
    K: Eq + Hash,
    V: Clone,
    C: Clock,
{
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
    ttl: Duration,
    clock: C,
}

impl<K, V> Cache<K, V, SystemClock>
where
    K: Eq + Hash,
    V: Clone,
{
    /// Create a new cache using the system clock
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, SystemClock)
    }
}

impl<K, V, C> Cache<K, V, C>
where
    K: Eq + Hash,
    V: Clone,
    C: Clock,
{
    /// Create a new cache with a custom clock
    pub fn with_clock(ttl: Duration, clock: C) -> Self {
        Self { entries: Mutex::new(HashMap::new()), ttl, clock }
    }

    /// Insert a value, replacing any previous entry and restarting its TTL.
    pub fn insert(&self, key: K, value: V) {
        let inserted_at = self.clock.now();
        self.entries.lock().insert(key, CacheEntry { value, inserted_at });
    }

    /// Get a live value, removing it if its TTL has elapsed.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        let expired = self.is_expired(entries.get(key)?, now);
        if expired {
            entries.remove(key);
            return None;
        }
        entries.get(key).map(|entry| entry.value.clone())
    }

    /// Clear all entries
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Current number of entries, including ones not yet swept
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove expired entries, returning how many were dropped
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !self.is_expired(entry, now));
        before - entries.len()
    }

    fn is_expired(&self, entry: &CacheEntry<V>, now: Instant) -> bool {
        now.saturating_duration_since(entry.inserted_at) >= self.ttl
    }
}
