//! Integration tests for the TTL cache
//!
//! Covers expiry driven by a shared mock clock and concurrent access from
//! multiple threads.

#![cfg(feature = "runtime")]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rampart_common::cache::Cache;
use rampart_common::time::{MockClock, SharedClock};

/// Verifies expiry through a type-erased shared clock handle.
///
/// # Test Steps
/// 1. Build a cache over a `SharedClock` wrapping a mock clock
/// 2. Insert two entries at different simulated times
/// 3. Advance past the first entry's TTL only
/// 4. Verify the first entry expired and the second is still live
#[test]
fn test_staggered_expiry_with_shared_clock() {
    let mock = MockClock::new();
    let clock: SharedClock = mock.shared();
    let cache: Cache<String, &'static str, SharedClock> =
        Cache::with_clock(Duration::from_secs(30), clock);

    cache.insert("first".to_string(), "a");
    mock.advance(Duration::from_secs(20));
    cache.insert("second".to_string(), "b");
    mock.advance(Duration::from_secs(15));

    assert_eq!(cache.get(&"first".to_string()), None);
    assert_eq!(cache.get(&"second".to_string()), Some("b"));
    assert_eq!(cache.len(), 1);
}

/// Validates concurrent inserts and reads from several threads.
///
/// # Test Steps
/// 1. Spawn 8 threads each inserting 100 distinct keys
/// 2. Join all threads
/// 3. Verify every key is readable and the size is exact
#[test]
fn test_concurrent_inserts() {
    let cache: Arc<Cache<String, usize>> =
        Arc::new(Cache::new(Duration::from_secs(300)));

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..100 {
                    cache.insert(format!("{worker}-{i}"), worker * 1000 + i);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker thread panicked");
    }

    assert_eq!(cache.len(), 800);
    assert_eq!(cache.get(&"3-42".to_string()), Some(3042));
}

