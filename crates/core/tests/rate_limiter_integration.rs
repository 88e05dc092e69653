//! Integration tests for the rate limiter algorithms
//!
//! Builds each algorithm from configuration documents and drives it on a
//! mock clock.

use std::time::Duration;

use rampart_common::time::MockClock;
use rampart_core::rate_limiter::{LeakyBucketConfig, SlidingWindowConfig, TokenBucketConfig};
use rampart_core::{build_rate_limiter, RateLimitAlgorithm, RateLimiterConfig};

/// Validates the token bucket burst and refill cycle.
///
/// # Test Steps
/// 1. Drain a bucket of 10 tokens refilling at 1 token per second
/// 2. Verify the 11th request is rejected
/// 3. Advance one second and verify exactly one more request passes
#[test]
fn test_token_bucket_burst_then_refill() {
    let clock = MockClock::new();
    let config = RateLimiterConfig::TokenBucket(TokenBucketConfig { capacity: 10, refill_rate: 1.0 });
    let limiter = build_rate_limiter("search", &config, clock.shared()).expect("valid");

    assert_eq!((0..10).filter(|_| limiter.allow(1)).count(), 10);
    assert!(!limiter.allow(1));

    clock.advance(Duration::from_secs(1));
    assert!(limiter.allow(1));
    assert!(!limiter.allow(1));

    let stats = limiter.stats();
    assert_eq!(stats.allowed, 11);
    assert_eq!(stats.rejected, 2);
    assert_eq!(stats.algorithm, RateLimitAlgorithm::TokenBucket);
}

/// Validates that weighted requests consume several tokens.
#[test]
fn test_token_bucket_weighted_cost() {
    let clock = MockClock::new();
    let config = RateLimiterConfig::TokenBucket(TokenBucketConfig { capacity: 10, refill_rate: 1.0 });
    let limiter = build_rate_limiter("export", &config, clock.shared()).expect("valid");

    assert!(limiter.allow(6));
    assert!(!limiter.allow(6));
    assert!(limiter.allow(4));
}

/// Validates the sliding window across a window boundary.
///
/// # Test Steps
/// 1. Use the full limit late in the first window
/// 2. Cross into the next window
/// 3. Verify the earlier requests still count until they age out
#[test]
fn test_sliding_window_boundary() {
    let clock = MockClock::new();
    let config = RateLimiterConfig::SlidingWindow(SlidingWindowConfig {
        limit: 5,
        window: Duration::from_secs(10),
        buckets: 10,
    });
    let limiter = build_rate_limiter("login", &config, clock.shared()).expect("valid");

    clock.advance(Duration::from_secs(9));
    assert_eq!((0..5).filter(|_| limiter.allow(1)).count(), 5);

    clock.advance(Duration::from_secs(2));
    assert!(!limiter.allow(1));

    clock.advance(Duration::from_secs(9));
    assert!(limiter.allow(1));
}

/// Validates the leaky bucket drain rate.
///
/// # Test Steps
/// 1. Fill a bucket of 4 draining at 2 per second
/// 2. Verify overflow is rejected
/// 3. Advance one second and verify two more requests fit
#[test]
fn test_leaky_bucket_drains() {
    let clock = MockClock::new();
    let config = RateLimiterConfig::LeakyBucket(LeakyBucketConfig { capacity: 4, drain_rate: 2.0 });
    let limiter = build_rate_limiter("webhooks", &config, clock.shared()).expect("valid");

    assert_eq!((0..6).filter(|_| limiter.allow(1)).count(), 4);

    clock.advance(Duration::from_secs(1));
    assert_eq!((0..3).filter(|_| limiter.allow(1)).count(), 2);
    assert_eq!(limiter.algorithm(), RateLimitAlgorithm::LeakyBucket);
}

/// Validates algorithm selection from a TOML document.
#[test]
fn test_algorithm_from_toml() {
    let config: RateLimiterConfig =
        toml::from_str("algorithm = \"sliding_window\"\nlimit = 3\nwindow_seconds = 1.0\nbuckets = 4")
            .expect("valid document");
    let limiter = build_rate_limiter("api", &config, MockClock::new().shared()).expect("valid");

    assert_eq!(limiter.algorithm(), RateLimitAlgorithm::SlidingWindow);
    assert_eq!((0..5).filter(|_| limiter.allow(1)).count(), 3);

    limiter.reset();
    assert!(limiter.allow(1));
}
