//! # Rampart Core
//!
//! In-process resilience engine for calls to remote dependencies.
//!
//! This crate contains:
//! - Guards: circuit breaker, retry with budget and idempotency, bulkhead,
//!   rate limiters (token bucket, sliding window, leaky bucket)
//! - Adaptive timeouts from observed latency percentiles
//! - Health checks with hysteresis and ordered fallback chains
//! - A [`ResilienceRegistry`] that composes guards per named dependency
//!
//! ## Architecture Principles
//! - Only depends on `rampart-common`
//! - Every time-based decision reads an injectable clock
//! - Guards compose in a fixed order through [`pipeline`]

pub mod adaptive_timeout;
pub mod bulkhead;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod fallback;
pub mod health;
pub mod latency;
pub mod pipeline;
pub mod rate_limiter;
pub mod registry;
pub mod retry;
pub mod stats;

pub use adaptive_timeout::{AdaptiveTimeout, AdaptiveTimeoutConfig, AdaptiveTimeoutStats};
pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadStats, Priority};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use config::{EngineConfig, PolicySet};
pub use error::{ComponentKind, ConfigError, ResilienceError, ResilienceResult};
pub use fallback::{FallbackChain, FallbackError, FallbackLevel, FallbackOutcome, FallbackStats};
pub use health::{
    probe_fn, CheckKind, HealthCheckConfig, HealthCheckResult, HealthChecker, HealthProbe,
    HealthReport, HealthStatus,
};
pub use latency::{LatencyPercentileTable, Percentiles};
pub use rate_limiter::{
    build_rate_limiter, RateLimitAlgorithm, RateLimiter, RateLimiterConfig, RateLimiterStats,
};
pub use registry::{CallOptions, ComponentStats, DependencyStats, ResilienceRegistry};
pub use retry::{RetryConfig, RetryManager, RetryStats};
pub use stats::{CallOutcome, StatsRecorder, StatsSnapshot};
