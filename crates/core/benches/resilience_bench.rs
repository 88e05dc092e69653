use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rampart_common::error::CommonError;
use rampart_core::rate_limiter::TokenBucketConfig;
use rampart_core::{
    AdaptiveTimeout, BulkheadConfig, CircuitBreaker, CircuitBreakerConfig, LatencyPercentileTable,
    PolicySet, RateLimiterConfig, ResilienceRegistry, RetryConfig,
};

fn full_policies() -> PolicySet {
    PolicySet::new()
        .with_rate_limiter(RateLimiterConfig::TokenBucket(TokenBucketConfig {
            capacity: u64::MAX / 2,
            refill_rate: 1_000_000.0,
        }))
        .with_bulkhead(BulkheadConfig::default())
        .with_circuit_breaker(CircuitBreakerConfig::default())
        .with_retry(RetryConfig::default())
}

fn circuit_breaker_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("circuit_breaker");
    let breaker =
        CircuitBreaker::new("bench", CircuitBreakerConfig::default()).expect("valid config");

    group.bench_function("call_blocking_success", |b| {
        b.iter(|| breaker.call_blocking(|| Ok::<_, CommonError>(black_box(1_u64))));
    });

    group.finish();
}

fn registry_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let registry = ResilienceRegistry::new();
    let bare = PolicySet::new();
    let full = full_policies();

    group.bench_function("protect_unguarded", |b| {
        b.iter(|| {
            runtime.block_on(async {
                registry.protect("bench", &bare, || async { Ok::<_, CommonError>(1_u64) }).await
            })
        });
    });

    group.bench_function("protect_all_guards", |b| {
        b.iter(|| {
            runtime.block_on(async {
                registry.protect("bench-full", &full, || async { Ok::<_, CommonError>(1_u64) }).await
            })
        });
    });

    group.finish();
}

fn latency_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("latency");

    let mut table = LatencyPercentileTable::new(1000);
    for ms in 0..1000 {
        table.record_ms(f64::from(ms % 250));
    }
    group.bench_function("percentiles_1000", |b| b.iter(|| black_box(table.percentiles())));

    let timeouts = AdaptiveTimeout::default();
    for ms in 0..500_u64 {
        timeouts.record("bench", Duration::from_millis(ms % 120));
    }
    group.bench_function("compute_timeout", |b| {
        b.iter(|| black_box(timeouts.compute_timeout("bench")));
    });

    group.finish();
}

criterion_group!(resilience_benchmarks, circuit_breaker_benchmark, registry_benchmark, latency_benchmark);
criterion_main!(resilience_benchmarks);
