//! Example: protecting a flaky dependency
//!
//! Loads a small policy document, drives a simulated payment service that
//! fails part of the time, serves a degraded answer from a fallback chain
//! and prints the aggregated stats as JSON.
//!
//! Run with: ```bash cargo run -p rampart-core --example protect_demo ```
//! Set `RUST_LOG=rampart_core=debug` for per-decision logs.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rampart_common::error::CommonError;
use rampart_common::observability::{init_tracing, TracingConfig};
use rampart_core::error::BoxError;
use rampart_core::{
    probe_fn, CallOptions, EngineConfig, FallbackChain, FallbackLevel, HealthCheckConfig,
    HealthChecker, Priority, ResilienceRegistry,
};

const POLICIES: &str = r#"
[dependencies.payments.rate_limiter]
algorithm = "token_bucket"
capacity = 20
refill_rate = 5.0

[dependencies.payments.bulkhead]
max_concurrent_calls = 4
max_queue_size = 8

[dependencies.payments.circuit_breaker]
failure_threshold = 5
timeout_seconds = 2.0

[dependencies.payments.retry]
max_retries = 2
base_delay_ms = 20
retry_budget_percent = 50.0
"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_owned());
    init_tracing(&TracingConfig::builder().filter(filter).build())
        .context("installing tracing subscriber")?;

    let config = EngineConfig::from_toml_str(POLICIES).context("parsing policies")?;
    let registry = ResilienceRegistry::from_config(&config).context("building registry")?;

    println!("Rampart protect demo");
    println!("====================\n");

    let calls = Arc::new(AtomicU32::new(0));
    for i in 0..30 {
        let calls = Arc::clone(&calls);
        let options = CallOptions::new()
            .priority(if i % 5 == 0 { Priority::High } else { Priority::Normal })
            .idempotency_key(format!("charge-{i}"));

        let result = registry
            .protect_configured("payments", &options, move || {
                let calls = Arc::clone(&calls);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    if n % 3 == 0 {
                        Err(CommonError::connection("payments", "connection reset"))
                    } else {
                        Ok(format!("receipt-{n}"))
                    }
                }
            })
            .await;

        match result {
            Ok(receipt) => println!("call {i:>2}: {receipt}"),
            Err(err) => println!("call {i:>2}: {} ({err})", err.kind_name()),
        }
    }

    let checker = HealthChecker::new("payments", HealthCheckConfig::default())?
        .with_liveness(probe_fn(|| async { Ok::<(), BoxError>(()) }))
        .with_readiness(probe_fn(|| async { Ok::<(), BoxError>(()) }));
    let report = registry.register_health_checker(checker).report().await;
    println!("\nhealth: {}", report.status);

    let chain = FallbackChain::builder("payments")
        .level(FallbackLevel::Primary, || async {
            Err::<String, BoxError>("primary unavailable".into())
        })
        .level(FallbackLevel::LocalCache, || async { Ok::<_, BoxError>("cached quote".to_owned()) })
        .level(FallbackLevel::Default, || async { Ok::<_, BoxError>("no quote".to_owned()) })
        .build()?;
    registry.register_fallback(&chain);
    let outcome = chain.execute().await?;
    println!("fallback: '{}' from {} (degraded: {})", outcome.value, outcome.level, outcome.degraded);

    println!("recommended timeout: {:?}\n", registry.compute_timeout("payments"));
    println!("{}", serde_json::to_string_pretty(&registry.comprehensive_stats_json()?)?);
    Ok(())
}
