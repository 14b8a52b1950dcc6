//! Resilience benchmarks
//!
//! Hot paths of the breaker state machine and bulkhead admission, the full
//! decorator pipeline, and backoff calculation.
//!
//! Run with: `cargo bench --bench resilience_bench -p rampart-resilience`

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rampart_resilience::{
    Admission, Bulkhead, BulkheadConfig, CircuitBreaker, CircuitBreakerConfig, Jitter, MockClock,
    ResiliencyDecorator, ResiliencyPolicy, RetryConfig,
};
use tokio::runtime::Builder as RuntimeBuilder;

#[derive(Debug, Clone)]
struct BenchError(&'static str);

impl Display for BenchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for BenchError {}

fn build_runtime() -> tokio::runtime::Runtime {
    RuntimeBuilder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime should build for benchmarks")
}

// ============================================================================
// Circuit Breaker Benchmarks
// ============================================================================

fn bench_circuit_breaker_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("circuit_breaker_paths");

    group.bench_function("admit_and_record_success", |b| {
        let breaker = CircuitBreaker::with_defaults();
        b.iter(|| match breaker.check_admission() {
            Admission::Admitted(ticket) => black_box(breaker.record_success(&ticket)),
            Admission::Rejected { .. } => panic!("closed breaker rejected a call"),
        });
    });

    group.bench_function("reject_while_open", |b| {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .recovery_timeout(Duration::from_secs(3600))
            .build()
            .expect("valid breaker config for benchmarks");
        let breaker = CircuitBreaker::with_clock(config, MockClock::new())
            .expect("breaker should build with benchmark configuration");
        if let Admission::Admitted(ticket) = breaker.check_admission() {
            breaker.record_failure(&ticket);
        }

        b.iter(|| black_box(breaker.check_admission()));
    });

    group.bench_function("open_probe_close_cycle", |b| {
        let clock = MockClock::new();
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(3)
            .recovery_timeout(Duration::from_secs(1))
            .build()
            .expect("valid breaker config for benchmarks");
        let breaker = CircuitBreaker::with_clock(config, clock.clone())
            .expect("breaker should build with benchmark configuration");

        b.iter(|| {
            for _ in 0..3 {
                if let Admission::Admitted(ticket) = breaker.check_admission() {
                    breaker.record_failure(&ticket);
                }
            }
            clock.advance(Duration::from_secs(1));
            if let Admission::Admitted(ticket) = breaker.check_admission() {
                black_box(breaker.record_success(&ticket));
            }
        });
    });

    group.finish();
}

// ============================================================================
// Bulkhead Benchmarks
// ============================================================================

fn bench_bulkhead_admission(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulkhead_admission");
    let runtime = build_runtime();

    let bulkhead = Bulkhead::new(BulkheadConfig::default()).expect("default bulkhead config");
    group.bench_function("acquire_release_uncontended", |b| {
        b.to_async(&runtime).iter(|| async {
            let permit = bulkhead.acquire().await.expect("slot should be free");
            black_box(permit);
        });
    });

    let full = Bulkhead::new(
        BulkheadConfig::builder().max_concurrent_calls(1).no_wait().build().expect("valid config"),
    )
    .expect("bulkhead should build");
    let _held = full.try_acquire();
    group.bench_function("reject_when_full", |b| {
        b.to_async(&runtime).iter(|| async {
            let _result = black_box(full.acquire().await);
        });
    });

    group.finish();
}

// ============================================================================
// Decorator Benchmarks
// ============================================================================

fn bench_decorator_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("decorator_pipeline");
    let runtime = build_runtime();

    let passthrough = ResiliencyDecorator::new("passthrough", &ResiliencyPolicy::passthrough())
        .expect("passthrough policy is valid");
    group.bench_function("passthrough_success", |b| {
        b.to_async(&runtime).iter(|| async {
            let result = passthrough.execute(|| async { Ok::<_, BenchError>(1u32) }).await;
            black_box(result.expect("passthrough success"));
        });
    });

    let policy = ResiliencyPolicy::builder()
        .retry(
            RetryConfig::builder()
                .max_attempts(3)
                .base_delay(Duration::ZERO)
                .max_delay(Duration::ZERO)
                .build()
                .expect("valid retry config"),
        )
        .timeout(Duration::from_secs(1))
        .circuit_breaker(
            CircuitBreakerConfig::builder()
                .failure_threshold(u32::MAX)
                .build()
                .expect("valid breaker config"),
        )
        .bulkhead(BulkheadConfig::default())
        .build()
        .expect("full policy is valid");
    let full = ResiliencyDecorator::new("full", &policy).expect("decorator should build");

    group.bench_function("all_mechanisms_success", |b| {
        b.to_async(&runtime).iter(|| async {
            let result = full.execute(|| async { Ok::<_, BenchError>(1u32) }).await;
            black_box(result.expect("full pipeline success"));
        });
    });

    group.bench_function("all_mechanisms_two_retries", |b| {
        b.to_async(&runtime).iter(|| async {
            let mut remaining_failures = 2u32;
            let result = full
                .execute(move || {
                    let fail_now = remaining_failures > 0;
                    if fail_now {
                        remaining_failures -= 1;
                    }
                    async move {
                        if fail_now {
                            Err(BenchError("transient failure"))
                        } else {
                            Ok(())
                        }
                    }
                })
                .await;
            black_box(result.expect("third attempt succeeds"));
        });
    });

    group.finish();
}

// ============================================================================
// Backoff Benchmarks
// ============================================================================

fn bench_retry_backoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("retry_backoff");
    let attempts = [1u32, 2, 5, 10, 40];

    let jitters = [("none", Jitter::None), ("full", Jitter::Full), ("equal", Jitter::Equal)];

    for (name, jitter) in jitters {
        let config = RetryConfig::builder()
            .base_delay(Duration::from_millis(1))
            .max_delay(Duration::from_secs(1))
            .jitter(jitter)
            .build()
            .expect("valid retry config");

        group.bench_with_input(BenchmarkId::new("backoff", name), &config, |b, config| {
            b.iter(|| {
                for attempt in attempts {
                    black_box(config.backoff(attempt));
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    resilience,
    bench_circuit_breaker_paths,
    bench_bulkhead_admission,
    bench_decorator_pipeline,
    bench_retry_backoff
);
criterion_main!(resilience);
