//! Benchmarks for retry decisions and breaker admission.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use reelflow::errors::{CollaboratorError, ReelflowError};
use reelflow::resilience::{BreakerConfig, CircuitBreaker, RetryConfig, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;

fn retry_benchmark(c: &mut Criterion) {
    let policy = RetryPolicy::new(RetryConfig::default());
    let retryable = ReelflowError::from(CollaboratorError::rate_limited("429"));
    let terminal = ReelflowError::from(CollaboratorError::not_found("404"));

    c.bench_function("decide_retryable", |b| {
        b.iter(|| policy.decide(black_box(&retryable), black_box(2)))
    });

    c.bench_function("decide_terminal", |b| {
        b.iter(|| policy.decide(black_box(&terminal), black_box(2)))
    });

    c.bench_function("base_delay", |b| {
        b.iter(|| policy.base_delay(black_box(7)))
    });
}

fn breaker_benchmark(c: &mut Criterion) {
    let breaker = Arc::new(CircuitBreaker::new(
        "bench",
        BreakerConfig::new(5, Duration::from_secs(60)),
    ));

    c.bench_function("breaker_admit_success", |b| {
        b.iter(|| {
            if let Ok(permit) = breaker.try_acquire() {
                permit.record_success();
            }
        })
    });
}

criterion_group!(benches, retry_benchmark, breaker_benchmark);
criterion_main!(benches);
