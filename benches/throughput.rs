use circuit_gate::{CircuitBreaker, ManualClock};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::error::Error;
use std::fmt;
use std::time::Duration;

// Custom error type that implements Error trait
#[derive(Debug)]
struct BenchError(String);

impl BenchError {
    fn new(msg: &str) -> Self {
        BenchError(msg.to_string())
    }
}

impl fmt::Display for BenchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Benchmark error: {}", self.0)
    }
}

impl Error for BenchError {}

fn successful_operation() -> Result<(), BenchError> {
    Ok(())
}

fn failing_operation() -> Result<(), BenchError> {
    Err(BenchError::new("Simulated failure"))
}

fn bench_allow_request_closed(c: &mut Criterion) {
    let breaker = CircuitBreaker::<BenchError>::builder()
        .failure_threshold(5)
        .timeout(Duration::from_secs(30))
        .build();

    c.bench_function("allow_request_closed", |b| {
        b.iter(|| {
            let decision = black_box(breaker.allow_request());
            breaker.report_success();
            decision
        });
    });
}

fn bench_call_closed(c: &mut Criterion) {
    let breaker = CircuitBreaker::<BenchError>::builder()
        .failure_threshold(5)
        .timeout(Duration::from_secs(30))
        .build();

    c.bench_function("call_closed_success", |b| {
        b.iter(|| black_box(breaker.call(successful_operation)));
    });
}

fn bench_trip_and_recover(c: &mut Criterion) {
    let clock = ManualClock::new();
    let breaker = CircuitBreaker::<BenchError>::builder()
        .failure_threshold(5)
        .timeout(Duration::from_millis(10))
        .clock(clock.clone())
        .build();

    c.bench_function("trip_and_recover", |b| {
        b.iter(|| {
            // Five failing calls trip the breaker, one call is rejected
            for _ in 0..5 {
                let _ = black_box(breaker.call(failing_operation));
            }
            let _ = black_box(breaker.call(successful_operation));

            clock.advance(Duration::from_millis(10));
            let _ = black_box(breaker.call(successful_operation));
        });
    });
}

fn bench_concurrent_closed(c: &mut Criterion) {
    use std::sync::{Arc, Barrier};
    use std::thread;

    let breaker = CircuitBreaker::<BenchError>::builder()
        .failure_threshold(100)
        .timeout(Duration::from_secs(30))
        .build();

    const THREAD_COUNT: usize = 4;
    const ITERATIONS_PER_THREAD: usize = 1000;

    c.bench_function("concurrent_closed", |b| {
        b.iter(|| {
            let barrier = Arc::new(Barrier::new(THREAD_COUNT + 1));
            let mut handles = Vec::with_capacity(THREAD_COUNT);

            for _ in 0..THREAD_COUNT {
                let thread_breaker = breaker.clone();
                let thread_barrier = Arc::clone(&barrier);

                handles.push(thread::spawn(move || {
                    thread_barrier.wait();
                    for _ in 0..ITERATIONS_PER_THREAD {
                        let _ = black_box(thread_breaker.call(successful_operation));
                    }
                }));
            }

            // Start all threads simultaneously
            barrier.wait();

            for handle in handles {
                handle.join().unwrap();
            }
        });
    });
}

criterion_group!(
    benches,
    bench_allow_request_closed,
    bench_call_closed,
    bench_trip_and_recover,
    bench_concurrent_closed
);
criterion_main!(benches);
