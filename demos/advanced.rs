//! Advanced Circuit Breaker Example
//!
//! This example demonstrates:
//! 1. Driving the breaker by hand around a unit of work, the way a request
//!    middleware would
//! 2. Classifying which errors count as failures
//! 3. Using hooks for monitoring circuit breaker events
//! 4. Reporting breaker health from a metrics snapshot

use circuit_gate::{CircuitBreaker, HookRegistry, State};
use std::error::Error;
use std::fmt;
use std::thread;
use std::time::Duration;

#[derive(Debug)]
enum UpstreamError {
    // The upstream rejected the request itself; says nothing about its health
    BadRequest,
    Unavailable,
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamError::BadRequest => write!(f, "upstream rejected the request"),
            UpstreamError::Unavailable => write!(f, "upstream unavailable"),
        }
    }
}

impl Error for UpstreamError {}

// A function that simulates an upstream with varying failure patterns
fn upstream_call(call: u32) -> Result<String, UpstreamError> {
    match call {
        1..=3 => Ok("Initial success".to_string()),
        4 => Err(UpstreamError::BadRequest),
        5..=8 => Err(UpstreamError::Unavailable),
        _ => Ok("Service recovered".to_string()),
    }
}

/// What a request middleware does around each handler invocation.
fn handle(breaker: &CircuitBreaker<UpstreamError>, call: u32) -> Result<String, String> {
    let (allowed, state) = breaker.allow_request();
    if !allowed {
        return Err(format!("503 Service Unavailable (breaker {})", state));
    }

    let result = upstream_call(call);
    match &result {
        Err(UpstreamError::Unavailable) => breaker.report_failure(),
        _ => breaker.report_success(),
    }
    if state == State::HalfOpen {
        breaker.release_semaphore();
    }

    result.map_err(|err| err.to_string())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .init();

    println!("=== Advanced Circuit Breaker Example ===\n");

    // 1. Set up a hook registry for observability
    let hooks = HookRegistry::new();
    hooks.set_on_open(|| println!("[hook] Circuit OPENED due to too many failures"));
    hooks.set_on_half_open(|| println!("[hook] Circuit HALF-OPEN, probing the upstream"));
    hooks.set_on_close(|| println!("[hook] Circuit CLOSED after successful recovery"));
    hooks.set_on_rejected(|state| println!("[hook] Request rejected while {}", state));

    // 2. Create a circuit breaker with advanced configuration
    let breaker = CircuitBreaker::<UpstreamError>::builder()
        .failure_threshold(3)
        .timeout(Duration::from_millis(800))
        .success_threshold(2)
        .half_open_max_concurrent(1)
        .failure_predicate(|err| matches!(err, UpstreamError::Unavailable))
        .hooks(hooks)
        .build();

    println!("Initial state: {}\n", breaker.state());

    // 3. Simulate a series of requests
    for call in 1..=15 {
        println!("\n--- Request {} ---", call);

        match handle(&breaker, call) {
            Ok(body) => println!("200 OK: {}", body),
            Err(message) => println!("{}", message),
        }

        // 4. What a health-check endpoint would expose
        let metrics = breaker.metrics();
        println!(
            "health: state={} failures={} successes={} total={} rejected={} ({:.0}%)",
            metrics.state,
            metrics.failure_count,
            metrics.success_count,
            metrics.total_requests,
            metrics.rejected_requests,
            metrics.rejection_rate() * 100.0
        );

        thread::sleep(Duration::from_millis(300));
    }

    breaker.stop();
    println!("\n=== Example Completed ===");
}
