use circuit_gate::{BreakerError, CircuitBreaker};
use std::error::Error;
use std::fmt;
use std::thread;
use std::time::Duration;

// Custom error type that implements Error trait
#[derive(Debug)]
struct ServiceError(String);

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Service error: {}", self.0)
    }
}

impl Error for ServiceError {}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let breaker = CircuitBreaker::<ServiceError>::builder()
        .failure_threshold(3) // 3 failures trip the circuit
        .timeout(Duration::from_secs(1)) // 1 second cooldown
        .half_open_max_concurrent(1) // One probe at a time when half-open
        .build();

    println!("Circuit initial state: {}", breaker.state());

    let mut attempts = 0u32;
    let mut call_service = move || -> Result<String, ServiceError> {
        attempts += 1;
        if (4..=8).contains(&attempts) {
            Err(ServiceError("External service error".to_string()))
        } else {
            Ok(format!("Success #{}", attempts))
        }
    };

    for i in 1..=15 {
        println!("\nAttempt {}: ", i);

        match breaker.call(&mut call_service) {
            Ok(result) => println!("Call succeeded with result: {}", result),
            Err(BreakerError::Operation(err)) => println!("Call failed with error: {}", err),
            Err(err) => {
                println!("{}, waiting before retry...", err);
                thread::sleep(Duration::from_millis(400));
            }
        }

        let metrics = breaker.metrics();
        println!(
            "Current state: {}, requests: {}, rejected: {}",
            metrics.state, metrics.total_requests, metrics.rejected_requests
        );

        thread::sleep(Duration::from_millis(100));
    }

    breaker.stop();
}
