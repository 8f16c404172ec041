//! # circuit-gate
//!
//! A lock-efficient admission-control circuit breaker with timer-driven
//! recovery and bounded half-open probing.
//!
//! A breaker guards one downstream dependency. Callers ask it whether a
//! request may proceed, do the work, and report the outcome. Repeated
//! failures trip the breaker so callers fail fast instead of piling onto a
//! struggling dependency.
//!
//! ## States
//!
//! - **Closed**: every request is admitted. Reported failures accumulate and
//!   trip the breaker once they reach the failure threshold.
//! - **Open**: every request is rejected. A one-shot timer moves the breaker to
//!   half-open once the cooldown elapses.
//! - **Half-Open**: at most `half_open_max_concurrent` probes are in flight at
//!   once. Reaching the success threshold closes the breaker; a single failed
//!   probe reopens it.
//!
//! The closed path touches only atomics. Transitions take a single lock per
//! breaker and re-check the source state under it, so a stale timer never
//! undoes a transition made through another path.
//!
//! ## Explicit admission
//!
//! ```rust
//! use circuit_gate::{CircuitBreaker, ManualClock, State};
//! use std::time::Duration;
//!
//! let clock = ManualClock::new();
//! let breaker: CircuitBreaker = CircuitBreaker::builder()
//!     .failure_threshold(2)
//!     .timeout(Duration::from_millis(50))
//!     .success_threshold(1)
//!     .clock(clock.clone())
//!     .build();
//!
//! breaker.report_failure();
//! breaker.report_failure();
//! assert_eq!(breaker.allow_request(), (false, State::Open));
//!
//! clock.advance(Duration::from_millis(50));
//! assert_eq!(breaker.allow_request(), (true, State::HalfOpen));
//! breaker.report_success();
//! breaker.release_semaphore();
//! assert_eq!(breaker.state(), State::Closed);
//! ```
//!
//! ## Wrapped calls
//!
//! ```rust
//! use circuit_gate::{BreakerError, CircuitBreaker};
//! use std::error::Error;
//! use std::fmt;
//!
//! #[derive(Debug)]
//! struct ServiceError(String);
//!
//! impl fmt::Display for ServiceError {
//!     fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
//!         write!(f, "Service error: {}", self.0)
//!     }
//! }
//!
//! impl Error for ServiceError {}
//!
//! let breaker = CircuitBreaker::<ServiceError>::builder()
//!     .failure_threshold(3)
//!     .build();
//!
//! match breaker.call(|| Ok::<_, ServiceError>("Success".to_string())) {
//!     Ok(result) => println!("Call succeeded: {}", result),
//!     Err(err) if err.is_rejection() => println!("Rejected: {}", err),
//!     Err(BreakerError::Operation(err)) => println!("Call failed: {}", err),
//!     Err(err) => println!("Other error: {}", err),
//! }
//! ```
//!
//! ## Features
//!
//! - `std` - Standard library support (default)
//! - `async` - `call_async` and a tokio-backed clock
//! - `prometheus` - Prometheus metric sink

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod breaker;
pub mod clock;
mod config;
mod error;
mod hook;
mod metrics;
pub mod prelude;
mod semaphore;
mod state;

// Re-exports
pub use breaker::{BoxError, CircuitBreaker};
#[cfg(feature = "async")]
pub use clock::TokioClock;
pub use clock::{Clock, ManualClock, SystemClock, TimerHandle};
pub use config::{
    BreakerBuilder, BreakerConfig, FailurePredicate, DEFAULT_FAILURE_THRESHOLD,
    DEFAULT_HALF_OPEN_MAX_CONCURRENT, DEFAULT_SUCCESS_THRESHOLD, DEFAULT_TIMEOUT,
};
pub use error::{BreakerError, BreakerResult};
pub use hook::HookRegistry;
#[cfg(feature = "prometheus")]
pub use metrics::PrometheusSink;
pub use metrics::{BreakerMetrics, MetricSink, NullMetricSink, StateStats};
pub use state::State;
