//! Re-exports the types most call sites need.
//!
//! # Example
//! ```rust,no_run
//! use circuit_gate::prelude::*;
//!
//! let breaker: CircuitBreaker = CircuitBreaker::builder().build();
//! if let (true, _) = breaker.allow_request() {
//!     breaker.report_success();
//! }
//! ```

pub use crate::breaker::CircuitBreaker;
pub use crate::config::BreakerBuilder;
pub use crate::error::{BreakerError, BreakerResult};
pub use crate::hook::HookRegistry;
pub use crate::metrics::BreakerMetrics;
pub use crate::state::State;
