//! Configuration for circuit breakers.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::breaker::CircuitBreaker;
use crate::clock::{Clock, SystemClock};
use crate::hook::HookRegistry;
use crate::metrics::{MetricSink, NullMetricSink};

/// Failures in the closed state that trip the breaker when none is configured.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
/// Open cooldown used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
/// Half-open successes that close the breaker when none is configured.
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 1;
/// Concurrent half-open probes allowed when none is configured.
pub const DEFAULT_HALF_OPEN_MAX_CONCURRENT: u32 = 1;

/// Decides whether an operation error counts against the breaker.
pub type FailurePredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync + 'static>;

/// Settings for a [`CircuitBreaker`].
///
/// Zero values are not rejected. They are replaced by the `DEFAULT_*`
/// constants when the breaker is built.
pub struct BreakerConfig<E> {
    /// Failures in the closed state that trip the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting probes.
    pub timeout: Duration,
    /// Half-open successes required to close the breaker.
    pub success_threshold: u32,
    /// Maximum number of probes in flight while half-open.
    pub half_open_max_concurrent: u32,
    /// Classifies operation errors. Errors it returns `false` for count as successes.
    pub is_failure: FailurePredicate<E>,
    /// Lifecycle and outcome callbacks.
    pub hooks: Arc<HookRegistry>,
    /// Receiver for metric events.
    pub metric_sink: Arc<dyn MetricSink>,
    /// Time source and timer scheduler.
    pub clock: Arc<dyn Clock>,
}

impl<E: 'static> Default for BreakerConfig<E> {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            timeout: DEFAULT_TIMEOUT,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            half_open_max_concurrent: DEFAULT_HALF_OPEN_MAX_CONCURRENT,
            is_failure: Arc::new(|_: &E| true),
            hooks: Arc::new(HookRegistry::new()),
            metric_sink: Arc::new(NullMetricSink),
            clock: SystemClock::shared(),
        }
    }
}

impl<E> Clone for BreakerConfig<E> {
    fn clone(&self) -> Self {
        Self {
            failure_threshold: self.failure_threshold,
            timeout: self.timeout,
            success_threshold: self.success_threshold,
            half_open_max_concurrent: self.half_open_max_concurrent,
            is_failure: Arc::clone(&self.is_failure),
            hooks: Arc::clone(&self.hooks),
            metric_sink: Arc::clone(&self.metric_sink),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<E> fmt::Debug for BreakerConfig<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerConfig")
            .field("failure_threshold", &self.failure_threshold)
            .field("timeout", &self.timeout)
            .field("success_threshold", &self.success_threshold)
            .field("half_open_max_concurrent", &self.half_open_max_concurrent)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl<E> BreakerConfig<E> {
    /// Replaces every zero setting with its default, logging each replacement.
    pub fn normalize(mut self) -> Self {
        self.failure_threshold = positive_or_default(
            "failure_threshold",
            self.failure_threshold,
            DEFAULT_FAILURE_THRESHOLD,
        );
        self.success_threshold = positive_or_default(
            "success_threshold",
            self.success_threshold,
            DEFAULT_SUCCESS_THRESHOLD,
        );
        self.half_open_max_concurrent = positive_or_default(
            "half_open_max_concurrent",
            self.half_open_max_concurrent,
            DEFAULT_HALF_OPEN_MAX_CONCURRENT,
        );
        self.timeout = timeout_or_default(self.timeout);
        self
    }
}

fn positive_or_default(field: &'static str, value: u32, default: u32) -> u32 {
    if value > 0 {
        return value;
    }

    tracing::warn!(field, default, "non-positive breaker setting replaced by default");
    default
}

pub(crate) fn timeout_or_default(timeout: Duration) -> Duration {
    if !timeout.is_zero() {
        return timeout;
    }

    tracing::warn!(
        default_ms = DEFAULT_TIMEOUT.as_millis() as u64,
        "zero breaker timeout replaced by default"
    );
    DEFAULT_TIMEOUT
}

/// Builder for creating circuit breakers with custom configurations.
pub struct BreakerBuilder<E> {
    config: BreakerConfig<E>,
}

impl<E: 'static> Default for BreakerBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: 'static> BreakerBuilder<E> {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: BreakerConfig::default(),
        }
    }

    /// Sets the number of closed-state failures that trip the circuit.
    pub fn failure_threshold(mut self, count: u32) -> Self {
        self.config.failure_threshold = count;
        self
    }

    /// Sets how long the circuit stays open before admitting probes.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.config.timeout = duration;
        self
    }

    /// Alias for [`BreakerBuilder::timeout`].
    pub fn cooldown(self, duration: Duration) -> Self {
        self.timeout(duration)
    }

    /// Sets the number of half-open successes required to close the circuit.
    pub fn success_threshold(mut self, count: u32) -> Self {
        self.config.success_threshold = count;
        self
    }

    /// Sets the number of probes allowed in flight while half-open.
    pub fn half_open_max_concurrent(mut self, count: u32) -> Self {
        self.config.half_open_max_concurrent = count;
        self
    }

    /// Sets the predicate deciding which operation errors count as failures.
    pub fn failure_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.config.is_failure = Arc::new(predicate);
        self
    }

    /// Sets a hook registry for the circuit breaker.
    pub fn hooks(mut self, hooks: HookRegistry) -> Self {
        self.config.hooks = Arc::new(hooks);
        self
    }

    /// Sets a metric sink for the circuit breaker.
    pub fn metric_sink<M: MetricSink>(mut self, sink: M) -> Self {
        self.config.metric_sink = Arc::new(sink);
        self
    }

    /// Sets the clock used for timestamps and the cooldown timer.
    pub fn clock<C: Clock>(mut self, clock: C) -> Self {
        self.config.clock = Arc::new(clock);
        self
    }

    /// Returns the configuration collected so far, before normalization.
    pub fn into_config(self) -> BreakerConfig<E> {
        self.config
    }

    /// Builds a new circuit breaker with the configured settings.
    pub fn build(self) -> CircuitBreaker<E> {
        CircuitBreaker::new(self.config)
    }
}
