//! Outcome counters, snapshots and metric sinks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::state::State;

/// Trait for metrics sinks that can receive circuit breaker events.
pub trait MetricSink: Send + Sync + 'static {
    /// Records a state transition event.
    fn record_state_transition(&self, from: State, to: State);

    /// Records an admission decision taken in `state`.
    fn record_admission(&self, state: State, allowed: bool);

    /// Records the outcome of a call wrapped by the breaker.
    fn record_outcome(&self, success: bool, duration: Duration);

    /// Records a success or failure report that arrived in a state that ignores it.
    fn record_ignored_report(&self, state: State, success: bool);
}

/// A null metrics sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMetricSink;

impl MetricSink for NullMetricSink {
    fn record_state_transition(&self, _from: State, _to: State) {}
    fn record_admission(&self, _state: State, _allowed: bool) {}
    fn record_outcome(&self, _success: bool, _duration: Duration) {}
    fn record_ignored_report(&self, _state: State, _success: bool) {}
}

/// Atomic counters updated on the hot path.
///
/// `failures` and `successes` belong to the current state and are zeroed on
/// every transition. Each packs the generation it counts for into its upper
/// half, so a report that raced a transition cannot land in the next state's
/// window. `total_requests` and `rejected_requests` live as long as the
/// breaker and are never reset.
#[derive(Debug, Default)]
pub(crate) struct OutcomeCounters {
    failures: AtomicU64,
    successes: AtomicU64,
    total_requests: AtomicU64,
    rejected_requests: AtomicU64,
}

const COUNT_MASK: u64 = u32::MAX as u64;

fn window(generation: u64) -> u64 {
    (generation & COUNT_MASK) << 32
}

/// Adds one to `counter` if it still counts for `generation`.
fn increment_in(counter: &AtomicU64, generation: u64) -> Option<u64> {
    let expected = window(generation);
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |packed| {
            (packed & !COUNT_MASK == expected && packed & COUNT_MASK < COUNT_MASK)
                .then_some(packed + 1)
        })
        .ok()
        .map(|previous| (previous & COUNT_MASK) + 1)
}

impl OutcomeCounters {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_admission(&self, allowed: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if !allowed {
            self.rejected_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns the failure count including this one, or `None` if the
    /// counters have moved on from `generation`.
    pub(crate) fn increment_failures(&self, generation: u64) -> Option<u64> {
        increment_in(&self.failures, generation)
    }

    /// Returns the success count including this one, or `None` if the
    /// counters have moved on from `generation`.
    pub(crate) fn increment_successes(&self, generation: u64) -> Option<u64> {
        increment_in(&self.successes, generation)
    }

    /// Zeroes the per-state counters and starts counting for `generation`.
    pub(crate) fn reset_window(&self, generation: u64) {
        self.failures.store(window(generation), Ordering::Release);
        self.successes.store(window(generation), Ordering::Release);
    }

    pub(crate) fn failures(&self) -> u64 {
        self.failures.load(Ordering::Acquire) & COUNT_MASK
    }

    pub(crate) fn successes(&self) -> u64 {
        self.successes.load(Ordering::Acquire) & COUNT_MASK
    }

    pub(crate) fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub(crate) fn rejected_requests(&self) -> u64 {
        self.rejected_requests.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of a breaker, suitable for a health-check response.
///
/// Fields are read independently, so a snapshot taken while other threads
/// are reporting may combine values from neighbouring instants.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerMetrics {
    /// State at the time of the snapshot.
    pub state: State,
    /// Failures counted in the current state.
    pub failure_count: u64,
    /// Successes counted in the current state.
    pub success_count: u64,
    /// Admission decisions taken since construction.
    pub total_requests: u64,
    /// Admission decisions that rejected the request.
    pub rejected_requests: u64,
    /// Probe slots currently held. Only meaningful while half-open.
    pub half_open_in_flight: u32,
    /// When the breaker last changed state.
    pub last_state_change: Instant,
    /// Number of transitions since construction. A forced open while
    /// already open counts, since it restarts the open state.
    pub transitions: u64,
    /// Failures in the closed state that trip the breaker.
    pub failure_threshold: u32,
    /// Successes in the half-open state that close the breaker.
    pub success_threshold: u32,
    /// Maximum number of concurrent probes while half-open.
    pub half_open_max_concurrent: u32,
    /// Cooldown applied on the next entry into the open state.
    pub timeout: Duration,
}

impl BreakerMetrics {
    /// Fraction of admission decisions that were rejections.
    pub fn rejection_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }

        self.rejected_requests as f64 / self.total_requests as f64
    }
}

/// Compact view of the current state and its counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateStats {
    /// Current state.
    pub state: State,
    /// Failures counted in the current state.
    pub failure_count: u64,
    /// Successes counted in the current state.
    pub success_count: u64,
    /// When the current state was entered.
    pub last_state_change: Instant,
    /// How long the breaker has been in the current state.
    pub time_in_state: Duration,
}

#[cfg(feature = "prometheus")]
pub use self::prometheus::PrometheusSink;

#[cfg(feature = "prometheus")]
mod prometheus {
    use super::MetricSink;
    use crate::state::State;
    use prometheus_client::metrics::counter::Counter;
    use prometheus_client::metrics::family::Family;
    use prometheus_client::metrics::gauge::Gauge;
    use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
    use prometheus_client::registry::Registry;
    use std::time::Duration;

    type Labels = Vec<(&'static str, &'static str)>;

    /// Metric sink that exports breaker events through `prometheus-client`.
    ///
    /// Every metric carries a `breaker` label so several breakers can share
    /// one registry.
    #[cfg_attr(docsrs, doc(cfg(feature = "prometheus")))]
    #[derive(Debug, Clone)]
    pub struct PrometheusSink {
        name: &'static str,
        transitions: Family<Labels, Counter>,
        admissions: Family<Labels, Counter>,
        ignored_reports: Family<Labels, Counter>,
        state: Family<Labels, Gauge>,
        call_duration: Histogram,
    }

    impl PrometheusSink {
        /// Creates the sink and registers its metrics under `registry`.
        pub fn new(name: &'static str, registry: &mut Registry) -> Self {
            let sink = Self {
                name,
                transitions: Family::default(),
                admissions: Family::default(),
                ignored_reports: Family::default(),
                state: Family::default(),
                call_duration: Histogram::new(exponential_buckets(0.001, 2.0, 14)),
            };

            registry.register(
                "circuit_breaker_transitions",
                "State transitions by source and target state",
                sink.transitions.clone(),
            );
            registry.register(
                "circuit_breaker_admissions",
                "Admission decisions by state and outcome",
                sink.admissions.clone(),
            );
            registry.register(
                "circuit_breaker_ignored_reports",
                "Outcome reports received in a state that ignores them",
                sink.ignored_reports.clone(),
            );
            registry.register(
                "circuit_breaker_state",
                "Current state: 0 closed, 1 open, 2 half-open",
                sink.state.clone(),
            );
            registry.register(
                "circuit_breaker_call_duration_seconds",
                "Duration of calls wrapped by the breaker",
                sink.call_duration.clone(),
            );

            sink
        }
    }

    impl MetricSink for PrometheusSink {
        fn record_state_transition(&self, from: State, to: State) {
            self.transitions
                .get_or_create(&vec![
                    ("breaker", self.name),
                    ("from", from.as_str()),
                    ("to", to.as_str()),
                ])
                .inc();
            self.state
                .get_or_create(&vec![("breaker", self.name)])
                .set(to as i64);
        }

        fn record_admission(&self, state: State, allowed: bool) {
            let outcome = if allowed { "allowed" } else { "rejected" };
            self.admissions
                .get_or_create(&vec![
                    ("breaker", self.name),
                    ("state", state.as_str()),
                    ("outcome", outcome),
                ])
                .inc();
        }

        fn record_outcome(&self, _success: bool, duration: Duration) {
            self.call_duration.observe(duration.as_secs_f64());
        }

        fn record_ignored_report(&self, state: State, success: bool) {
            let report = if success { "success" } else { "failure" };
            self.ignored_reports
                .get_or_create(&vec![
                    ("breaker", self.name),
                    ("state", state.as_str()),
                    ("report", report),
                ])
                .inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_counters_reset_lifetime_counters_do_not() {
        let counters = OutcomeCounters::new();
        counters.record_admission(true);
        counters.record_admission(false);
        assert_eq!(counters.increment_failures(0), Some(1));
        assert_eq!(counters.increment_failures(0), Some(2));
        assert_eq!(counters.increment_successes(0), Some(1));

        counters.reset_window(1);

        assert_eq!(counters.failures(), 0);
        assert_eq!(counters.successes(), 0);
        assert_eq!(counters.total_requests(), 2);
        assert_eq!(counters.rejected_requests(), 1);
    }

    #[test]
    fn increments_for_a_past_generation_are_refused() {
        let counters = OutcomeCounters::new();
        assert_eq!(counters.increment_failures(0), Some(1));

        // A reporter that saw generation 0 arrives after the window moved on.
        counters.reset_window(1);
        assert_eq!(counters.increment_failures(0), None);
        assert_eq!(counters.increment_successes(0), None);
        assert_eq!(counters.failures(), 0);
        assert_eq!(counters.successes(), 0);

        assert_eq!(counters.increment_failures(1), Some(1));
        assert_eq!(counters.failures(), 1);
    }

    #[test]
    fn rejection_rate_handles_zero_requests() {
        let metrics = BreakerMetrics {
            state: State::Closed,
            failure_count: 0,
            success_count: 0,
            total_requests: 0,
            rejected_requests: 0,
            half_open_in_flight: 0,
            last_state_change: Instant::now(),
            transitions: 0,
            failure_threshold: 5,
            success_threshold: 1,
            half_open_max_concurrent: 1,
            timeout: Duration::from_secs(5),
        };
        assert_eq!(metrics.rejection_rate(), 0.0);

        let metrics = BreakerMetrics {
            total_requests: 4,
            rejected_requests: 1,
            ..metrics
        };
        assert_eq!(metrics.rejection_rate(), 0.25);
    }

    #[cfg(feature = "prometheus")]
    #[test]
    fn prometheus_sink_encodes_transitions() {
        use prometheus_client::encoding::text::encode;
        use prometheus_client::registry::Registry;

        let mut registry = Registry::default();
        let sink = PrometheusSink::new("payments", &mut registry);
        sink.record_state_transition(State::Closed, State::Open);
        sink.record_admission(State::Open, false);

        let mut out = String::new();
        encode(&mut out, &registry).unwrap();
        assert!(out.contains("circuit_breaker_transitions_total"));
        assert!(out.contains("breaker=\"payments\""));
        assert!(out.contains("outcome=\"rejected\""));
    }
}
