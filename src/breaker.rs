//! Core circuit breaker implementation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::clock::{Clock, TimerHandle};
use crate::config::{timeout_or_default, BreakerBuilder, BreakerConfig, FailurePredicate};
use crate::error::{BreakerError, BreakerResult};
use crate::hook::HookRegistry;
use crate::metrics::{BreakerMetrics, MetricSink, OutcomeCounters, StateStats};
use crate::semaphore::ProbeSemaphore;
use crate::state::{State, StateCell};

/// Boxed error used when a breaker is only driven through
/// [`CircuitBreaker::allow_request`] and the report methods.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Everything guarded by the transition lock.
struct Control {
    cooldown: Option<TimerHandle>,
}

/// A transition applied under the lock, announced after it is released.
struct Transition {
    from: State,
    to: State,
    generation: u64,
    reason: &'static str,
}

/// Inner state of the circuit breaker, shared between clones.
struct BreakerInner<E> {
    state: StateCell,
    counters: OutcomeCounters,
    control: Mutex<Control>,
    probes: RwLock<Arc<ProbeSemaphore>>,
    failure_threshold: u32,
    success_threshold: u32,
    half_open_max_concurrent: u32,
    timeout_nanos: AtomicU64,
    last_state_change: Mutex<Instant>,
    stopped: AtomicBool,
    is_failure: FailurePredicate<E>,
    hooks: Arc<HookRegistry>,
    metric_sink: Arc<dyn MetricSink>,
    clock: Arc<dyn Clock>,
    self_ref: Weak<BreakerInner<E>>,
}

/// A circuit breaker guarding one downstream dependency.
///
/// Clones share the same state, so a breaker can be handed to every call
/// site that talks to the dependency.
pub struct CircuitBreaker<E = BoxError> {
    inner: Arc<BreakerInner<E>>,
}

/// Result of an admission decision, carrying the semaphore a probe slot was
/// taken from so [`CircuitBreaker::call`] can return that exact slot.
struct Admission {
    allowed: bool,
    state: State,
    probe: Option<Arc<ProbeSemaphore>>,
}

/// Releases a held probe slot when dropped, including on unwind.
struct ProbeSlot(Option<Arc<ProbeSemaphore>>);

impl Drop for ProbeSlot {
    fn drop(&mut self) {
        if let Some(probes) = self.0.take() {
            probes.release();
        }
    }
}

impl<E: 'static> CircuitBreaker<E> {
    /// Creates a circuit breaker, replacing zero settings with defaults.
    pub fn new(config: BreakerConfig<E>) -> Self {
        let config = config.normalize();
        let now = config.clock.now();

        tracing::debug!(
            failure_threshold = config.failure_threshold,
            success_threshold = config.success_threshold,
            half_open_max_concurrent = config.half_open_max_concurrent,
            timeout_ms = config.timeout.as_millis() as u64,
            "circuit breaker created"
        );

        let inner = Arc::new_cyclic(|self_ref| BreakerInner {
            state: StateCell::new(),
            counters: OutcomeCounters::new(),
            control: Mutex::new(Control { cooldown: None }),
            probes: RwLock::new(Arc::new(ProbeSemaphore::new(
                config.half_open_max_concurrent,
            ))),
            failure_threshold: config.failure_threshold,
            success_threshold: config.success_threshold,
            half_open_max_concurrent: config.half_open_max_concurrent,
            timeout_nanos: AtomicU64::new(duration_to_nanos(config.timeout)),
            last_state_change: Mutex::new(now),
            stopped: AtomicBool::new(false),
            is_failure: config.is_failure,
            hooks: config.hooks,
            metric_sink: config.metric_sink,
            clock: config.clock,
            self_ref: self_ref.clone(),
        });

        Self { inner }
    }

    /// Creates a new builder for customizing a circuit breaker.
    pub fn builder() -> BreakerBuilder<E> {
        BreakerBuilder::new()
    }

    /// Decides whether a request may proceed.
    ///
    /// Closed admits everything and open rejects everything. Half-open admits
    /// a request only if a probe slot is free; the caller must then call
    /// [`CircuitBreaker::release_semaphore`] once the probe completes. The
    /// returned state is the one the decision was taken in.
    pub fn allow_request(&self) -> (bool, State) {
        let admission = self.inner.admit();
        (admission.allowed, admission.state)
    }

    /// Reports that an admitted request succeeded.
    ///
    /// Only counted while half-open. Reaching the success threshold closes
    /// the circuit. A report while open is logged and otherwise ignored.
    pub fn report_success(&self) {
        self.inner.report_success();
    }

    /// Reports that an admitted request failed.
    ///
    /// While closed, reaching the failure threshold trips the circuit. While
    /// half-open, a single failure reopens it. Ignored while open.
    pub fn report_failure(&self) {
        self.inner.report_failure();
    }

    /// Frees one half-open probe slot. A no-op if no slot is held.
    pub fn release_semaphore(&self) {
        if !self.inner.probes.read().release() {
            tracing::trace!("release_semaphore called with no probe slot held");
        }
    }

    /// Executes a function wrapped by the circuit breaker.
    ///
    /// Errors the failure predicate rejects are reported as successes but are
    /// still returned to the caller as [`BreakerError::Operation`].
    pub fn call<F, T>(&self, f: F) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let slot = self.inner.admit().into_slot()?;

        let start = Instant::now();
        let result = f();
        self.inner.record_result(&result, start.elapsed());
        drop(slot);

        result.map_err(BreakerError::Operation)
    }

    /// Gets the current state of the circuit breaker.
    pub fn state(&self) -> State {
        self.inner.state.current()
    }

    /// True if the circuit is open.
    pub fn is_open(&self) -> bool {
        self.state() == State::Open
    }

    /// Cooldown applied on the next entry into the open state.
    pub fn timeout(&self) -> Duration {
        self.inner.timeout()
    }

    /// Changes the cooldown without rebuilding the breaker.
    ///
    /// Applies from the next entry into the open state. A cooldown already
    /// running keeps its original deadline. A zero duration is replaced by
    /// the default.
    pub fn set_timeout(&self, timeout: Duration) {
        let timeout = timeout_or_default(timeout);
        self.inner
            .timeout_nanos
            .store(duration_to_nanos(timeout), Ordering::Release);
        tracing::debug!(
            timeout_ms = timeout.as_millis() as u64,
            "breaker timeout updated, effective from next open"
        );
    }

    /// Takes a snapshot of the breaker's state, counters and settings.
    pub fn metrics(&self) -> BreakerMetrics {
        let inner = &self.inner;
        BreakerMetrics {
            state: inner.state.current(),
            failure_count: inner.counters.failures(),
            success_count: inner.counters.successes(),
            total_requests: inner.counters.total_requests(),
            rejected_requests: inner.counters.rejected_requests(),
            half_open_in_flight: inner.probes.read().in_flight(),
            last_state_change: *inner.last_state_change.lock(),
            transitions: inner.state.generation(),
            failure_threshold: inner.failure_threshold,
            success_threshold: inner.success_threshold,
            half_open_max_concurrent: inner.half_open_max_concurrent,
            timeout: inner.timeout(),
        }
    }

    /// Current state with its counters and time spent in it.
    pub fn state_stats(&self) -> StateStats {
        let inner = &self.inner;
        let last_state_change = *inner.last_state_change.lock();
        StateStats {
            state: inner.state.current(),
            failure_count: inner.counters.failures(),
            success_count: inner.counters.successes(),
            last_state_change,
            time_in_state: inner
                .clock
                .now()
                .saturating_duration_since(last_state_change),
        }
    }

    /// Forces the circuit open, bypassing the failure threshold.
    ///
    /// Always restarts the cooldown from now. Returns `false` if the circuit
    /// was already open; no transition is announced in that case.
    pub fn force_open(&self) -> bool {
        self.inner.force_open()
    }

    /// Forces the circuit closed and zeroes its counters.
    ///
    /// Returns `false` if it was already closed. Counters are zeroed and the
    /// state change is restamped either way.
    pub fn force_close(&self) -> bool {
        self.inner.close("forced")
    }

    /// Returns the breaker to closed with zeroed counters and no pending cooldown.
    pub fn reset(&self) {
        if !self.inner.close("reset") {
            tracing::trace!("reset on a closed breaker only zeroed its counters");
        }
    }

    /// Cancels any pending cooldown and stops arming new ones.
    ///
    /// The breaker keeps admitting and counting afterwards, but an open
    /// circuit stays open until [`CircuitBreaker::reset`] or
    /// [`CircuitBreaker::force_close`]. Calling it twice is harmless.
    pub fn stop(&self) {
        let first = !self.inner.stopped.swap(true, Ordering::AcqRel);
        let cancelled = self
            .inner
            .control
            .lock()
            .cooldown
            .take()
            .map(|timer| timer.cancel())
            .unwrap_or(false);

        if first {
            tracing::debug!(cancelled_cooldown = cancelled, "circuit breaker stopped");
        }
    }
}

impl<E: 'static> BreakerInner<E> {
    fn timeout(&self) -> Duration {
        Duration::from_nanos(self.timeout_nanos.load(Ordering::Acquire))
    }

    fn admit(&self) -> Admission {
        let state = self.state.current();
        let (allowed, probe) = match state {
            State::Closed => (true, None),
            State::Open => (false, None),
            State::HalfOpen => {
                let probes = Arc::clone(&*self.probes.read());
                if probes.try_acquire() {
                    (true, Some(probes))
                } else {
                    (false, None)
                }
            }
        };

        self.counters.record_admission(allowed);
        self.metric_sink.record_admission(state, allowed);
        if !allowed {
            self.hooks.execute_rejected_hook(state);
        }

        Admission {
            allowed,
            state,
            probe,
        }
    }

    fn report_success(&self) {
        self.hooks.execute_success_hook();

        let (state, generation) = self.state.snapshot();
        match state {
            State::HalfOpen => match self.counters.increment_successes(generation) {
                Some(successes) if successes >= u64::from(self.success_threshold) => {
                    self.transition_from(State::HalfOpen, generation, State::Closed, "recovered");
                }
                Some(_) => {}
                None => tracing::trace!(generation, "success raced a transition, not counted"),
            },
            // Success is the normal outcome while closed and carries no state.
            State::Closed => {}
            State::Open => self.ignore_report(State::Open, true),
        }
    }

    fn report_failure(&self) {
        self.hooks.execute_failure_hook();

        let (state, generation) = self.state.snapshot();
        match state {
            State::Closed => match self.counters.increment_failures(generation) {
                Some(failures) if failures >= u64::from(self.failure_threshold) => {
                    self.transition_from(
                        State::Closed,
                        generation,
                        State::Open,
                        "failure threshold reached",
                    );
                }
                Some(_) => {}
                None => tracing::trace!(generation, "failure raced a transition, not counted"),
            },
            State::HalfOpen => {
                self.transition_from(State::HalfOpen, generation, State::Open, "probe failed");
            }
            State::Open => self.ignore_report(State::Open, false),
        }
    }

    fn ignore_report(&self, state: State, success: bool) {
        tracing::debug!(
            state = state.as_str(),
            success,
            "outcome report ignored in current state"
        );
        self.metric_sink.record_ignored_report(state, success);
    }

    fn record_result<T>(&self, result: &Result<T, E>, duration: Duration) {
        let failed = match result {
            Ok(_) => false,
            Err(err) => (self.is_failure)(err),
        };

        self.metric_sink.record_outcome(!failed, duration);
        if failed {
            self.report_failure();
        } else {
            self.report_success();
        }
    }

    /// Moves from `from` to `to` if the breaker is still in `from` at
    /// `generation` once the lock is held.
    fn transition_from(&self, from: State, generation: u64, to: State, reason: &'static str) {
        let mut control = self.control.lock();
        if !self.state.is_current(from, generation) {
            tracing::trace!(generation, reason, "stale transition ignored");
            return;
        }

        let transition = self.apply(&mut control, from, to, reason);
        drop(control);

        self.announce(&transition);
    }

    fn force_open(&self) -> bool {
        let mut control = self.control.lock();
        let from = self.state.current();
        let transition = self.apply(&mut control, from, State::Open, "forced");
        drop(control);

        if from == State::Open {
            tracing::debug!(
                generation = transition.generation,
                "forced open while open, cooldown restarted"
            );
            return false;
        }

        self.announce(&transition);
        true
    }

    /// Moves to closed from any other state. If already closed, zeroes the
    /// counters and restamps the state change. Returns whether a transition
    /// happened.
    fn close(&self, reason: &'static str) -> bool {
        let mut control = self.control.lock();
        let from = self.state.current();
        if from == State::Closed {
            self.counters.reset_window(self.state.generation());
            *self.last_state_change.lock() = self.clock.now();
            return false;
        }

        let transition = self.apply(&mut control, from, State::Closed, reason);
        drop(control);

        self.announce(&transition);
        true
    }

    /// Body of every transition. Must be called with the control lock held.
    ///
    /// Counters are zeroed before the new state is published, so a reader
    /// that sees the new state never sees the previous state's counts.
    fn apply(
        &self,
        control: &mut Control,
        from: State,
        to: State,
        reason: &'static str,
    ) -> Transition {
        if let Some(timer) = control.cooldown.take() {
            timer.cancel();
        }

        // Only writer, so the next generation is known before it is published.
        self.counters.reset_window(self.state.generation() + 1);
        if to == State::HalfOpen {
            *self.probes.write() = Arc::new(ProbeSemaphore::new(self.half_open_max_concurrent));
        }

        let generation = self.state.set(to);
        *self.last_state_change.lock() = self.clock.now();

        if to == State::Open {
            control.cooldown = self.arm_cooldown(generation);
        }

        Transition {
            from,
            to,
            generation,
            reason,
        }
    }

    /// Logs a transition and runs sinks and hooks, which may call back into the breaker.
    fn announce(&self, transition: &Transition) {
        tracing::info!(
            from = transition.from.as_str(),
            to = transition.to.as_str(),
            generation = transition.generation,
            reason = transition.reason,
            "circuit breaker state changed"
        );
        self.metric_sink
            .record_state_transition(transition.from, transition.to);
        self.hooks.execute_state_transition_hook(transition.to);
    }

    fn arm_cooldown(&self, generation: u64) -> Option<TimerHandle> {
        if self.stopped.load(Ordering::Acquire) {
            tracing::debug!(generation, "breaker stopped, cooldown not armed");
            return None;
        }

        let weak = self.self_ref.clone();
        let timeout = self.timeout();
        tracing::trace!(
            generation,
            timeout_ms = timeout.as_millis() as u64,
            "arming cooldown timer"
        );

        Some(self.clock.schedule(
            timeout,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.transition_from(
                    State::Open,
                    generation,
                    State::HalfOpen,
                    "cooldown elapsed",
                );
                }
            }),
        ))
    }
}

impl Admission {
    fn into_slot<E>(self) -> Result<ProbeSlot, BreakerError<E>> {
        if self.allowed {
            Ok(ProbeSlot(self.probe))
        } else {
            Err(BreakerError::rejected_in(self.state))
        }
    }
}

impl<E> Drop for BreakerInner<E> {
    fn drop(&mut self) {
        if let Some(timer) = self.control.get_mut().cooldown.take() {
            timer.cancel();
        }
    }
}

// Allow cloning of circuit breakers - cheap because inner state is Arc'd
impl<E> Clone for CircuitBreaker<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: 'static> std::fmt::Debug for CircuitBreaker<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &self.state())
            .field("failure_threshold", &self.inner.failure_threshold)
            .field("success_threshold", &self.inner.success_threshold)
            .field("timeout", &self.timeout())
            .finish_non_exhaustive()
    }
}

fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

// Implement Async support when the feature is enabled
#[cfg(feature = "async")]
impl<E: 'static> CircuitBreaker<E> {
    /// Executes an async function wrapped by the circuit breaker.
    #[cfg_attr(docsrs, doc(cfg(feature = "async")))]
    pub async fn call_async<F, Fut, T>(&self, f: F) -> BreakerResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let slot = self.inner.admit().into_slot()?;

        let start = Instant::now();
        let result = f().await;
        self.inner.record_result(&result, start.elapsed());
        drop(slot);

        result.map_err(BreakerError::Operation)
    }
}
