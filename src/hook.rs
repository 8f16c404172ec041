//! Hook registry for circuit breaker events.

use crate::state::State;
use parking_lot::RwLock;
use std::sync::Arc;

type HookFn = Arc<dyn Fn() + Send + Sync + 'static>;
type RejectHookFn = Arc<dyn Fn(State) + Send + Sync + 'static>;

/// A registry for circuit breaker event hooks.
///
/// Hooks are cloned out of their slot before they run, so a hook may replace
/// hooks or call back into the breaker without deadlocking. Transition hooks
/// run after the breaker has released its transition lock.
pub struct HookRegistry {
    on_open: RwLock<Option<HookFn>>,
    on_close: RwLock<Option<HookFn>>,
    on_half_open: RwLock<Option<HookFn>>,
    on_success: RwLock<Option<HookFn>>,
    on_failure: RwLock<Option<HookFn>>,
    on_rejected: RwLock<Option<RejectHookFn>>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRegistry {
    /// Creates a new empty hook registry.
    pub fn new() -> Self {
        Self {
            on_open: RwLock::new(None),
            on_close: RwLock::new(None),
            on_half_open: RwLock::new(None),
            on_success: RwLock::new(None),
            on_failure: RwLock::new(None),
            on_rejected: RwLock::new(None),
        }
    }

    /// Sets the hook to call when the circuit breaker opens.
    pub fn set_on_open<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_open.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when the circuit breaker closes.
    pub fn set_on_close<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_close.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when the circuit breaker half-opens.
    pub fn set_on_half_open<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_half_open.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when a success is reported.
    pub fn set_on_success<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_success.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when a failure is reported.
    pub fn set_on_failure<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_failure.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when a request is rejected, with the state that rejected it.
    pub fn set_on_rejected<F>(&self, f: F)
    where
        F: Fn(State) + Send + Sync + 'static,
    {
        *self.on_rejected.write() = Some(Arc::new(f));
    }

    /// Executes the appropriate hook for a state transition.
    pub fn execute_state_transition_hook(&self, to: State) {
        let slot = match to {
            State::Open => &self.on_open,
            State::Closed => &self.on_close,
            State::HalfOpen => &self.on_half_open,
        };
        Self::run(slot);
    }

    /// Executes the success hook.
    pub fn execute_success_hook(&self) {
        Self::run(&self.on_success);
    }

    /// Executes the failure hook.
    pub fn execute_failure_hook(&self) {
        Self::run(&self.on_failure);
    }

    /// Executes the rejection hook.
    pub fn execute_rejected_hook(&self, state: State) {
        let hook = self.on_rejected.read().clone();
        if let Some(hook) = hook {
            hook(state);
        }
    }

    fn run(slot: &RwLock<Option<HookFn>>) {
        let hook = slot.read().clone();
        if let Some(hook) = hook {
            hook();
        }
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("on_open", &self.on_open.read().is_some())
            .field("on_close", &self.on_close.read().is_some())
            .field("on_half_open", &self.on_half_open.read().is_some())
            .field("on_success", &self.on_success.read().is_some())
            .field("on_failure", &self.on_failure.read().is_some())
            .field("on_rejected", &self.on_rejected.read().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn transition_hooks_dispatch_by_target_state() {
        let hooks = HookRegistry::new();
        let opened = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&opened);
        hooks.set_on_open(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&closed);
        hooks.set_on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        hooks.execute_state_transition_hook(State::Open);
        hooks.execute_state_transition_hook(State::Open);
        hooks.execute_state_transition_hook(State::Closed);
        // No half-open hook registered.
        hooks.execute_state_transition_hook(State::HalfOpen);

        assert_eq!(opened.load(Ordering::SeqCst), 2);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn hook_may_replace_itself() {
        let hooks = Arc::new(HookRegistry::new());
        let inner = Arc::clone(&hooks);
        hooks.set_on_failure(move || inner.set_on_failure(|| {}));

        hooks.execute_failure_hook();
        hooks.execute_failure_hook();
    }

    #[test]
    fn rejected_hook_receives_state() {
        let hooks = HookRegistry::new();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        hooks.set_on_rejected(move |state| sink.lock().push(state));

        hooks.execute_rejected_hook(State::Open);
        hooks.execute_rejected_hook(State::HalfOpen);

        assert_eq!(*seen.lock(), vec![State::Open, State::HalfOpen]);
    }
}
