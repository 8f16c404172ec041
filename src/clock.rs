//! Time sources and one-shot cancellable timers.
//!
//! The breaker never sleeps on the caller's thread. When it opens, it asks its
//! [`Clock`] to run a callback once the cooldown has elapsed and keeps the
//! returned [`TimerHandle`] so the callback can be cancelled by `stop`, `reset`
//! or a forced transition.
//!
//! - [`SystemClock`] runs each timer on a short-lived background thread.
//! - [`ManualClock`] only moves when told to, and fires due timers inline from
//!   [`ManualClock::advance`]. Use it for deterministic tests.
//! - `TokioClock` (feature `async`) runs timers as tokio tasks that stop on a
//!   `CancellationToken`.

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// A deferred callback run by a timer.
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// A source of time that can also schedule one-shot callbacks.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current instant according to this clock.
    fn now(&self) -> Instant;

    /// Runs `task` once, after `delay` has elapsed on this clock, unless the
    /// returned handle is cancelled first.
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle;
}

struct TimerSignal {
    cancelled: Mutex<bool>,
    wake: Condvar,
    #[cfg(feature = "async")]
    token: tokio_util::sync::CancellationToken,
}

impl TimerSignal {
    fn is_cancelled(&self) -> bool {
        *self.cancelled.lock()
    }
}

/// Handle to a scheduled timer.
#[derive(Clone)]
pub struct TimerHandle {
    signal: Arc<TimerSignal>,
}

impl TimerHandle {
    fn new() -> Self {
        Self {
            signal: Arc::new(TimerSignal {
                cancelled: Mutex::new(false),
                wake: Condvar::new(),
                #[cfg(feature = "async")]
                token: tokio_util::sync::CancellationToken::new(),
            }),
        }
    }

    /// Cancels the timer and wakes whatever is waiting on it.
    ///
    /// Returns `false` if the timer had already been cancelled. Cancelling a
    /// timer that already fired is a no-op.
    pub fn cancel(&self) -> bool {
        let mut cancelled = self.signal.cancelled.lock();
        let first = !*cancelled;
        *cancelled = true;
        self.signal.wake.notify_all();
        #[cfg(feature = "async")]
        self.signal.token.cancel();
        first
    }

    /// True once [`TimerHandle::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

static SYSTEM_CLOCK: Lazy<Arc<SystemClock>> = Lazy::new(|| Arc::new(SystemClock));

/// Wall clock. Timers run on a dedicated thread that exits on fire or cancel.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Shared instance used by breakers that are not given a clock.
    pub fn shared() -> Arc<dyn Clock> {
        SYSTEM_CLOCK.clone()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let handle = TimerHandle::new();
        spawn_thread_timer(delay, task, Arc::clone(&handle.signal));
        handle
    }
}

fn spawn_thread_timer(delay: Duration, task: TimerTask, signal: Arc<TimerSignal>) {
    let deadline = Instant::now() + delay;
    let spawned = thread::Builder::new()
        .name("circuit-gate-timer".into())
        .spawn(move || {
            let mut cancelled = signal.cancelled.lock();
            while !*cancelled {
                if signal.wake.wait_until(&mut cancelled, deadline).timed_out() {
                    break;
                }
            }
            if *cancelled {
                return;
            }
            drop(cancelled);
            task();
        });

    if let Err(err) = spawned {
        tracing::error!(error = %err, "failed to spawn cooldown timer thread");
    }
}

struct PendingTimer {
    deadline: Duration,
    seq: u64,
    signal: Arc<TimerSignal>,
    task: TimerTask,
}

struct ManualInner {
    origin: Instant,
    elapsed: Mutex<Duration>,
    pending: Mutex<SmallVec<[PendingTimer; 4]>>,
    next_seq: AtomicU64,
}

/// A clock that only moves when [`ManualClock::advance`] is called.
///
/// Clones share the same time line and timer queue.
#[derive(Clone)]
pub struct ManualClock {
    inner: Arc<ManualInner>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Creates a manual clock anchored at the current instant.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ManualInner {
                origin: Instant::now(),
                elapsed: Mutex::new(Duration::ZERO),
                pending: Mutex::new(SmallVec::new()),
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Total time this clock has been advanced by.
    pub fn elapsed(&self) -> Duration {
        *self.inner.elapsed.lock()
    }

    /// Number of scheduled timers that have neither fired nor been cancelled.
    pub fn pending_timers(&self) -> usize {
        self.inner
            .pending
            .lock()
            .iter()
            .filter(|timer| !timer.signal.is_cancelled())
            .count()
    }

    /// Moves time forward by `by` and fires every due timer in deadline order.
    ///
    /// Timers run on the calling thread after the queue lock is released, so
    /// a task may schedule further timers.
    pub fn advance(&self, by: Duration) {
        let now = {
            let mut elapsed = self.inner.elapsed.lock();
            *elapsed += by;
            *elapsed
        };

        while let Some(timer) = self.pop_due(now) {
            if !timer.signal.is_cancelled() {
                (timer.task)();
            }
        }
    }

    fn pop_due(&self, now: Duration) -> Option<PendingTimer> {
        let mut pending = self.inner.pending.lock();
        pending.retain(|timer| !timer.signal.is_cancelled());

        let index = pending
            .iter()
            .enumerate()
            .filter(|(_, timer)| timer.deadline <= now)
            .min_by_key(|(_, timer)| (timer.deadline, timer.seq))
            .map(|(index, _)| index)?;

        Some(pending.remove(index))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.inner.origin + self.elapsed()
    }

    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let handle = TimerHandle::new();
        let timer = PendingTimer {
            deadline: self.elapsed() + delay,
            seq: self.inner.next_seq.fetch_add(1, Ordering::Relaxed),
            signal: Arc::clone(&handle.signal),
            task,
        };
        self.inner.pending.lock().push(timer);
        handle
    }
}

impl std::fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualClock")
            .field("elapsed", &self.elapsed())
            .field("pending_timers", &self.pending_timers())
            .finish()
    }
}

#[cfg(feature = "async")]
pub use self::tokio_clock::TokioClock;

#[cfg(feature = "async")]
mod tokio_clock {
    use super::{spawn_thread_timer, Clock, TimerHandle, TimerTask};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    /// Clock backed by the tokio timer wheel.
    ///
    /// Honors `tokio::time::pause` and `advance` in tests. Outside a runtime
    /// it falls back to the thread timer used by [`super::SystemClock`].
    #[cfg_attr(docsrs, doc(cfg(feature = "async")))]
    #[derive(Debug, Clone, Copy, Default)]
    pub struct TokioClock;

    impl Clock for TokioClock {
        fn now(&self) -> Instant {
            tokio::time::Instant::now().into_std()
        }

        fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
            let handle = TimerHandle::new();
            let signal = Arc::clone(&handle.signal);

            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move {
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {
                                if !signal.is_cancelled() {
                                    task();
                                }
                            }
                            _ = signal.token.cancelled() => {}
                        }
                    });
                }
                Err(_) => spawn_thread_timer(delay, task, signal),
            }

            handle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    fn counter_task(counter: &Arc<AtomicUsize>) -> TimerTask {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn manual_clock_fires_only_when_due() {
        let clock = ManualClock::new();
        let fired = Arc::new(AtomicUsize::new(0));
        clock.schedule(Duration::from_millis(50), counter_task(&fired));

        clock.advance(Duration::from_millis(49));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(clock.pending_timers(), 1);

        clock.advance(Duration::from_millis(1));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(clock.pending_timers(), 0);

        clock.advance(Duration::from_secs(10));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn manual_clock_skips_cancelled_timers() {
        let clock = ManualClock::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let handle = clock.schedule(Duration::from_millis(10), counter_task(&fired));

        assert!(handle.cancel());
        assert!(!handle.cancel());
        clock.advance(Duration::from_millis(20));

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(clock.pending_timers(), 0);
    }

    #[test]
    fn manual_clock_fires_in_deadline_order() {
        let clock = ManualClock::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (label, delay) in [("late", 30u64), ("early", 10), ("middle", 20)] {
            let order = Arc::clone(&order);
            clock.schedule(
                Duration::from_millis(delay),
                Box::new(move || order.lock().push(label)),
            );
        }

        clock.advance(Duration::from_millis(30));
        assert_eq!(*order.lock(), vec!["early", "middle", "late"]);
    }

    #[test]
    fn manual_clock_now_tracks_advance() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.advance(Duration::from_secs(3));
        assert_eq!(clock.now() - start, Duration::from_secs(3));
    }

    #[test]
    fn system_clock_timer_fires() {
        let (tx, rx) = mpsc::channel();
        SystemClock.schedule(
            Duration::from_millis(10),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn system_clock_timer_can_be_cancelled() {
        let (tx, rx) = mpsc::channel();
        let handle = SystemClock.schedule(
            Duration::from_millis(50),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        handle.cancel();
        // The sender is dropped without sending once the thread exits.
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(5)),
            Err(mpsc::RecvTimeoutError::Disconnected)
        ));
    }

    #[cfg(feature = "async")]
    #[tokio::test(start_paused = true)]
    async fn tokio_clock_fires_unless_cancelled() {
        let fired = Arc::new(AtomicUsize::new(0));
        let kept = TokioClock.schedule(Duration::from_millis(50), counter_task(&fired));
        let cancelled = TokioClock.schedule(Duration::from_millis(50), counter_task(&fired));
        assert!(cancelled.cancel());

        tokio::time::advance(Duration::from_millis(60)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!kept.is_cancelled());
    }
}
