//! Circuit breaker state machine primitives.

use atomic::Atomic;
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

/// Represents the possible states of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum State {
    /// Circuit is closed and every request is admitted.
    Closed = 0,

    /// Circuit is open and every request is rejected until the cooldown elapses.
    Open = 1,

    /// Circuit is admitting a bounded number of probes to test recovery.
    HalfOpen = 2,
}

impl State {
    /// Stable lowercase name, used for log fields and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Closed => "closed",
            State::Open => "open",
            State::HalfOpen => "half-open",
        }
    }
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free holder of the current state and its generation.
///
/// Reads never block. [`StateCell::set`] must only be called while holding the
/// breaker's transition lock, so writers never race each other. The sequence
/// is odd while a write is in progress and `2 * generation` otherwise, which
/// lets [`StateCell::snapshot`] read the state and its generation as a pair.
pub(crate) struct StateCell {
    state: Atomic<State>,
    sequence: AtomicU64,
}

impl StateCell {
    /// Creates a cell in the closed state at generation zero.
    pub(crate) fn new() -> Self {
        Self {
            state: Atomic::new(State::Closed),
            sequence: AtomicU64::new(0),
        }
    }

    /// Gets the current state.
    pub(crate) fn current(&self) -> State {
        self.state.load(Ordering::Acquire)
    }

    /// Gets the number of transitions applied so far.
    pub(crate) fn generation(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst) / 2
    }

    /// Reads the state together with the generation it was stored under.
    pub(crate) fn snapshot(&self) -> (State, u64) {
        loop {
            let before = self.sequence.load(Ordering::SeqCst);
            let state = self.state.load(Ordering::SeqCst);
            let after = self.sequence.load(Ordering::SeqCst);
            if before == after && before % 2 == 0 {
                return (state, before / 2);
            }
            std::hint::spin_loop();
        }
    }

    /// Stores `to` and returns the generation it was stored under.
    pub(crate) fn set(&self, to: State) -> u64 {
        let writing = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.store(to, Ordering::SeqCst);
        self.sequence.store(writing + 1, Ordering::SeqCst);
        (writing + 1) / 2
    }

    /// True if the cell still holds `expected` at exactly `generation`.
    pub(crate) fn is_current(&self, expected: State, generation: u64) -> bool {
        self.snapshot() == (expected, generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_cell_is_lock_free() {
        assert!(Atomic::<State>::is_lock_free());
    }

    #[test]
    fn starts_closed_at_generation_zero() {
        let cell = StateCell::new();
        assert_eq!(cell.current(), State::Closed);
        assert_eq!(cell.generation(), 0);
    }

    #[test]
    fn set_bumps_generation() {
        let cell = StateCell::new();
        assert_eq!(cell.set(State::Open), 1);
        assert_eq!(cell.set(State::HalfOpen), 2);
        assert_eq!(cell.current(), State::HalfOpen);
        assert!(cell.is_current(State::HalfOpen, 2));
        assert!(!cell.is_current(State::HalfOpen, 1));
        assert!(!cell.is_current(State::Open, 2));
        assert_eq!(cell.snapshot(), (State::HalfOpen, 2));
    }

    #[test]
    fn snapshot_pairs_state_with_its_generation() {
        use std::sync::Arc;
        use std::thread;

        let cell = Arc::new(StateCell::new());
        let writer = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                for _ in 0..1_000 {
                    cell.set(State::Open);
                    cell.set(State::Closed);
                }
            })
        };

        // Odd generations are always open, even ones always closed.
        for _ in 0..10_000 {
            let (state, generation) = cell.snapshot();
            let expected = if generation % 2 == 1 {
                State::Open
            } else {
                State::Closed
            };
            assert_eq!(state, expected);
        }
        writer.join().unwrap();
    }

    #[test]
    fn labels() {
        assert_eq!(State::Closed.to_string(), "closed");
        assert_eq!(State::Open.as_str(), "open");
        assert_eq!(State::HalfOpen.to_string(), "half-open");
    }
}
