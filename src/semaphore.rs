//! Non-blocking counting semaphore for half-open probes.

use std::sync::atomic::{AtomicU32, Ordering};

/// Bounds the number of in-flight probes while half-open.
///
/// Acquisition never waits: it either takes a slot immediately or fails. A
/// fresh semaphore is installed on every half-open entry, so slots held by
/// probes from an earlier episode never count against the new one.
#[derive(Debug)]
pub(crate) struct ProbeSemaphore {
    capacity: u32,
    in_flight: AtomicU32,
}

impl ProbeSemaphore {
    pub(crate) fn new(capacity: u32) -> Self {
        Self {
            capacity,
            in_flight: AtomicU32::new(0),
        }
    }

    /// Takes a slot if one is free.
    pub(crate) fn try_acquire(&self) -> bool {
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                (held < self.capacity).then_some(held + 1)
            })
            .is_ok()
    }

    /// Frees a slot. Returns `false` if no slot was held.
    pub(crate) fn release(&self) -> bool {
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                held.checked_sub(1)
            })
            .is_ok()
    }

    pub(crate) fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn acquire_up_to_capacity() {
        let semaphore = ProbeSemaphore::new(2);
        assert!(semaphore.try_acquire());
        assert!(semaphore.try_acquire());
        assert!(!semaphore.try_acquire());
        assert_eq!(semaphore.in_flight(), 2);

        assert!(semaphore.release());
        assert!(semaphore.try_acquire());
    }

    #[test]
    fn release_without_acquire_is_noop() {
        let semaphore = ProbeSemaphore::new(1);
        assert!(!semaphore.release());
        assert_eq!(semaphore.in_flight(), 0);
        assert!(semaphore.try_acquire());
        assert!(!semaphore.try_acquire());
    }

    #[test]
    fn concurrent_acquire_never_exceeds_capacity() {
        const THREADS: usize = 16;
        let semaphore = Arc::new(ProbeSemaphore::new(3));
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let semaphore = Arc::clone(&semaphore);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    semaphore.try_acquire()
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|admitted| *admitted)
            .count();

        assert_eq!(admitted, 3);
        assert_eq!(semaphore.in_flight(), 3);
    }
}
