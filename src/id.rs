//! Definition of the per-buffer participant id service.

use crate::{Result, StreamError};
use std::sync::atomic::{AtomicU64, Ordering};

/// Issues monotonically increasing nonzero participant ids.
///
/// Each buffer owns its own service, so ids are unique within one buffer and
/// pairs used across different buffers cannot collide through a process-wide
/// counter. Id 0 is reserved to mean "not assigned yet".
#[derive(Debug)]
pub(crate) struct IdService {
    next: AtomicU64,
}

impl IdService {
    /// Create a service whose first issued id is 1.
    pub(crate) fn new() -> Self {
        Self::starting_at(1)
    }

    /// Create a service whose first issued id is `next`.
    ///
    /// # Arguments
    ///
    /// * `next` - The next id to issue; must be nonzero.
    pub(crate) fn starting_at(next: u64) -> Self {
        debug_assert!(next != 0, "id 0 is reserved for unassigned participants");
        Self {
            next: AtomicU64::new(next),
        }
    }

    /// Issue the next id.
    ///
    /// Once the counter reaches `u64::MAX` the service is exhausted for good
    /// and every further call returns [`StreamError::CapacityExhausted`].
    pub(crate) fn next(&self) -> Result<u64> {
        let mut current = self.next.load(Ordering::Relaxed);
        loop {
            // The last representable value is a sentinel, never issued.
            if current == u64::MAX {
                return Err(StreamError::CapacityExhausted);
            }
            match self.next.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(current),
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn ids_are_unique_and_nonzero() {
        let service = Arc::new(IdService::new());

        // Hammer the service from several threads at once.
        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = Arc::clone(&service);
            handles.push(std::thread::spawn(move || {
                (0..500).map(|_| service.next().unwrap()).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert_ne!(id, 0);
                assert!(seen.insert(id), "id {id} issued twice");
            }
        }
        assert_eq!(seen.len(), 8 * 500);
    }

    #[test]
    fn exhaustion_is_sticky() {
        let service = IdService::starting_at(u64::MAX - 1);

        assert_eq!(service.next().unwrap(), u64::MAX - 1);
        assert_eq!(service.next(), Err(StreamError::CapacityExhausted));
        assert_eq!(service.next(), Err(StreamError::CapacityExhausted));
    }
}
