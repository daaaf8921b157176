//! Definition of the background engine that reclaims dead segments.

use crate::Segment;
use crate::buffer::Shared;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Number of contiguous segments one sweep worker owns.
pub(crate) const REGION_SIZE: usize = 64;

pub(crate) enum Command {
    Shutdown,
}

/// Handle to the engine thread, owned by the buffer.
pub(crate) struct PrunerHandle {
    tx: Sender<Command>,
    thread: JoinHandle<()>,
}

impl PrunerHandle {
    /// Stop the engine and wait for it to exit.
    pub(crate) fn stop(self) {
        let _ = self.tx.send(Command::Shutdown);
        if self.thread.join().is_err() {
            warn!("pruner engine panicked before shutdown");
        }
    }
}

/// Spawn the engine thread for a buffer.
///
/// # Arguments
///
/// * `shared` - The buffer state to sweep.
/// * `interval` - Time between two sweeps.
pub(crate) fn spawn<T: 'static>(shared: Arc<Shared<T>>, interval: Duration) -> PrunerHandle {
    let (tx, rx) = bounded(1);
    let thread = thread::Builder::new()
        .name("slipstream-pruner".to_string())
        .spawn(move || engine_loop(shared, rx, interval))
        .expect("Cannot spawn the pruner engine thread");

    PrunerHandle { tx, thread }
}

/// Number of sweep workers for a segment list of the given length: one per
/// region of [`REGION_SIZE`] contiguous segments.
pub(crate) fn worker_count(segments: usize) -> usize {
    segments.div_ceil(REGION_SIZE)
}

fn engine_loop<T>(shared: Arc<Shared<T>>, rx: Receiver<Command>, interval: Duration) {
    let mut workers = 0usize;
    loop {
        match rx.recv_timeout(interval) {
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => workers = sweep(&shared, workers),
        }
    }
}

/// One pass over the segment list. Returns the worker count used, so the
/// next pass can report growth or shrinkage.
fn sweep<T>(shared: &Shared<T>, previous_workers: usize) -> usize {
    // Snapshot the list. Segments cannot disappear underneath the workers:
    // only this thread unlinks, and the snapshot holds strong references.
    let snapshot: Vec<Arc<Segment<T>>> = shared.segments.read().clone();
    let len = snapshot.len();

    let workers = worker_count(len);
    if workers != previous_workers {
        debug!(
            segments = len,
            was = previous_workers,
            now = workers,
            "adjusted sweep worker count"
        );
    }
    if len == 0 {
        return workers;
    }

    // Each worker scans its own contiguous region and nominates segments
    // with an empty roster and no operation in flight.
    let eligible: Vec<Arc<Segment<T>>> = thread::scope(|scope| {
        let handles: Vec<_> = snapshot
            .chunks(REGION_SIZE)
            .map(|region| {
                scope.spawn(move || {
                    region
                        .iter()
                        .filter(|segment| segment.roster_len() == 0 && !segment.in_use())
                        .map(Arc::clone)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut eligible = Vec::new();
        for handle in handles {
            match handle.join() {
                Ok(found) => eligible.extend(found),
                // The region is skipped this pass and retried on the next.
                Err(_) => warn!("sweep worker panicked, skipping its region"),
            }
        }
        eligible
    });

    if !eligible.is_empty() {
        let mut list = shared.segments.write();
        let before = list.len();

        // Recheck under the list lock: an attach may have claimed the
        // segment after the worker looked at it.
        list.retain(|segment| {
            !(eligible.iter().any(|e| Arc::ptr_eq(e, segment))
                && segment.roster_len() == 0
                && !segment.in_use())
        });

        let removed = before - list.len();
        if removed > 0 {
            shared.prune_epoch.fetch_add(1, Ordering::Release);
            debug!(removed, remaining = list.len(), "pruned segments");
        }
    }

    workers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_tracks_region_boundaries() {
        assert_eq!(worker_count(0), 0);
        assert_eq!(worker_count(1), 1);
        assert_eq!(worker_count(REGION_SIZE), 1);
        assert_eq!(worker_count(REGION_SIZE + 1), 2);
        assert_eq!(worker_count(10 * REGION_SIZE), 10);
    }

    #[test]
    fn worker_count_is_monotone() {
        let mut previous = 0;
        for segments in 0..=(4 * REGION_SIZE) {
            let workers = worker_count(segments);
            assert!(workers >= previous);
            previous = workers;
        }
    }
}
