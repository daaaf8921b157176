//! Definition of tuning options for a stream buffer.

use std::time::Duration;

/// Default number of record slots in a freshly allocated segment.
pub const DEFAULT_SEGMENT_CAPACITY: usize = 1024;

/// Default time between two pruner sweeps.
pub const DEFAULT_PRUNE_INTERVAL: Duration = Duration::from_millis(2000);

/// Options for tuning a stream buffer's behavior.
///
/// # Segment capacity
///
/// The number of record slots in every segment the buffer allocates on its
/// own. Defaults to 1024. A writer fills its current segment completely
/// before a successor of the same capacity is opened, so larger segments
/// trade memory granularity for fewer allocations.
///
/// # Prune interval
///
/// The time the background pruner sleeps between sweeps. Defaults to
/// 2000 ms. Fully released segments live at most around two intervals
/// before they are reclaimed.
#[derive(Copy, Clone, Debug)]
#[non_exhaustive]
pub struct BufOptions {
    pub segment_capacity: usize,
    pub prune_interval: Duration,
}

impl Default for BufOptions {
    fn default() -> Self {
        Self {
            segment_capacity: DEFAULT_SEGMENT_CAPACITY,
            prune_interval: DEFAULT_PRUNE_INTERVAL,
        }
    }
}

impl BufOptions {
    /// Returns the per-segment slot capacity.
    pub fn segment_capacity(&self) -> usize {
        self.segment_capacity
    }

    /// Returns the pruner sweep interval.
    pub fn prune_interval(&self) -> Duration {
        self.prune_interval
    }

    /// Sets the per-segment slot capacity.
    pub fn set_segment_capacity(mut self, value: usize) -> Self {
        self.segment_capacity = value;
        self
    }

    /// Sets the pruner sweep interval.
    pub fn set_prune_interval(mut self, value: Duration) -> Self {
        self.prune_interval = value;
        self
    }
}
