//! Definition of the reusable buffer that batch reads drain into.

use crate::{Record, Result, Slab};

/// A reusable buffer for draining records out of a stream in bulk.
///
/// Allocates once and is refilled by
/// [`StreamBuf::read_batch`](crate::StreamBuf::read_batch); reusing one
/// batch across calls avoids a per-read allocation.
#[derive(Debug)]
pub struct Batch<T> {
    slab: Slab<T>,
    len: usize,
}

impl<T: Record + Copy> Batch<T> {
    /// Create a new batch buffer.
    ///
    /// # Panic
    ///
    /// * Panics if capacity == 0.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of records the batch can hold.
    pub fn new(capacity: usize) -> Result<Self> {
        assert!(capacity > 0, "Batch should have capacity > 0");
        Ok(Self {
            slab: Slab::alloc(capacity)?,
            len: 0,
        })
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.len
    }

    /// true if no records are held.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum number of records the batch can hold.
    pub fn capacity(&self) -> usize {
        self.slab.capacity()
    }

    /// Slice of the records drained into the batch.
    pub fn records(&self) -> &[T] {
        // Safety: Slots below `len` were filled by `push`.
        unsafe { self.slab.published(self.len) }
    }

    /// Remove all records.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Number of records that can be appended without overflow.
    pub(crate) fn remaining(&self) -> usize {
        self.capacity() - self.len
    }

    /// Append one record.
    ///
    /// # Invariants
    ///
    /// * self.remaining() > 0
    ///
    /// # Arguments
    ///
    /// * `record` - Record to append.
    pub(crate) fn push(&mut self, record: T) {
        debug_assert!(self.remaining() > 0);
        // Safety: `len` is in bounds and `&mut self` gives exclusivity.
        unsafe { self.slab.write(self.len, &record) };
        self.len += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPACITY: usize = 64;

    #[test]
    fn state_machine() {
        let mut batch = Batch::new(CAPACITY).unwrap();
        assert_eq!(batch.capacity(), CAPACITY);

        let records: Vec<u64> = (1..=CAPACITY as u64).collect();
        for round in 0..3u64 {
            // Clear state for a new fill cycle.
            batch.clear();
            assert!(batch.is_empty());
            assert_eq!(batch.remaining(), CAPACITY);
            assert_eq!(batch.records(), &[]);

            // Fill to capacity one record at a time.
            for (i, record) in records.iter().enumerate() {
                batch.push(record + round);
                assert_eq!(batch.len(), i + 1);
            }
            assert_eq!(batch.remaining(), 0);

            let expected: Vec<u64> = records.iter().map(|r| r + round).collect();
            assert_eq!(batch.records(), expected.as_slice());
        }
    }

    #[test]
    #[should_panic]
    fn zero_capacity_panic() {
        let _ = Batch::<u64>::new(0);
    }
}
