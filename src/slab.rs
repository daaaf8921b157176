//! Definition of the raw slot storage that backs a segment.

use crate::{Record, Result, StreamError};
use std::{
    alloc::{Layout, alloc, dealloc},
    marker::PhantomData,
    ptr::NonNull,
    slice::{from_raw_parts, from_raw_parts_mut},
};

// Safety: The raw pointer is only dereferenced through the slot accessors,
// whose callers must provide the synchronization described on each method.
unsafe impl<T> Send for Slab<T> {}
unsafe impl<T> Sync for Slab<T> {}

/// A fixed capacity array of record slots on raw heap memory.
///
/// The slab itself tracks no occupancy; the owning segment publishes a write
/// frontier and slots below it are considered initialized. All slot accessors
/// are unsafe for that reason. Memory is addressed at `slot * T::size()` and
/// aligned for `T`, so offsets stay aligned for any record size.
///
/// Uses the RAII pattern to free memory when the slab goes out of scope.
pub(crate) struct Slab<T> {
    cap: usize,
    layout: Layout,
    ptr: NonNull<u8>,
    phantom: PhantomData<T>,
}

impl<T: Record> Slab<T> {
    /// Allocate a slab able to hold `cap` records.
    ///
    /// Returns [`StreamError::AllocationFailed`] when the layout is invalid
    /// or the allocator reports failure, rather than aborting the process.
    ///
    /// # Panic
    ///
    /// * Panics if cap == 0.
    /// * Panics for zero sized record types.
    ///
    /// # Arguments
    ///
    /// * `cap` - Maximum number of records the slab can hold.
    pub(crate) fn alloc(cap: usize) -> Result<Self> {
        assert!(cap > 0, "Slab must hold at least 1 record");
        assert!(T::size() > 0, "Zero sized records are not supported");

        // Layout that describes the allocation requirements. The record size
        // governs the stride, the record type governs the alignment.
        let bytes = cap
            .checked_mul(T::size())
            .ok_or(StreamError::AllocationFailed(usize::MAX))?;
        let layout = Layout::from_size_align(bytes, align_of::<T>())
            .map_err(|_| StreamError::AllocationFailed(bytes))?;

        // Safety: Layout has been validated and has a nonzero size.
        let ptr = NonNull::new(unsafe { alloc(layout) })
            .ok_or(StreamError::AllocationFailed(bytes))?;

        Ok(Self {
            cap,
            layout,
            ptr,
            phantom: PhantomData,
        })
    }

    /// Copy a record into a slot.
    ///
    /// # Safety
    ///
    /// * `slot` must be < capacity.
    /// * The caller must hold exclusive write access to the slot; here that
    ///   means the owning segment's writer entry mutex.
    ///
    /// # Arguments
    ///
    /// * `slot` - Index of the slot to write.
    /// * `record` - Record to copy in.
    #[inline]
    pub(crate) unsafe fn write(&self, slot: usize, record: &T) {
        let src = T::to_bytes(record);

        // Safety: Slot bounds and exclusivity are upheld by the caller.
        // Source and destination are separate allocations, so memcpy is fine.
        unsafe {
            let dst = self.ptr.as_ptr().add(slot * T::size());
            std::ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len());
        }
    }

    /// Copy a record out of a slot.
    ///
    /// # Safety
    ///
    /// * `slot` must be below the published write frontier, i.e. the slot
    ///   holds a fully written record.
    ///
    /// # Arguments
    ///
    /// * `slot` - Index of the slot to read.
    #[inline]
    pub(crate) unsafe fn read(&self, slot: usize) -> T
    where
        T: Copy,
    {
        // Safety: The slot is initialized and nobody writes below the
        // frontier, so a shared view of these bytes is valid.
        unsafe {
            let ptr = self.ptr.as_ptr().add(slot * T::size());
            *T::from_bytes(from_raw_parts(ptr, T::size()))
        }
    }

    /// View the first `len` slots as a record slice.
    ///
    /// # Safety
    ///
    /// * `len` must be below or at the published write frontier.
    #[inline]
    pub(crate) unsafe fn published(&self, len: usize) -> &[T] {
        // Safety: All slots below the frontier hold fully written records.
        unsafe { T::from_bytes_slice(from_raw_parts(self.ptr.as_ptr(), len * T::size())) }
    }

    /// View the unwritten tail starting at `from` as raw bytes.
    ///
    /// # Safety
    ///
    /// * `from` must be at or above the write frontier and <= capacity.
    /// * The caller must hold exclusive write access to the tail for the
    ///   lifetime of the returned slice.
    #[inline]
    pub(crate) unsafe fn tail_mut(&self, from: usize) -> &mut [u8] {
        // Safety: Exclusivity over the tail region is upheld by the caller;
        // readers never look at slots at or above the frontier.
        unsafe {
            let ptr = self.ptr.as_ptr().add(from * T::size());
            from_raw_parts_mut(ptr, (self.cap - from) * T::size())
        }
    }
}

impl<T> Slab<T> {
    /// Maximum number of records the slab can hold.
    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.cap
    }
}

impl<T> std::fmt::Debug for Slab<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slab")
            .field("capacity", &self.cap)
            .finish_non_exhaustive()
    }
}

impl<T> Drop for Slab<T> {
    #[inline]
    fn drop(&mut self) {
        // Safety: Cannot construct a slab with an invalid pointer or layout.
        unsafe {
            dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}
