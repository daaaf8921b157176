//! Definition of a segment, the unit of allocation and pruning.

use crate::{Participant, Record, Result, Slab, StreamError};
use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

/// Diagnostic snapshot of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Slot capacity of the segment.
    pub capacity: usize,
    /// Write frontier; slots below it are published.
    pub len: usize,
    /// Number of participants in the roster.
    pub roster: usize,
    /// Advisory flag: a write was in progress at snapshot time.
    pub writing: bool,
    /// Advisory flag: a read was in progress at snapshot time.
    pub reading: bool,
}

impl SegmentInfo {
    /// true if either advisory flag was set at snapshot time.
    pub fn in_use(&self) -> bool {
        self.reading || self.writing
    }
}

/// A fixed capacity slab of record slots plus the state that binds
/// participants to it.
///
/// A segment accepts writes from exactly one participant, the designated
/// writer fixed at creation, and serializes them through the writer entry
/// mutex. Reads of published slots never contend: the write frontier is
/// stored with Release ordering and observed with Acquire ordering, so a
/// reader that sees `slot < len()` also sees the record bytes. Reader
/// cursors are private to each participant; the reader entry mutex only
/// serializes cursor bookkeeping when a reader crosses out of the segment.
///
/// Segments progress `EMPTY -> FILLING -> FULL` and never shrink. Once
/// full, the buffer opens a successor segment for the writer.
pub(crate) struct Segment<T> {
    slab: Slab<T>,

    // Write frontier `w`. Published with Release, observed with Acquire.
    frontier: AtomicUsize,

    // Id of the designated writer, fixed at creation; 0 when the segment
    // was created for a participant without write access.
    writer_id: u64,

    // Participants claiming this segment, in claim order. The roster holds
    // strong references; participants refer back only by list position.
    roster: Mutex<Vec<Arc<Participant>>>,

    // Advisory liveness flags for the pruner and diagnostics.
    in_write: AtomicBool,
    in_read: AtomicBool,

    write_gate: Mutex<()>,
    read_gate: Mutex<()>,
}

impl<T: Record> Segment<T> {
    /// Allocate an empty segment.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of record slots.
    /// * `writer_id` - Id of the designated writer, or 0 for none.
    pub(crate) fn new(capacity: usize, writer_id: u64) -> Result<Self> {
        Ok(Self {
            slab: Slab::alloc(capacity)?,
            frontier: AtomicUsize::new(0),
            writer_id,
            roster: Mutex::new(Vec::new()),
            in_write: AtomicBool::new(false),
            in_read: AtomicBool::new(false),
            write_gate: Mutex::new(()),
            read_gate: Mutex::new(()),
        })
    }

    /// Append one record, if there is room.
    ///
    /// Returns false when the segment is full. Only the designated writer
    /// may call this, which the buffer enforces before routing here.
    ///
    /// # Arguments
    ///
    /// * `record` - Record to append.
    pub(crate) fn push(&self, record: T) -> bool {
        let _gate = self.write_gate.lock();

        let w = self.frontier.load(Ordering::Relaxed);
        if w >= self.slab.capacity() {
            return false;
        }

        self.in_write.store(true, Ordering::Relaxed);
        // Safety: `w` is in bounds and the writer gate is held.
        unsafe { self.slab.write(w, &record) };
        // Publish the slot; readers that observe the new frontier also
        // observe the record bytes.
        self.frontier.store(w + 1, Ordering::Release);
        self.in_write.store(false, Ordering::Relaxed);

        true
    }

    /// Copy out the record in `slot`, if it has been published.
    ///
    /// # Arguments
    ///
    /// * `slot` - Slot index to read.
    pub(crate) fn get(&self, slot: usize) -> Option<T>
    where
        T: Copy,
    {
        if slot >= self.frontier.load(Ordering::Acquire) {
            return None;
        }

        self.in_read.store(true, Ordering::Relaxed);
        // Safety: The slot is below the published frontier.
        let record = unsafe { self.slab.read(slot) };
        self.in_read.store(false, Ordering::Relaxed);

        Some(record)
    }

    /// View the unwritten tail as raw bytes, for external batch writers.
    ///
    /// # Safety
    ///
    /// The caller must hold the write reservation (see
    /// [`Segment::begin_write_hold`]) for the lifetime of the slice.
    pub(crate) unsafe fn tail_bytes(&self) -> &mut [u8] {
        let w = self.frontier.load(Ordering::Relaxed);
        // Safety: `w` never exceeds capacity; exclusivity is upheld by the
        // write reservation held by the caller.
        unsafe { self.slab.tail_mut(w) }
    }
}

impl<T> Segment<T> {
    /// Slot capacity of the segment.
    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.slab.capacity()
    }

    /// Write frontier; slots below it are published.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.frontier.load(Ordering::Acquire)
    }

    /// true if every slot has been written.
    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// true if the segment can accept a write right now: nobody is writing
    /// and the frontier has not exhausted the slots.
    pub(crate) fn writable(&self) -> bool {
        let w = self.len();
        !self.in_write.load(Ordering::Relaxed) && (w == 0 || w < self.capacity())
    }

    /// true if a read or write is in flight, advisory.
    pub(crate) fn in_use(&self) -> bool {
        self.in_read.load(Ordering::Relaxed) || self.in_write.load(Ordering::Relaxed)
    }

    /// true if a read is in flight, advisory.
    pub(crate) fn is_reading(&self) -> bool {
        self.in_read.load(Ordering::Relaxed)
    }

    /// true if a write is in flight, advisory.
    pub(crate) fn is_writing(&self) -> bool {
        self.in_write.load(Ordering::Relaxed)
    }

    /// Id of the designated writer, or 0 for none.
    #[inline]
    pub(crate) fn writer_id(&self) -> u64 {
        self.writer_id
    }

    /// Add a participant to the roster.
    ///
    /// Increments the participant's reference count under the roster mutex.
    ///
    /// # Arguments
    ///
    /// * `participant` - Participant to add; must have an assigned id.
    pub(crate) fn claim(&self, participant: &Arc<Participant>) -> Result<()> {
        // An unassigned participant may not appear in any roster.
        if !participant.has_id() {
            return Err(StreamError::InvalidParticipant);
        }

        let mut roster = self.roster.lock();
        if roster
            .iter()
            .any(|member| Participant::same_participant(member, participant))
        {
            return Err(StreamError::AlreadyClaimed(participant.id()));
        }

        roster.push(Arc::clone(participant));
        participant.incr_ref();
        Ok(())
    }

    /// Remove a participant from the roster, decrementing its reference
    /// count. Returns the remaining reference count, or `None` if the
    /// participant was not in the roster.
    ///
    /// The caller is responsible for quiescing the participant's in-flight
    /// operation first, by holding its execution slot.
    ///
    /// # Arguments
    ///
    /// * `participant` - Participant to remove.
    pub(crate) fn release(&self, participant: &Participant) -> Option<usize> {
        let mut roster = self.roster.lock();
        let before = roster.len();
        roster.retain(|member| !Participant::same_participant(member, participant));

        if roster.len() < before {
            Some(participant.decr_ref())
        } else {
            None
        }
    }

    /// Remove every participant from the roster, decrementing each
    /// reference count. Used at buffer teardown.
    pub(crate) fn clear_roster(&self) {
        let mut roster = self.roster.lock();
        for member in roster.drain(..) {
            member.decr_ref();
        }
    }

    /// true if a participant with this id is in the roster.
    ///
    /// # Arguments
    ///
    /// * `id` - Participant id to look for.
    pub(crate) fn contains(&self, id: u64) -> bool {
        id != 0 && self.roster.lock().iter().any(|member| member.id() == id)
    }

    /// Number of participants in the roster.
    pub(crate) fn roster_len(&self) -> usize {
        self.roster.lock().len()
    }

    /// Copy of the roster, in claim order.
    pub(crate) fn roster_snapshot(&self) -> Vec<Arc<Participant>> {
        self.roster.lock().clone()
    }

    /// Reserve the segment for an external tail write. Returns false when a
    /// write or another reservation is already in flight.
    pub(crate) fn begin_write_hold(&self) -> bool {
        self.in_write
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Drop the reservation taken by [`Segment::begin_write_hold`].
    pub(crate) fn end_write_hold(&self) {
        self.in_write.store(false, Ordering::Release);
    }

    /// Publish `count` externally written slots.
    ///
    /// # Panic
    ///
    /// Panics if the new frontier would exceed the capacity.
    ///
    /// # Arguments
    ///
    /// * `count` - Number of slots to publish.
    pub(crate) fn advance_frontier(&self, count: usize) {
        let w = self.frontier.load(Ordering::Relaxed);
        assert!(
            w + count <= self.capacity(),
            "Cannot publish past the segment capacity"
        );
        self.frontier.store(w + count, Ordering::Release);
    }

    /// The reader entry mutex, serializing cursor bookkeeping.
    pub(crate) fn read_gate(&self) -> &Mutex<()> {
        &self.read_gate
    }

    /// Diagnostic snapshot.
    pub(crate) fn info(&self) -> SegmentInfo {
        SegmentInfo {
            capacity: self.capacity(),
            len: self.len(),
            roster: self.roster_len(),
            writing: self.is_writing(),
            reading: self.is_reading(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Access;

    fn assigned(access: Access, id: u64) -> Arc<Participant> {
        let p = Participant::new(access);
        p.assign_id(id);
        p
    }

    #[test]
    fn fills_then_rejects() {
        let seg = Segment::<u64>::new(4, 1).unwrap();
        assert_eq!(seg.len(), 0);
        assert!(seg.writable());
        assert!(!seg.is_full());

        // EMPTY -> FILLING -> FULL.
        for value in 0..4u64 {
            assert!(seg.push(value));
            assert_eq!(seg.len(), value as usize + 1);
        }
        assert!(seg.is_full());
        assert!(!seg.writable());
        assert!(!seg.push(99));
        assert_eq!(seg.len(), 4);
    }

    #[test]
    fn reads_only_published_slots() {
        let seg = Segment::<u64>::new(4, 1).unwrap();
        assert_eq!(seg.get(0), None);

        seg.push(41);
        seg.push(42);
        assert_eq!(seg.get(0), Some(41));
        assert_eq!(seg.get(1), Some(42));
        assert_eq!(seg.get(2), None);
        assert_eq!(seg.get(3), None);
    }

    #[test]
    fn claim_tracks_reference_counts() {
        let seg = Segment::<u64>::new(4, 1).unwrap();
        let writer = assigned(Access::Write, 1);
        let reader = assigned(Access::Read, 2);

        seg.claim(&writer).unwrap();
        seg.claim(&reader).unwrap();
        assert_eq!(writer.ref_count(), 1);
        assert_eq!(reader.ref_count(), 1);
        assert_eq!(seg.roster_len(), 2);
        assert!(seg.contains(1));
        assert!(seg.contains(2));
        assert!(!seg.contains(3));

        assert_eq!(seg.release(&reader), Some(0));
        assert_eq!(reader.ref_count(), 0);
        assert_eq!(seg.roster_len(), 1);

        // Releasing again is a no-op.
        assert_eq!(seg.release(&reader), None);
        assert_eq!(reader.ref_count(), 0);
    }

    #[test]
    fn rejects_duplicate_and_unassigned_claims() {
        let seg = Segment::<u64>::new(4, 1).unwrap();
        let writer = assigned(Access::Write, 1);
        let unassigned = Participant::new(Access::Read);

        seg.claim(&writer).unwrap();
        assert_eq!(seg.claim(&writer), Err(StreamError::AlreadyClaimed(1)));
        assert_eq!(seg.claim(&unassigned), Err(StreamError::InvalidParticipant));
        assert_eq!(seg.roster_len(), 1);
        assert_eq!(writer.ref_count(), 1);
    }

    #[test]
    fn write_hold_is_exclusive() {
        let seg = Segment::<u64>::new(4, 1).unwrap();

        assert!(seg.begin_write_hold());
        assert!(!seg.begin_write_hold());
        assert!(seg.is_writing());
        assert!(!seg.writable());

        seg.end_write_hold();
        assert!(seg.begin_write_hold());
        seg.end_write_hold();
    }

    #[test]
    fn external_writes_publish_through_the_frontier() {
        let seg = Segment::<u64>::new(4, 1).unwrap();
        assert!(seg.begin_write_hold());

        // Write two records straight into the tail bytes.
        let tail = unsafe { seg.tail_bytes() };
        assert_eq!(tail.len(), 4 * size_of::<u64>());
        tail[..8].copy_from_slice(&7u64.to_ne_bytes());
        tail[8..16].copy_from_slice(&8u64.to_ne_bytes());

        seg.advance_frontier(2);
        seg.end_write_hold();

        assert_eq!(seg.len(), 2);
        assert_eq!(seg.get(0), Some(7));
        assert_eq!(seg.get(1), Some(8));
    }

    #[test]
    fn info_reflects_state() {
        let seg = Segment::<u64>::new(4, 1).unwrap();
        let writer = assigned(Access::Write, 1);
        seg.claim(&writer).unwrap();
        seg.push(1);

        let info = seg.info();
        assert_eq!(info.capacity, 4);
        assert_eq!(info.len, 1);
        assert_eq!(info.roster, 1);
        assert!(!info.in_use());
    }
}
