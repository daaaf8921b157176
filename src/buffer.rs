//! Definition of the stream buffer, the façade that owns the segment list.

use crate::{
    Access, Batch, BufOptions, IdService, Participant, Record, Result, Segment, SegmentInfo,
    StreamError,
    pruner::{self, PrunerHandle},
};
use parking_lot::{Mutex, RwLock};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tracing::debug;

/// State shared between the buffer façade and the pruner thread.
pub(crate) struct Shared<T> {
    /// The segment list, totally ordered by creation time. Writers append
    /// at the tail; only the pruner erases, and it may erase anywhere.
    pub(crate) segments: RwLock<Vec<Arc<Segment<T>>>>,

    /// Bumped by every sweep that unlinks at least one segment. A recorded
    /// cursor position hint stays valid while the epoch is unchanged,
    /// because appends never shift existing list positions.
    pub(crate) prune_epoch: AtomicU64,

    /// Read-capable participants included in the roster of every segment
    /// allocated from now on.
    readers: Mutex<Vec<Arc<Participant>>>,

    ids: IdService,
}

/// An in-process dynamic segmented buffer for streaming records between
/// participants of varying speed.
///
/// The buffer grows by appending fixed capacity segments on demand and
/// shrinks through a background pruner that reclaims segments no live
/// participant still needs. Each segment accepts writes from a single
/// designated writer; any number of readers consume published slots through
/// private cursors, so readers never contend with one another.
///
/// All operations take `&self` and may be called from any thread. Two
/// operations on the *same* participant serialize on that participant's
/// execution slot; operations on different participants proceed in
/// parallel.
pub struct StreamBuf<T> {
    shared: Arc<Shared<T>>,
    options: BufOptions,
    pruner: Mutex<Option<PrunerHandle>>,
}

impl<T: Record + Copy + 'static> StreamBuf<T> {
    /// Create an empty buffer with default options.
    pub fn new() -> Self {
        Self::with_options(BufOptions::default())
    }

    /// Create an empty buffer with the given options.
    ///
    /// # Arguments
    ///
    /// * `options` - Segment capacity and prune interval to use.
    pub fn with_options(options: BufOptions) -> Self {
        let shared = Arc::new(Shared {
            segments: RwLock::new(Vec::new()),
            prune_epoch: AtomicU64::new(0),
            readers: Mutex::new(Vec::new()),
            ids: IdService::new(),
        });
        let pruner = pruner::spawn(Arc::clone(&shared), options.prune_interval);

        Self {
            shared,
            options,
            pruner: Mutex::new(Some(pruner)),
        }
    }

    /// Create a buffer with one segment of the given capacity, claimed by
    /// `participant`, which is assigned an id immediately.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Slot capacity of the initial segment.
    /// * `participant` - Participant claiming the initial segment.
    pub fn with_segment(capacity: usize, participant: &Arc<Participant>) -> Result<Self> {
        Self::with_segments(capacity, participant, 1)
    }

    /// Create a buffer with `count` segments of the given capacity, all
    /// claimed by `participant`, which is assigned an id immediately.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Slot capacity of each initial segment.
    /// * `participant` - Participant claiming the initial segments.
    /// * `count` - Number of segments to create.
    pub fn with_segments(
        capacity: usize,
        participant: &Arc<Participant>,
        count: usize,
    ) -> Result<Self> {
        let buf = Self::new();
        buf.ensure_id(participant)?;
        for _ in 0..count {
            buf.alloc_segment(capacity, participant)?;
        }
        Ok(buf)
    }

    /// Append one record to the participant's stream.
    ///
    /// Records written by one participant are observed by readers in
    /// submission order. Writes by different participants interleave at
    /// segment granularity only: each writer appends to its own most recent
    /// segment, and a new one is opened when that segment fills up.
    ///
    /// # Arguments
    ///
    /// * `record` - Record to append.
    /// * `participant` - The writing participant.
    pub fn write(&self, record: T, participant: &Arc<Participant>) -> Result<()> {
        if !participant.access().can_write() {
            return Err(StreamError::InsufficientCapability {
                required: Access::Write,
                held: participant.access(),
            });
        }

        // Join any operation already in flight for this participant.
        let _op = participant.op_slot().lock();
        self.ensure_id(participant)?;

        let segment = match self.writer_tail(participant.id()) {
            Some(tail) if tail.writable() && !tail.is_full() => tail,
            Some(tail) => self.alloc_segment(tail.capacity(), participant)?,
            None => self.alloc_segment(self.options.segment_capacity, participant)?,
        };

        if segment.push(record) {
            return Ok(());
        }

        // The tail was full after all; open a successor of the same size.
        let successor = self.alloc_segment(segment.capacity(), participant)?;
        let appended = successor.push(record);
        debug_assert!(appended, "A fresh segment accepts at least one record");
        Ok(())
    }

    /// Return the next record in the participant's stream.
    ///
    /// The participant's cursor walks its claimed segments in creation
    /// order, slot by slot, and never observes a slot at or above a
    /// segment's write frontier. Multiple readers consume the same
    /// segments without mutual exclusion; their cursors are private.
    ///
    /// # Arguments
    ///
    /// * `participant` - The reading participant.
    pub fn read(&self, participant: &Arc<Participant>) -> Result<T> {
        if !participant.access().can_read() {
            return Err(StreamError::InsufficientCapability {
                required: Access::Read,
                held: participant.access(),
            });
        }

        let _op = participant.op_slot().lock();
        self.ensure_id(participant)?;

        let list = self.shared.segments.read();
        let epoch = self.shared.prune_epoch.load(Ordering::Acquire);
        Self::next_record(&list, epoch, participant)
    }

    /// Drain records into `batch` until it is full or the stream has no
    /// more published records. Returns the number of records drained; 0
    /// means the reader has caught up.
    ///
    /// # Arguments
    ///
    /// * `participant` - The reading participant.
    /// * `batch` - Reusable target buffer; cleared before filling.
    pub fn read_batch(&self, participant: &Arc<Participant>, batch: &mut Batch<T>) -> Result<usize> {
        if !participant.access().can_read() {
            return Err(StreamError::InsufficientCapability {
                required: Access::Read,
                held: participant.access(),
            });
        }

        let _op = participant.op_slot().lock();
        self.ensure_id(participant)?;
        batch.clear();

        let list = self.shared.segments.read();
        let epoch = self.shared.prune_epoch.load(Ordering::Acquire);
        while batch.remaining() > 0 {
            match Self::next_record(&list, epoch, participant) {
                Ok(record) => batch.push(record),
                Err(StreamError::EndOfStream) => break,
                Err(error) => return Err(error),
            }
        }
        Ok(batch.len())
    }

    /// true if the participant has at least one published, unread record in
    /// its stream.
    ///
    /// # Arguments
    ///
    /// * `participant` - The reading participant.
    pub fn has_next(&self, participant: &Arc<Participant>) -> bool {
        let id = participant.id();
        if id == 0 {
            return false;
        }

        let list = self.shared.segments.read();
        let cursor = participant.segment_cursor();
        let slot = participant.slot_cursor();

        let mut seen = 0;
        for segment in list.iter() {
            if !segment.contains(id) {
                continue;
            }
            if seen == cursor {
                if slot < segment.len() {
                    return true;
                }
            } else if seen > cursor && segment.len() > 0 {
                return true;
            }
            seen += 1;
        }
        false
    }

    /// Run `op` against the buffer, guaranteeing only that `participant`
    /// has an id and claims at least one segment beforehand.
    ///
    /// `op` runs with no internal locks held; any locking is done by the
    /// operations it invokes, so it is free to call back into the buffer.
    ///
    /// # Arguments
    ///
    /// * `participant` - Participant to prepare.
    /// * `op` - Operation to run.
    pub fn with_participant<R>(
        &self,
        participant: &Arc<Participant>,
        op: impl FnOnce(&Self) -> R,
    ) -> Result<R> {
        {
            let _op_slot = participant.op_slot().lock();
            self.ensure_id(participant)?;

            let claimed = self
                .shared
                .segments
                .read()
                .iter()
                .any(|segment| segment.contains(participant.id()));
            if !claimed {
                self.alloc_segment(self.options.segment_capacity, participant)?;
            }
            // The execution slot is dropped here, before `op` runs.
        }
        Ok(op(self))
    }

    /// Attach a reader to the stream: claim every live segment for it and
    /// include it in the roster of every segment allocated from now on.
    ///
    /// # Arguments
    ///
    /// * `participant` - A read-capable participant.
    pub fn attach(&self, participant: &Arc<Participant>) -> Result<()> {
        if !participant.access().can_read() {
            return Err(StreamError::InsufficientCapability {
                required: Access::Read,
                held: participant.access(),
            });
        }

        let _op = participant.op_slot().lock();
        self.ensure_id(participant)?;

        {
            let mut readers = self.shared.readers.lock();
            if readers
                .iter()
                .any(|member| Participant::same_participant(member, participant))
            {
                return Err(StreamError::AlreadyClaimed(participant.id()));
            }
            readers.push(Arc::clone(participant));
        }

        // Claiming under the list read lock keeps the sweep from unlinking
        // a segment between our look at it and the claim. A segment already
        // listing the participant was populated from the registry by a
        // concurrent allocation and is skipped.
        let list = self.shared.segments.read();
        for segment in list.iter() {
            if !segment.contains(participant.id()) {
                segment.claim(participant)?;
            }
        }
        participant.clear_position_hint();
        Ok(())
    }

    /// Revoke the participant from the buffer: wait for its in-flight
    /// operation to finish, then remove it from every roster and from the
    /// reader registry. Segments it alone kept alive become eligible for
    /// the next pruner sweep.
    ///
    /// # Arguments
    ///
    /// * `participant` - Participant to revoke.
    pub fn release(&self, participant: &Arc<Participant>) {
        // Quiesce before touching rosters.
        let _op = participant.op_slot().lock();

        self.shared
            .readers
            .lock()
            .retain(|reader| !Participant::same_participant(reader, participant));

        let list = self.shared.segments.read();
        let mut removed = 0usize;
        for segment in list.iter() {
            if segment.release(participant).is_some() {
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(
                participant = participant.id(),
                segments = removed,
                ref_count = participant.ref_count(),
                "released participant"
            );
        }
    }

    /// Open a bounded, non-owning view into the writable tail of the
    /// participant's current segment, for external batch writers such as a
    /// kernel `recv` into the raw bytes.
    ///
    /// The view covers the tail of one segment only. It is superseded when
    /// the buffer appends a new segment for the writer, which also happens
    /// if `write` is called while the hook is outstanding.
    ///
    /// # Arguments
    ///
    /// * `participant` - The writing participant.
    pub fn write_hook(&self, participant: &Arc<Participant>) -> Result<WriteHook<T>> {
        if !participant.access().can_write() {
            return Err(StreamError::InsufficientCapability {
                required: Access::Write,
                held: participant.access(),
            });
        }

        let _op = participant.op_slot().lock();
        self.ensure_id(participant)?;

        let segment = match self.writer_tail(participant.id()) {
            Some(tail) if tail.writable() && !tail.is_full() => tail,
            Some(tail) => self.alloc_segment(tail.capacity(), participant)?,
            None => self.alloc_segment(self.options.segment_capacity, participant)?,
        };

        let segment = if segment.begin_write_hold() {
            segment
        } else {
            // A hold is already outstanding on the tail; the fresh
            // successor supersedes it.
            let successor = self.alloc_segment(segment.capacity(), participant)?;
            let held = successor.begin_write_hold();
            debug_assert!(held, "A fresh segment has no outstanding hold");
            successor
        };

        Ok(WriteHook { segment })
    }

    /// Assign an id to the participant on its first interaction.
    fn ensure_id(&self, participant: &Arc<Participant>) -> Result<u64> {
        if participant.has_id() {
            return Ok(participant.id());
        }
        let id = self.shared.ids.next()?;
        Ok(participant.assign_id(id))
    }

    /// Register a reader for inclusion in future segment rosters.
    fn register_reader(&self, reader: &Arc<Participant>) -> Result<()> {
        self.ensure_id(reader)?;
        let mut readers = self.shared.readers.lock();
        if !readers
            .iter()
            .any(|member| Participant::same_participant(member, reader))
        {
            readers.push(Arc::clone(reader));
        }
        Ok(())
    }

    /// The most recent segment that `id` both claims and is the designated
    /// writer of. Segments the participant was revoked from don't count.
    fn writer_tail(&self, id: u64) -> Option<Arc<Segment<T>>> {
        self.shared
            .segments
            .read()
            .iter()
            .rev()
            .find(|segment| segment.writer_id() == id && segment.contains(id))
            .map(Arc::clone)
    }

    /// Allocate a segment, append it to the list and populate its roster
    /// with the creator and every registered reader.
    fn alloc_segment(
        &self,
        capacity: usize,
        creator: &Arc<Participant>,
    ) -> Result<Arc<Segment<T>>> {
        // A paired writer pulls its reading end into the stream before its
        // first segment exists, so no published record escapes the reader.
        if creator.access().can_write() {
            if let Some(partner) = creator.partner() {
                if partner.access().can_read() {
                    self.register_reader(&partner)?;
                }
            }
        }

        let writer_id = if creator.access().can_write() {
            creator.id()
        } else {
            0
        };
        let segment = Arc::new(Segment::new(capacity, writer_id)?);
        segment.claim(creator)?;

        let mut list = self.shared.segments.write();
        for reader in self.shared.readers.lock().iter() {
            if !Participant::same_participant(reader, creator) {
                segment.claim(reader)?;
            }
        }
        list.push(Arc::clone(&segment));

        debug!(
            capacity,
            writer = writer_id,
            segments = list.len(),
            "allocated segment"
        );
        Ok(segment)
    }

    /// Step the participant's cursor to the next published record.
    ///
    /// The position hint caches where in the list the cursor's segment was
    /// last found. It is trusted while the prune epoch is unchanged and the
    /// hinted segment still lists the participant: claims only append, and
    /// appends never shift existing list positions.
    fn next_record(
        list: &[Arc<Segment<T>>],
        epoch: u64,
        participant: &Arc<Participant>,
    ) -> Result<T> {
        let id = participant.id();

        let mut index = match participant.position_hint(epoch) {
            Some(hint) if hint < list.len() && list[hint].contains(id) => hint,
            _ => {
                let located = Self::locate(list, id, participant.segment_cursor())?;
                participant.record_position_hint(located, epoch);
                located
            }
        };

        loop {
            let segment = &list[index];
            if let Some(record) = segment.get(participant.slot_cursor()) {
                participant.advance_slot();
                return Ok(record);
            }

            // Every published slot here is consumed; cross into the next
            // claimed segment if one exists.
            match Self::next_claimed(list, index, id) {
                Some(next) => {
                    let _bookkeeping = segment.read_gate().lock();
                    participant.cross_segment();
                    participant.record_position_hint(next, epoch);
                    index = next;
                }
                None => return Err(StreamError::EndOfStream),
            }
        }
    }

    /// Find the list position of the `cursor`-th segment claimed by `id`.
    fn locate(list: &[Arc<Segment<T>>], id: u64, cursor: usize) -> Result<usize> {
        let mut seen = 0;
        let mut any = false;
        for (index, segment) in list.iter().enumerate() {
            if segment.contains(id) {
                any = true;
                if seen == cursor {
                    return Ok(index);
                }
                seen += 1;
            }
        }

        if any {
            Err(StreamError::EndOfStream)
        } else {
            Err(StreamError::NoAssociatedSegment(id))
        }
    }

    /// Find the next list position after `from` claimed by `id`.
    fn next_claimed(list: &[Arc<Segment<T>>], from: usize, id: u64) -> Option<usize> {
        list.iter()
            .enumerate()
            .skip(from + 1)
            .find(|(_, segment)| segment.contains(id))
            .map(|(index, _)| index)
    }
}

impl<T> StreamBuf<T> {
    /// Number of live segments.
    pub fn segment_count(&self) -> usize {
        self.shared.segments.read().len()
    }

    /// Diagnostic snapshot of every live segment, in creation order.
    pub fn segments(&self) -> Vec<SegmentInfo> {
        self.shared
            .segments
            .read()
            .iter()
            .map(|segment| segment.info())
            .collect()
    }

    /// Tear the buffer down: stop the pruner, join every in-flight
    /// operation, drain all rosters and drop all segments. Idempotent;
    /// also runs on drop.
    pub fn shutdown(&self) {
        if let Some(pruner) = self.pruner.lock().take() {
            pruner.stop();
        }

        let segments = {
            let mut list = self.shared.segments.write();
            std::mem::take(&mut *list)
        };
        let readers = std::mem::take(&mut *self.shared.readers.lock());

        // Join in-flight operations before the rosters go away.
        let mut quiesced: Vec<u64> = Vec::new();
        for segment in &segments {
            for member in segment.roster_snapshot() {
                if !quiesced.contains(&member.id()) {
                    let _join = member.op_slot().lock();
                    quiesced.push(member.id());
                }
            }
        }
        for segment in &segments {
            segment.clear_roster();
        }

        if !segments.is_empty() {
            debug!(segments = segments.len(), "tore down segment list");
        }
        drop(readers);
    }
}

impl<T: Record + Copy + 'static> Default for StreamBuf<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for StreamBuf<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A bounded, non-owning view into the writable tail of a writer's current
/// segment, handed out by [`StreamBuf::write_hook`].
///
/// While the hook is alive it holds the segment's write reservation, so the
/// buffer routes ordinary writes to a successor segment instead. Records
/// written through [`WriteHook::tail`] become visible to readers only after
/// [`WriteHook::commit`] publishes them.
pub struct WriteHook<T> {
    segment: Arc<Segment<T>>,
}

impl<T: Record + Copy> WriteHook<T> {
    /// Number of unwritten slots remaining in the viewed segment.
    pub fn remaining(&self) -> usize {
        self.segment.capacity() - self.segment.len()
    }

    /// The unwritten tail of the segment as raw bytes, `remaining()` slots
    /// of `T::size()` bytes each.
    pub fn tail(&mut self) -> &mut [u8] {
        // Safety: The hook holds the segment's write reservation, and the
        // borrow of `self` keeps the slice from outliving it.
        unsafe { self.segment.tail_bytes() }
    }

    /// Publish `count` slots written through [`WriteHook::tail`].
    ///
    /// # Panic
    ///
    /// Panics if `count` exceeds the remaining capacity.
    ///
    /// # Arguments
    ///
    /// * `count` - Number of filled slots to publish.
    pub fn commit(&mut self, count: usize) {
        self.segment.advance_frontier(count);
    }
}

impl<T> Drop for WriteHook<T> {
    fn drop(&mut self) {
        self.segment.end_write_hold();
    }
}
