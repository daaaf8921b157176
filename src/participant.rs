//! Definition of participants, the addressable users of a stream buffer.

use parking_lot::Mutex;
use std::sync::{
    Arc, OnceLock, Weak,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};

/// Access level a participant holds on the segments it claims.
///
/// The level is frozen when the participant is constructed. `ReadWrite`
/// implies both of the single capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Access {
    /// No access; the participant cannot take part in any operation.
    #[default]
    None,
    /// Read only access.
    Read,
    /// Write only access.
    Write,
    /// Both read and write access.
    ReadWrite,
}

impl Access {
    /// true if this level permits reading.
    #[inline]
    pub fn can_read(self) -> bool {
        matches!(self, Access::Read | Access::ReadWrite)
    }

    /// true if this level permits writing.
    #[inline]
    pub fn can_write(self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }
}

/// Epoch sentinel meaning the cursor position hint has never been recorded.
const HINT_UNSET: u64 = u64::MAX;

/// One user of a stream buffer.
///
/// A participant is shared through an [`Arc`]: the caller holds one handle,
/// and every segment whose roster lists the participant holds another. The
/// roster count is mirrored in [`Participant::ref_count`]; when it drops to
/// zero the participant is detached from the buffer and is destroyed once
/// the last handle goes away. Participants never point back at segments, so
/// ownership stays acyclic.
///
/// An id is assigned lazily on the first interaction with a buffer and is
/// never reused within that buffer. Id 0 means "not assigned yet"; such a
/// participant cannot appear in any roster.
pub struct Participant {
    name: Option<String>,
    access: Access,
    paired: bool,
    partner: OnceLock<Weak<Participant>>,

    // Assigned by the owning buffer's id service; 0 until then.
    id: AtomicU64,

    // Number of segment rosters listing this participant. Mutated only
    // under the roster mutex of the segment involved.
    ref_count: AtomicUsize,

    // Two-level read position: which claimed segment, which slot within it.
    // Both only move forward, and only under the execution slot.
    segment_cursor: AtomicUsize,
    slot_cursor: AtomicUsize,

    // Position hint: the index into the buffer's segment list where the
    // claimed segment at `segment_cursor` was last found, valid while no
    // segment has been unlinked since `hint_epoch` was recorded.
    hint_index: AtomicUsize,
    hint_epoch: AtomicU64,

    // Execution slot: at most one in-flight operation per participant.
    op_slot: Mutex<()>,
}

impl Participant {
    fn build(name: Option<String>, access: Access, paired: bool) -> Self {
        Self {
            name,
            access,
            paired,
            partner: OnceLock::new(),
            id: AtomicU64::new(0),
            ref_count: AtomicUsize::new(0),
            segment_cursor: AtomicUsize::new(0),
            slot_cursor: AtomicUsize::new(0),
            hint_index: AtomicUsize::new(0),
            hint_epoch: AtomicU64::new(HINT_UNSET),
            op_slot: Mutex::new(()),
        }
    }

    /// Create an anonymous participant with the given access level.
    ///
    /// # Arguments
    ///
    /// * `access` - The access level, frozen for the participant's lifetime.
    pub fn new(access: Access) -> Arc<Self> {
        Arc::new(Self::build(None, access, false))
    }

    /// Create a named participant with the given access level.
    ///
    /// # Arguments
    ///
    /// * `name` - Display name of the participant.
    /// * `access` - The access level, frozen for the participant's lifetime.
    pub fn named(name: impl Into<String>, access: Access) -> Arc<Self> {
        Arc::new(Self::build(Some(name.into()), access, false))
    }

    /// Create a linked reader/writer pair, the two ends of a pipe.
    ///
    /// The reader gets [`Access::Read`], the writer [`Access::Write`], and
    /// each holds a weak reference to the other. The linkage is advisory
    /// metadata with one operational effect: when the writer allocates its
    /// first segment, the reader is attached to the stream automatically.
    ///
    /// # Arguments
    ///
    /// * `reader_name` - Display name for the reading end.
    /// * `writer_name` - Display name for the writing end.
    pub fn pair(
        reader_name: impl Into<String>,
        writer_name: impl Into<String>,
    ) -> (Arc<Self>, Arc<Self>) {
        let reader = Arc::new(Self::build(Some(reader_name.into()), Access::Read, true));
        let writer = Arc::new(Self::build(Some(writer_name.into()), Access::Write, true));

        reader
            .partner
            .set(Arc::downgrade(&writer))
            .expect("Partner is linked exactly once");
        writer
            .partner
            .set(Arc::downgrade(&reader))
            .expect("Partner is linked exactly once");

        (reader, writer)
    }

    /// The participant's id; 0 if none has been assigned yet.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id.load(Ordering::Acquire)
    }

    /// true if an id has been assigned.
    #[inline]
    pub fn has_id(&self) -> bool {
        self.id() != 0
    }

    /// The access level the participant was constructed with.
    #[inline]
    pub fn access(&self) -> Access {
        self.access
    }

    /// The display name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Number of segment rosters currently listing this participant.
    #[inline]
    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    /// true if the participant was created as half of a reader/writer pair.
    #[inline]
    pub fn is_paired(&self) -> bool {
        self.paired
    }

    /// The other end of the pair, if it is still alive.
    pub fn partner(&self) -> Option<Arc<Participant>> {
        self.partner.get()?.upgrade()
    }

    /// true if two handles address the same participant, compared by id.
    ///
    /// # Arguments
    ///
    /// * `a` - First participant.
    /// * `b` - Second participant.
    pub fn same_participant(a: &Participant, b: &Participant) -> bool {
        a.has_id() && a.id() == b.id()
    }

    /// Record the id issued by a buffer. First assignment wins.
    pub(crate) fn assign_id(&self, id: u64) -> u64 {
        match self
            .id
            .compare_exchange(0, id, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => id,
            Err(existing) => existing,
        }
    }

    pub(crate) fn incr_ref(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn decr_ref(&self) -> usize {
        // Returns the count after the decrement.
        self.ref_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    #[inline]
    pub(crate) fn segment_cursor(&self) -> usize {
        self.segment_cursor.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn slot_cursor(&self) -> usize {
        self.slot_cursor.load(Ordering::Relaxed)
    }

    /// Consume one slot within the current segment.
    #[inline]
    pub(crate) fn advance_slot(&self) {
        self.slot_cursor.fetch_add(1, Ordering::Relaxed);
    }

    /// Cross into the next claimed segment, starting at its first slot.
    pub(crate) fn cross_segment(&self) {
        self.segment_cursor.fetch_add(1, Ordering::Relaxed);
        self.slot_cursor.store(0, Ordering::Relaxed);
    }

    /// The last recorded list position of the current segment, if it was
    /// recorded at `epoch`.
    pub(crate) fn position_hint(&self, epoch: u64) -> Option<usize> {
        if self.hint_epoch.load(Ordering::Relaxed) == epoch {
            Some(self.hint_index.load(Ordering::Relaxed))
        } else {
            None
        }
    }

    pub(crate) fn record_position_hint(&self, index: usize, epoch: u64) {
        self.hint_index.store(index, Ordering::Relaxed);
        self.hint_epoch.store(epoch, Ordering::Relaxed);
    }

    /// Forget the recorded list position, forcing the next lookup to rescan.
    pub(crate) fn clear_position_hint(&self) {
        self.hint_epoch.store(HINT_UNSET, Ordering::Relaxed);
    }

    pub(crate) fn op_slot(&self) -> &Mutex<()> {
        &self.op_slot
    }
}

impl std::fmt::Debug for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Participant")
            .field("id", &self.id())
            .field("name", &self.name)
            .field("access", &self.access)
            .field("ref_count", &self.ref_count())
            .field("paired", &self.paired)
            .finish_non_exhaustive()
    }
}
