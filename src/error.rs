//! Definition of errors surfaced by buffer operations.

use crate::Access;
use thiserror::Error;

/// Result alias for fallible buffer operations.
pub type Result<T, E = StreamError> = core::result::Result<T, E>;

/// Different types of error that can happen when operating on a stream buffer.
///
/// Every error surfaces to the caller synchronously. The buffer never retries
/// an operation on the caller's behalf and never swallows a failure; the only
/// component that keeps going after a problem is the background pruner, which
/// logs and moves on to the next segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The participant has no assigned id where one is required.
    #[error("Participant has no assigned id")]
    InvalidParticipant,

    /// The participant's access level does not permit the operation.
    #[error("Operation requires {required:?} access, participant holds {held:?}")]
    InsufficientCapability { required: Access, held: Access },

    /// The participant is already present in the segment's roster.
    #[error("Participant {0} already claims this segment")]
    AlreadyClaimed(u64),

    /// The operation requires at least one claimed segment and there is none.
    #[error("Participant {0} claims no segment in this buffer")]
    NoAssociatedSegment(u64),

    /// Everything published to the participant's stream has been consumed.
    #[error("All published records have been consumed")]
    EndOfStream,

    /// The id space rolled over; no more participants can be assigned.
    #[error("Participant id space exhausted")]
    CapacityExhausted,

    /// A segment slab could not be allocated.
    #[error("Failed to allocate a segment slab of {0} bytes")]
    AllocationFailed(usize),
}
