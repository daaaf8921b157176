//! # Slipstream
//!
//! Slipstream is an in-process dynamic segmented buffer for streaming fixed
//! size records between producers and consumers of unpredictable speed, the
//! kind of flow you get from file descriptors, sockets, terminals or radio
//! links.
//!
//! ## Participant
//!
//! A [`Participant`] is an addressable handle for one user of the buffer. It
//! carries an access level ([`Access`]) frozen at construction and, for
//! readers, a private two-level cursor: which claimed segment, which slot
//! within it. [`Participant::pair`] builds the two linked ends of a pipe in
//! one call.
//!
//! ## Segment
//!
//! Data lives in fixed capacity *segments*. Each segment has a single
//! designated writer and any number of readers; published slots are read
//! without locking, and the buffer grows by appending segments as a writer
//! fills them. A background pruner removes segments once no participant
//! claims them anymore.
//!
//! ## Record
//!
//! Elements are fixed size [`Record`]s with compile time known layout.
//! There is a blanket implementation for plain-old-data types supported by
//! [`bytemuck`](https://docs.rs/bytemuck/latest/bytemuck/), so primitive
//! integers and `#[derive(Pod, Zeroable)]` structs work out of the box.
//!
//! ### Example
//!
//!```
//! use slipstream::{Participant, StreamBuf, StreamError};
//!
//! // The two ends of a pipe.
//! let (reader, writer) = Participant::pair("rx", "tx");
//! let buf = StreamBuf::<u64>::new();
//!
//! // Produce a few records.
//! for record in 1..=4u64 {
//!     buf.write(record, &writer)?;
//! }
//!
//! // Consume them in submission order.
//! assert!(buf.has_next(&reader));
//! for record in 1..=4u64 {
//!     assert_eq!(buf.read(&reader)?, record);
//! }
//! assert_eq!(buf.read(&reader), Err(StreamError::EndOfStream));
//! # Ok::<(), StreamError>(())
//!```

pub(crate) mod batch;
pub(crate) mod buffer;
pub(crate) mod error;
pub(crate) mod id;
pub(crate) mod options;
pub(crate) mod participant;
pub(crate) mod pruner;
pub(crate) mod record;
pub(crate) mod segment;
pub(crate) mod slab;

// Externally exposed types.
pub use batch::Batch;
pub use buffer::{StreamBuf, WriteHook};
pub use error::{Result, StreamError};
pub use options::{BufOptions, DEFAULT_PRUNE_INTERVAL, DEFAULT_SEGMENT_CAPACITY};
pub use participant::{Access, Participant};
pub use record::Record;
pub use segment::SegmentInfo;

// Crate-internal shorthands.
pub(crate) use id::IdService;
pub(crate) use segment::Segment;
pub(crate) use slab::Slab;
