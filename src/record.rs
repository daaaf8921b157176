//! Definition of fixed size records that can be stored in a segment.

use bytemuck::{AnyBitPattern, NoUninit, bytes_of, cast_slice, from_bytes, must_cast_slice};

/// A fixed sized record with compile time known layout, size and alignment.
///
/// Segments store records as raw bytes, so every element type must support
/// zero-copy transmutation between a record and a byte slice. You probably
/// don't want to handwrite these yourself; there is a blanket implementation
/// for plain-old-data types supported by
/// [`bytemuck`](https://docs.rs/bytemuck/latest/bytemuck/).
pub trait Record: Sized {
    /// Size of the record.
    fn size() -> usize;

    /// Zero copy transmute from record to bytes.
    ///
    /// # Arguments
    ///
    /// * `record` - Record to transmute.
    fn to_bytes(record: &Self) -> &[u8];

    /// Zero copy transmute from bytes to record.
    ///
    /// # Arguments
    ///
    /// * `bytes` - Bytes to transmute.
    fn from_bytes(bytes: &[u8]) -> &Self;

    /// Zero copy transmute from record slice to bytes.
    ///
    /// # Arguments
    ///
    /// * `records` - Record slice to transmute.
    fn to_bytes_slice(records: &[Self]) -> &[u8];

    /// Zero copy transmute from bytes to record slice.
    ///
    /// # Arguments
    ///
    /// * `bytes` - Bytes to transmute.
    fn from_bytes_slice(bytes: &[u8]) -> &[Self];
}

impl<T: AnyBitPattern + NoUninit> Record for T {
    #[inline]
    fn size() -> usize {
        size_of::<T>()
    }

    #[inline]
    fn to_bytes(record: &Self) -> &[u8] {
        bytes_of(record)
    }

    #[inline]
    fn from_bytes(bytes: &[u8]) -> &Self {
        from_bytes(bytes)
    }

    #[inline]
    fn to_bytes_slice(records: &[Self]) -> &[u8] {
        must_cast_slice(records)
    }

    #[inline]
    fn from_bytes_slice(bytes: &[u8]) -> &[Self] {
        cast_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bolero::{TypeGenerator, check};
    use bytemuck::{Pod, Zeroable};

    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, TypeGenerator, Pod, Zeroable)]
    struct Frame {
        seq_no: u64,
        payload: [u8; 16],
    }

    #[test]
    fn round_trip_record() {
        check!().with_type::<Frame>().for_each(|record| {
            // Transmute to bytes
            let bytes = Frame::to_bytes(record);
            assert_eq!(Frame::size(), bytes.len());

            // Transmute from bytes.
            let returned = Frame::from_bytes(bytes);
            assert_eq!(record, returned);
        });
    }

    #[test]
    fn round_trip_record_slice() {
        check!().with_type::<Vec<Frame>>().for_each(|records| {
            // Transmute to bytes
            let bytes = Frame::to_bytes_slice(records);
            assert_eq!(Frame::size() * records.len(), bytes.len());

            // Transmute from bytes.
            let returned = Frame::from_bytes_slice(bytes);
            assert_eq!(records, returned);
        });
    }
}
