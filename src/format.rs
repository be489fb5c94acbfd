//! Internal key codec and the length-prefixed wire primitives shared by the write batch,
//! version edit, and table formats.
//!
//! An internal key is `user_key ++ tag`, where `tag` is an 8-byte little-endian integer packing
//! a 56-bit sequence number and an 8-bit entry type: `tag = (sequence << 8) | entry_type`.
//! Internal-key order is ascending by `user_key`, then **descending** by `tag` (so, for equal
//! user keys, higher sequence numbers and `Value` over `Deletion` sort first).

use std::cmp::Ordering;

use integer_encoding::{VarInt, VarIntWriter};

use crate::error::{Error, Result};

/// A unique, monotonically increasing identifier for an on-disk file (WAL segment, SSTable, or
/// MANIFEST). `0` is never issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileNumber(pub u64);

/// A monotonically increasing write sequence number. The top 8 bits of a 64-bit tag are
/// reserved for the entry type, so only 56 bits are usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    pub const ZERO: Self = Self(0);
    pub const MAX_USABLE: Self = Self((1_u64 << 56) - 1);

    #[must_use]
    pub fn new_usable(value: u64) -> Option<Self> {
        (value <= Self::MAX_USABLE.0).then_some(Self(value))
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// The type tag stored in the low byte of an internal key's trailer.
///
/// `Seek` is numerically identical to `Value` and exists only to name the synthetic type used
/// to build the *smallest* possible internal key for a given `(user_key, sequence)` pair (used
/// by lookups and by compaction-pointer construction): a lookup key uses the maximum type byte
/// so that, combined with descending tag order, it sorts before every real entry at the same
/// `(user_key, sequence)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum EntryType {
    Deletion = 0,
    Value = 1,
}

impl EntryType {
    pub const SEEK: Self = Self::Value;
    pub const MAX_TYPE: Self = Self::Value;

    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Deletion),
            1 => Some(Self::Value),
            _ => None,
        }
    }
}

/// A decoded internal key, borrowing its user-key bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: SequenceNumber,
    pub entry_type: EntryType,
}

impl<'a> InternalKey<'a> {
    fn tag(&self) -> u64 {
        (self.sequence.0 << 8) | self.entry_type as u64
    }

    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.user_key.len() + 8
    }

    pub fn append_encoded(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.user_key);
        out.extend_from_slice(&self.tag().to_le_bytes());
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.append_encoded(&mut buf);
        buf
    }

    /// Decodes an internal key from its encoded byte representation.
    ///
    /// Fails if the buffer is shorter than the 8-byte trailer or if the type byte is not a
    /// recognized [`EntryType`].
    pub fn decode(encoded: &'a [u8]) -> Result<Self> {
        let split = encoded
            .len()
            .checked_sub(8)
            .ok_or_else(|| Error::corruption("internal key shorter than the 8-byte trailer"))?;
        let (user_key, trailer) = encoded.split_at(split);
        let trailer: [u8; 8] = trailer.try_into().expect("split_at(len-8) yields 8 bytes");
        let tag = u64::from_le_bytes(trailer);

        let sequence = SequenceNumber(tag >> 8);
        #[allow(clippy::cast_possible_truncation)]
        let entry_type = EntryType::from_byte(tag as u8)
            .ok_or_else(|| Error::corruption("internal key has an unrecognized entry type"))?;

        Ok(Self { user_key, sequence, entry_type })
    }
}

/// Compares two encoded internal keys in internal-key order: ascending user key, then
/// descending `(sequence, entry_type)`.
///
/// `user_key_cmp` is the external user-key comparator.
pub fn compare_internal_keys(
    a: &[u8],
    b: &[u8],
    user_key_cmp: impl Fn(&[u8], &[u8]) -> Ordering,
) -> Ordering {
    let (a_user, a_tag) = split_trailer(a);
    let (b_user, b_tag) = split_trailer(b);

    user_key_cmp(a_user, b_user).then_with(|| b_tag.cmp(&a_tag))
}

fn split_trailer(encoded: &[u8]) -> (&[u8], u64) {
    let split = encoded.len().saturating_sub(8);
    let (user_key, trailer) = encoded.split_at(split);
    if trailer.len() == 8 {
        let trailer: [u8; 8] = trailer.try_into().expect("checked length");
        (user_key, u64::from_le_bytes(trailer))
    } else {
        // Malformed input (shorter than 8 bytes); sorts as if it had sequence/type zero so that
        // comparisons remain total rather than panicking.
        (user_key, 0)
    }
}

/// Builds the smallest possible encoded internal key for `(user_key, sequence)`: used to build
/// memtable/table lookup keys and compaction-pointer "seek" keys.
#[must_use]
pub fn seek_key(user_key: &[u8], sequence: SequenceNumber) -> Vec<u8> {
    InternalKey { user_key, sequence, entry_type: EntryType::SEEK }.encode()
}

/// Extracts the user-key portion of an encoded internal key without validating the trailer.
#[must_use]
pub fn user_key_of(encoded: &[u8]) -> &[u8] {
    let split = encoded.len().saturating_sub(8);
    &encoded[..split]
}

// ================================================================
//  Length-prefixed primitives, shared by write_batch and version_edit
// ================================================================

pub fn read_varint_u32(input: &mut &[u8]) -> Result<u32> {
    let (value, len) = u32::decode_var(input)
        .ok_or_else(|| Error::corruption("truncated varint32"))?;
    *input = &input[len..];
    Ok(value)
}

pub fn read_varint_u64(input: &mut &[u8]) -> Result<u64> {
    let (value, len) = u64::decode_var(input)
        .ok_or_else(|| Error::corruption("truncated varint64"))?;
    *input = &input[len..];
    Ok(value)
}

pub fn write_varint_u32(out: &mut Vec<u8>, value: u32) {
    out.write_varint(value).expect("writing to a Vec never fails");
}

pub fn write_varint_u64(out: &mut Vec<u8>, value: u64) {
    out.write_varint(value).expect("writing to a Vec never fails");
}

pub fn read_length_prefixed_slice<'a>(input: &mut &'a [u8]) -> Result<&'a [u8]> {
    let len = read_varint_u32(input)? as usize;
    if input.len() < len {
        return Err(Error::corruption("length-prefixed slice runs past end of buffer"));
    }
    let (slice, rest) = input.split_at(len);
    *input = rest;
    Ok(slice)
}

pub fn write_length_prefixed_slice(out: &mut Vec<u8>, slice: &[u8]) {
    write_varint_u32(out, u32::try_from(slice.len()).expect("slice shorter than u32::MAX"));
    out.extend_from_slice(slice);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_key_round_trips() {
        let key = InternalKey {
            user_key: b"hello",
            sequence: SequenceNumber(42),
            entry_type: EntryType::Value,
        };
        let encoded = key.encode();
        let decoded = InternalKey::decode(&encoded).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn decode_rejects_short_buffers() {
        assert!(InternalKey::decode(b"short").is_err());
    }

    #[test]
    fn decode_rejects_bad_entry_type() {
        let mut encoded = InternalKey {
            user_key: b"k",
            sequence: SequenceNumber(1),
            entry_type: EntryType::Value,
        }
        .encode();
        let last = encoded.len() - 1;
        encoded[last] = 2; // invalid entry type
        assert!(InternalKey::decode(&encoded).is_err());
    }

    #[test]
    fn newer_sequence_sorts_first_for_equal_user_key() {
        let older = InternalKey { user_key: b"k", sequence: SequenceNumber(1), entry_type: EntryType::Value }.encode();
        let newer = InternalKey { user_key: b"k", sequence: SequenceNumber(2), entry_type: EntryType::Value }.encode();
        assert_eq!(compare_internal_keys(&newer, &older, |a, b| a.cmp(b)), Ordering::Less);
    }

    #[test]
    fn user_key_dominates_sequence() {
        let a = InternalKey { user_key: b"a", sequence: SequenceNumber(100), entry_type: EntryType::Value }.encode();
        let b = InternalKey { user_key: b"b", sequence: SequenceNumber(1), entry_type: EntryType::Value }.encode();
        assert_eq!(compare_internal_keys(&a, &b, |x, y| x.cmp(y)), Ordering::Less);
    }

    #[test]
    fn seek_key_sorts_before_any_real_entry_at_same_sequence() {
        let seek = seek_key(b"k", SequenceNumber(5));
        let value = InternalKey { user_key: b"k", sequence: SequenceNumber(5), entry_type: EntryType::Value }.encode();
        let deletion = InternalKey { user_key: b"k", sequence: SequenceNumber(5), entry_type: EntryType::Deletion }.encode();
        assert_eq!(compare_internal_keys(&seek, &value, |a, b| a.cmp(b)), Ordering::Equal);
        assert_eq!(compare_internal_keys(&seek, &deletion, |a, b| a.cmp(b)), Ordering::Less);
    }

    #[test]
    fn length_prefixed_round_trips() {
        let mut buf = Vec::new();
        write_length_prefixed_slice(&mut buf, b"hello world");
        let mut input = &buf[..];
        assert_eq!(read_length_prefixed_slice(&mut input).unwrap(), b"hello world");
        assert!(input.is_empty());
    }
}
