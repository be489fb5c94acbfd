//! The write-batch wire format: `{sequence: u64 LE}{count: u32 LE}` followed by `count` entries
//! of `{tag: u8}{key: length-prefixed}[value: length-prefixed, only if tag is Value]`.
//!
//! A `WriteBatch` is sequence-agnostic until it's about to be written: the header is filled in
//! immediately before the batch is serialized into the log and applied to a memtable, so one
//! batch can be grown across several `put`/`delete` calls before the writer queue assigns it a
//! starting sequence number.

use crate::format::{
    read_length_prefixed_slice, write_length_prefixed_slice, EntryType, SequenceNumber,
};
use crate::error::{Error, Result};

const HEADER_LEN: usize = 8 + 4;

#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    /// Encoded entries only; the 12-byte header is prepended by `encode`.
    contents: Vec<u8>,
    count: u32,
}

impl WriteBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.contents.push(EntryType::Value as u8);
        write_length_prefixed_slice(&mut self.contents, key);
        write_length_prefixed_slice(&mut self.contents, value);
        self.count += 1;
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.contents.push(EntryType::Deletion as u8);
        write_length_prefixed_slice(&mut self.contents, key);
        self.count += 1;
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn clear(&mut self) {
        self.contents.clear();
        self.count = 0;
    }

    /// Appends every entry of `other` to `self`, as a single batch would have been built.
    pub fn append(&mut self, other: &Self) {
        self.contents.extend_from_slice(&other.contents);
        self.count += other.count;
    }

    #[must_use]
    pub fn approximate_byte_size(&self) -> usize {
        HEADER_LEN + self.contents.len()
    }

    /// Serializes this batch with `sequence` as the sequence number of its first entry.
    #[must_use]
    pub fn encode(&self, sequence: SequenceNumber) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.approximate_byte_size());
        out.extend_from_slice(&sequence.0.to_le_bytes());
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&self.contents);
        out
    }

    /// Decodes an encoded batch, returning its starting sequence number and an iterator over
    /// its entries.
    pub fn decode(encoded: &[u8]) -> Result<(SequenceNumber, WriteBatchIter<'_>)> {
        if encoded.len() < HEADER_LEN {
            return Err(Error::corruption("write batch shorter than its 12-byte header"));
        }
        let sequence = SequenceNumber(u64::from_le_bytes(encoded[0..8].try_into().expect("8 bytes")));
        let count = u32::from_le_bytes(encoded[8..12].try_into().expect("4 bytes"));
        Ok((sequence, WriteBatchIter { remaining: count, input: &encoded[HEADER_LEN..] }))
    }

    /// Iterates this batch's own entries.
    #[must_use]
    pub fn iter(&self) -> WriteBatchIter<'_> {
        WriteBatchIter { remaining: self.count, input: &self.contents }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteBatchEntry<'a> {
    Put { key: &'a [u8], value: &'a [u8] },
    Delete { key: &'a [u8] },
}

impl<'a> WriteBatchEntry<'a> {
    #[must_use]
    pub fn key(&self) -> &'a [u8] {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WriteBatchIter<'a> {
    remaining: u32,
    input: &'a [u8],
}

impl<'a> WriteBatchIter<'a> {
    /// Advances and returns the next entry, or `None` once the batch is exhausted.
    pub fn next_entry(&mut self) -> Result<Option<WriteBatchEntry<'a>>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        if self.input.is_empty() {
            return Err(Error::corruption("write batch count exceeds its encoded entries"));
        }
        let tag = self.input[0];
        self.input = &self.input[1..];
        let entry_type = EntryType::from_byte(tag)
            .ok_or_else(|| Error::corruption("write batch entry has an unrecognized tag"))?;

        let key = read_length_prefixed_slice(&mut self.input)?;
        let entry = match entry_type {
            EntryType::Value => {
                let value = read_length_prefixed_slice(&mut self.input)?;
                WriteBatchEntry::Put { key, value }
            }
            EntryType::Deletion => WriteBatchEntry::Delete { key },
        };
        self.remaining -= 1;
        Ok(Some(entry))
    }
}
