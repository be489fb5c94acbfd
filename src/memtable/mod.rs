//! An in-memory, sorted holder for recently-written entries.
//!
//! Instead of the lock-free skiplist an embedded engine typically reaches for, this crate's
//! single-writer-at-a-time concurrency model (writes are serialized through the writer queue;
//! see `writer_queue.rs`) makes a plain `BTreeMap` behind a `RwLock` sufficient: readers take a
//! shared lock and writers take at most one exclusive lock per batch, so there's no hot path
//! that an intrusive lock-free structure would meaningfully speed up.

use std::cmp::Ordering;
use std::sync::Arc;
use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::comparator::Comparator;
use crate::format::{self, EntryType, InternalKey, SequenceNumber};

/// An encoded internal key, ordered by internal-key order rather than by its raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
struct InternalKeyBuf(Vec<u8>, Arc<dyn Comparator>);

impl PartialOrd for InternalKeyBuf {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InternalKeyBuf {
    fn cmp(&self, other: &Self) -> Ordering {
        format::compare_internal_keys(&self.0, &other.0, |a, b| self.1.compare(a, b))
    }
}

/// A value entry: `Some(bytes)` for a put, `None` for a tombstone.
type MemValue = Option<Vec<u8>>;

#[derive(Debug)]
struct Inner {
    entries: BTreeMap<InternalKeyBuf, MemValue>,
    approximate_bytes: usize,
}

/// A mutable, shared-ownership memtable. Cloning a `Memtable` handle is cheap (an `Arc` bump)
/// and yields a second handle onto the *same* underlying map, matching the way a version holds
/// onto an immutable memtable that's still being flushed while the active memtable moves on.
#[derive(Debug, Clone)]
pub struct Memtable {
    inner: Arc<RwLock<Inner>>,
    comparator: Arc<dyn Comparator>,
}

impl Memtable {
    #[must_use]
    pub fn new(comparator: Arc<dyn Comparator>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                entries: BTreeMap::new(),
                approximate_bytes: 0,
            })),
            comparator,
        }
    }

    pub fn insert(&self, user_key: &[u8], sequence: SequenceNumber, entry_type: EntryType, value: Option<&[u8]>) {
        let internal_key = InternalKey { user_key, sequence, entry_type };
        let encoded = internal_key.encode();
        let approx_len = encoded.len() + value.map_or(0, <[u8]>::len) + 2 * std::mem::size_of::<usize>();

        let mut inner = self.inner.write();
        inner.entries.insert(InternalKeyBuf(encoded, self.comparator.clone()), value.map(<[u8]>::to_vec));
        inner.approximate_bytes += approx_len;
    }

    /// Looks up the most recent entry for `user_key` visible at or before `sequence`.
    ///
    /// Returns `Some(Some(value))` for a live value, `Some(None)` for a tombstone (the caller
    /// should stop searching lower levels), and `None` if this memtable has no entry at all for
    /// the key.
    #[must_use]
    pub fn get(&self, user_key: &[u8], sequence: SequenceNumber) -> Option<Option<Vec<u8>>> {
        let seek = format::seek_key(user_key, sequence);
        let inner = self.inner.read();
        let seek_key = InternalKeyBuf(seek, self.comparator.clone());

        let (candidate_key, candidate_value) = inner.entries.range(seek_key..).next()?;
        let candidate_user_key = format::user_key_of(&candidate_key.0);
        if self.comparator.compare(candidate_user_key, user_key) == Ordering::Equal {
            Some(candidate_value.clone())
        } else {
            None
        }
    }

    #[must_use]
    pub fn approximate_memory_usage(&self) -> usize {
        self.inner.read().approximate_bytes
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// Returns every entry in internal-key order, as `(encoded_internal_key, value)` pairs.
    /// Used when flushing a memtable to a table file and when building a merging read iterator.
    #[must_use]
    pub fn snapshot_entries(&self) -> Vec<(Vec<u8>, MemValue)> {
        self.inner
            .read()
            .entries
            .iter()
            .map(|(key, value)| (key.0.clone(), value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;

    fn table() -> Memtable {
        Memtable::new(Arc::new(BytewiseComparator))
    }

    #[test]
    fn get_returns_most_recent_value_for_key() {
        let mt = table();
        mt.insert(b"k", SequenceNumber(1), EntryType::Value, Some(b"v1"));
        mt.insert(b"k", SequenceNumber(2), EntryType::Value, Some(b"v2"));
        assert_eq!(mt.get(b"k", SequenceNumber(10)), Some(Some(b"v2".to_vec())));
    }

    #[test]
    fn get_respects_snapshot_sequence() {
        let mt = table();
        mt.insert(b"k", SequenceNumber(1), EntryType::Value, Some(b"v1"));
        mt.insert(b"k", SequenceNumber(5), EntryType::Value, Some(b"v5"));
        assert_eq!(mt.get(b"k", SequenceNumber(3)), Some(Some(b"v1".to_vec())));
    }

    #[test]
    fn tombstone_shadows_older_value() {
        let mt = table();
        mt.insert(b"k", SequenceNumber(1), EntryType::Value, Some(b"v1"));
        mt.insert(b"k", SequenceNumber(2), EntryType::Deletion, None);
        assert_eq!(mt.get(b"k", SequenceNumber(10)), Some(None));
    }

    #[test]
    fn missing_key_returns_none() {
        let mt = table();
        mt.insert(b"other", SequenceNumber(1), EntryType::Value, Some(b"v"));
        assert_eq!(mt.get(b"k", SequenceNumber(10)), None);
    }

    #[test]
    fn snapshot_entries_are_in_internal_key_order() {
        let mt = table();
        mt.insert(b"b", SequenceNumber(1), EntryType::Value, Some(b"1"));
        mt.insert(b"a", SequenceNumber(1), EntryType::Value, Some(b"2"));
        let entries = mt.snapshot_entries();
        let keys: Vec<_> = entries.iter().map(|(k, _)| format::user_key_of(k).to_vec()).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
    }
}
