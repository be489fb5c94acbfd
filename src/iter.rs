//! A snapshot-consistent forward iterator over a database: the merge of however many memtables
//! are currently live (the active one, plus an immutable one mid-flush) and every table file in
//! the current `Version`.
//!
//! Like [`crate::compactor`], this materializes every candidate entry up front and sorts once,
//! rather than driving a true streaming k-way merge — the same simplification, for the same
//! reason: it keeps the read path's shape close to the write path's, at a memory cost this
//! crate's target working set can afford.

use std::sync::Arc;

use crate::comparator::Comparator;
use crate::error::Result;
use crate::filesystem::FileSystem;
use crate::format::{self, EntryType, SequenceNumber};
use crate::memtable::Memtable;
use crate::table_cache::TableCache;
use crate::version::Version;

/// An exhausted-once, forward-only cursor over every live key visible at a fixed snapshot
/// sequence, most-recent-value-wins and tombstones already filtered out.
pub struct DbIterator {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    position: usize,
}

impl DbIterator {
    pub(crate) fn build<FS: FileSystem>(
        comparator: &Arc<dyn Comparator>,
        sequence: SequenceNumber,
        memtables: &[&Memtable],
        version: &Version,
        table_cache: &TableCache<FS>,
    ) -> Result<Self> {
        let mut raw: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();

        for memtable in memtables {
            for (key, value) in memtable.snapshot_entries() {
                raw.push((key, value.unwrap_or_default()));
            }
        }
        for level in 0..crate::config_constants::NUM_LEVELS {
            for file in version.files(level) {
                raw.extend(table_cache.all_entries(file.file_number, file.file_size)?);
            }
        }

        raw.sort_by(|(a, _), (b, _)| format::compare_internal_keys(a, b, |x, y| comparator.compare(x, y)));

        let mut entries = Vec::with_capacity(raw.len());
        let mut last_user_key: Option<Vec<u8>> = None;

        for (internal_key, value) in raw {
            let Ok(decoded) = format::InternalKey::decode(&internal_key) else { continue };
            if decoded.sequence > sequence {
                continue;
            }
            if last_user_key.as_deref() == Some(decoded.user_key) {
                continue;
            }
            last_user_key = Some(decoded.user_key.to_vec());

            if decoded.entry_type == EntryType::Value {
                entries.push((decoded.user_key.to_vec(), value));
            }
        }

        Ok(Self { entries, position: 0 })
    }

    /// Discards entries before the first one whose key is `>= target`.
    pub fn seek(&mut self, target: &[u8], comparator: &dyn Comparator) {
        self.position = self
            .entries
            .partition_point(|(key, _)| comparator.compare(key, target) == std::cmp::Ordering::Less);
    }

    #[must_use]
    pub fn valid(&self) -> bool {
        self.position < self.entries.len()
    }

    #[must_use]
    pub fn key(&self) -> Option<&[u8]> {
        self.entries.get(self.position).map(|(k, _)| k.as_slice())
    }

    #[must_use]
    pub fn value(&self) -> Option<&[u8]> {
        self.entries.get(self.position).map(|(_, v)| v.as_slice())
    }

    pub fn advance(&mut self) {
        if self.valid() {
            self.position += 1;
        }
    }
}

impl Iterator for DbIterator {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.entries.get(self.position).cloned();
        if item.is_some() {
            self.position += 1;
        }
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;
    use crate::filesystem::MemoryFileSystem;
    use std::path::PathBuf;

    #[test]
    fn merges_memtable_over_empty_version() {
        let comparator: Arc<dyn Comparator> = Arc::new(BytewiseComparator);
        let memtable = Memtable::new(comparator.clone());
        memtable.insert(b"b", SequenceNumber(1), EntryType::Value, Some(b"2"));
        memtable.insert(b"a", SequenceNumber(1), EntryType::Value, Some(b"1"));

        let fs = Arc::new(MemoryFileSystem::new());
        let table_cache = TableCache::new(fs, PathBuf::from("/db"), comparator.clone(), None, 10);
        let version = Version::empty();

        let iter = DbIterator::build(&comparator, SequenceNumber(10), &[&memtable], &version, &table_cache).unwrap();
        let collected: Vec<_> = iter.collect();
        assert_eq!(collected, vec![(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())]);
    }

    #[test]
    fn tombstone_hides_the_key_entirely() {
        let comparator: Arc<dyn Comparator> = Arc::new(BytewiseComparator);
        let memtable = Memtable::new(comparator.clone());
        memtable.insert(b"a", SequenceNumber(1), EntryType::Value, Some(b"1"));
        memtable.insert(b"a", SequenceNumber(2), EntryType::Deletion, None);

        let fs = Arc::new(MemoryFileSystem::new());
        let table_cache = TableCache::new(fs, PathBuf::from("/db"), comparator.clone(), None, 10);
        let version = Version::empty();

        let iter = DbIterator::build(&comparator, SequenceNumber(10), &[&memtable], &version, &table_cache).unwrap();
        assert_eq!(iter.count(), 0);
    }

    #[test]
    fn respects_the_snapshot_sequence() {
        let comparator: Arc<dyn Comparator> = Arc::new(BytewiseComparator);
        let memtable = Memtable::new(comparator.clone());
        memtable.insert(b"a", SequenceNumber(1), EntryType::Value, Some(b"1"));
        memtable.insert(b"a", SequenceNumber(5), EntryType::Value, Some(b"5"));

        let fs = Arc::new(MemoryFileSystem::new());
        let table_cache = TableCache::new(fs, PathBuf::from("/db"), comparator.clone(), None, 10);
        let version = Version::empty();

        let mut iter = DbIterator::build(&comparator, SequenceNumber(2), &[&memtable], &version, &table_cache).unwrap();
        assert_eq!(iter.next(), Some((b"a".to_vec(), b"1".to_vec())));
    }
}
