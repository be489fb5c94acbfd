//! Executes a picked [`Compaction`]: merges its input files (or, for a memtable flush, just the
//! memtable) into a run of new table files at the next level, dropping entries no live snapshot
//! can still observe.
//!
//! Input entries are read entirely into memory and merge-sorted rather than consumed through a
//! true streaming k-way merge iterator; for the table sizes this crate targets that's a fine
//! trade of some peak memory for a much smaller implementation.

use std::path::PathBuf;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::compaction::Compaction;
use crate::compressor::CompressionKind;
use crate::database_files::DbFileName;
use crate::error::Result;
use crate::filesystem::FileSystem;
use crate::filter::FilterPolicy;
use crate::format::{self, SequenceNumber};
use crate::memtable::Memtable;
use crate::table::{TableSummary, TableWriter};
use crate::table_cache::TableCache;
use crate::version::edit::VersionEdit;
use crate::version::FileMetadata;

/// Table-building knobs a compaction needs, independent of which files it's compacting.
#[derive(Clone)]
pub struct CompactorOptions {
    pub target_file_size: u64,
    pub grandparent_overlap_limit: u64,
    pub block_size: usize,
    pub block_restart_interval: usize,
    pub compression: CompressionKind,
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,
}

pub struct Compactor<FS: FileSystem> {
    fs: Arc<FS>,
    db_path: PathBuf,
    comparator: Arc<dyn Comparator>,
    options: CompactorOptions,
}

/// One newly written table, ready to be folded into a [`VersionEdit`] by the caller.
pub struct CompactionOutput {
    pub file_number: crate::format::FileNumber,
    pub summary: TableSummary,
}

impl<FS: FileSystem> Compactor<FS> {
    #[must_use]
    pub fn new(fs: Arc<FS>, db_path: PathBuf, comparator: Arc<dyn Comparator>, options: CompactorOptions) -> Self {
        Self { fs, db_path, comparator, options }
    }

    /// A minor compaction: flushes an immutable memtable's entries straight into a level 0
    /// table, with no merging against any on-disk file. Tombstones are carried over as-written
    /// (an empty-valued entry tagged `Deletion` in the internal key) so they keep shadowing any
    /// older value for the same key still sitting in a lower level.
    pub fn flush_memtable(&self, memtable: &Memtable, new_file_number: impl FnMut() -> crate::format::FileNumber) -> Result<Option<CompactionOutput>> {
        let entries: Vec<(Vec<u8>, Vec<u8>)> = memtable
            .snapshot_entries()
            .into_iter()
            .map(|(key, value)| (key, value.unwrap_or_default()))
            .collect();
        self.write_single_file(entries, new_file_number)
    }

    /// Runs a major compaction: merges `compaction.inputs` and `compaction.next_level_inputs`,
    /// dropping entries that are shadowed or, for tombstones, that have aged out of every
    /// snapshot and are being compacted all the way to the bottom of the keyspace seen so far.
    ///
    /// `is_base_level_for_key` tells the caller's version whether any level below
    /// `compaction.level + 1` still holds a file that could contain the given user key; when it
    /// doesn't, an aged-out tombstone can be dropped instead of carried forward forever.
    pub fn run(
        &self,
        table_cache: &TableCache<FS>,
        compaction: &Compaction,
        drop_horizon: Option<SequenceNumber>,
        mut is_base_level_for_key: impl FnMut(&[u8]) -> bool,
        mut new_file_number: impl FnMut() -> crate::format::FileNumber,
    ) -> Result<Vec<CompactionOutput>> {
        let mut entries = Vec::new();
        for file in compaction.inputs.iter().chain(compaction.next_level_inputs.iter()) {
            entries.extend(table_cache.all_entries(file.file_number, file.file_size)?);
        }
        entries.sort_by(|(a, _), (b, _)| format::compare_internal_keys(a, b, |x, y| self.comparator.compare(x, y)));

        let kept = self.apply_drop_rules(entries, drop_horizon, &mut is_base_level_for_key);
        self.write_split_outputs(kept, compaction, &mut new_file_number)
    }

    /// Rule A: any entry shadowed by a more recent one for the same user key, at or below the
    /// drop horizon, can never be observed again and is dropped. Rule B: a tombstone at or below
    /// the horizon can be dropped entirely once no deeper level could still hold the key it
    /// shadows.
    fn apply_drop_rules(
        &self,
        entries: Vec<(Vec<u8>, Vec<u8>)>,
        drop_horizon: Option<SequenceNumber>,
        is_base_level_for_key: &mut impl FnMut(&[u8]) -> bool,
    ) -> Vec<(Vec<u8>, Vec<u8>)> {
        let horizon = drop_horizon.unwrap_or(SequenceNumber::ZERO);
        let mut kept = Vec::with_capacity(entries.len());
        let mut last_user_key: Option<Vec<u8>> = None;

        for (internal_key, value) in entries {
            let decoded = match format::InternalKey::decode(&internal_key) {
                Ok(decoded) => decoded,
                Err(_) => continue,
            };
            let is_first_for_key = last_user_key.as_deref() != Some(decoded.user_key);
            last_user_key = Some(decoded.user_key.to_vec());

            if !is_first_for_key && decoded.sequence <= horizon {
                // Rule A: shadowed by a newer entry for the same key that's already in `kept`.
                continue;
            }
            if is_first_for_key
                && decoded.entry_type == format::EntryType::Deletion
                && decoded.sequence <= horizon
                && is_base_level_for_key(decoded.user_key)
            {
                // Rule B: the tombstone itself has aged out and nothing below can still need it.
                continue;
            }
            kept.push((internal_key, value));
        }
        kept
    }

    fn write_single_file(&self, entries: Vec<(Vec<u8>, Vec<u8>)>, mut new_file_number: impl FnMut() -> crate::format::FileNumber) -> Result<Option<CompactionOutput>> {
        if entries.is_empty() {
            return Ok(None);
        }
        let file_number = new_file_number();
        let summary = self.write_table(file_number, &entries)?;
        Ok(Some(CompactionOutput { file_number, summary }))
    }

    /// Splits `entries` across as many output files as needed: a new file starts once the
    /// current one reaches `target_file_size` or has accumulated too much overlap with the
    /// grandparent level, but never in the middle of a run of entries sharing one user key.
    fn write_split_outputs(
        &self,
        entries: Vec<(Vec<u8>, Vec<u8>)>,
        compaction: &Compaction,
        new_file_number: &mut impl FnMut() -> crate::format::FileNumber,
    ) -> Result<Vec<CompactionOutput>> {
        let mut outputs = Vec::new();
        let mut current = Vec::new();
        let mut grandparent_index = 0;
        let mut grandparent_overlap_bytes: u64 = 0;

        for (index, (internal_key, value)) in entries.iter().enumerate() {
            while grandparent_index < compaction.grandparents.len()
                && self.comparator.compare(
                    format::user_key_of(&compaction.grandparents[grandparent_index].largest),
                    format::user_key_of(internal_key),
                ) == std::cmp::Ordering::Less
            {
                grandparent_overlap_bytes += compaction.grandparents[grandparent_index].file_size;
                grandparent_index += 1;
            }

            current.push((internal_key.clone(), value.clone()));

            let current_bytes: usize = current.iter().map(|(k, v)| k.len() + v.len()).sum();
            let should_close = current_bytes as u64 >= self.options.target_file_size
                || grandparent_overlap_bytes >= self.options.grandparent_overlap_limit;

            let next_has_same_user_key = entries
                .get(index + 1)
                .is_some_and(|(next_key, _)| format::user_key_of(next_key) == format::user_key_of(internal_key));

            if should_close && !next_has_same_user_key {
                let file_number = new_file_number();
                let summary = self.write_table(file_number, &current)?;
                outputs.push(CompactionOutput { file_number, summary });
                current.clear();
                grandparent_overlap_bytes = 0;
            }
        }

        if !current.is_empty() {
            let file_number = new_file_number();
            let summary = self.write_table(file_number, &current)?;
            outputs.push(CompactionOutput { file_number, summary });
        }

        Ok(outputs)
    }

    fn write_table(&self, file_number: crate::format::FileNumber, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<TableSummary> {
        let path = self.db_path.join(DbFileName::Table { file_number }.file_name());
        let file = self.fs.create(&path)?;
        let mut writer = TableWriter::new(
            file,
            self.options.filter_policy.clone(),
            self.options.compression,
            self.options.block_size,
            self.options.block_restart_interval,
        );
        for (key, value) in entries {
            writer.add(key, value)?;
        }
        writer.finish()
    }
}

/// Folds a compaction's outputs and consumed inputs into a [`VersionEdit`].
pub fn edit_for_compaction(compaction: &Compaction, outputs: &[CompactionOutput]) -> VersionEdit {
    let mut edit = VersionEdit::new();
    if compaction.advances_compact_pointer {
        if let Some(first) = compaction.inputs.first() {
            edit.set_compact_pointer(compaction.level, first.largest.clone());
        }
    }
    for file in &compaction.inputs {
        edit.delete_file(compaction.level, file.file_number);
    }
    for file in &compaction.next_level_inputs {
        edit.delete_file(compaction.level + 1, file.file_number);
    }
    for output in outputs {
        let metadata = FileMetadata::new(
            output.file_number,
            output.summary.file_size,
            output.summary.smallest_key.clone(),
            output.summary.largest_key.clone(),
        );
        edit.add_file(compaction.level + 1, metadata);
    }
    edit
}

/// Folds a memtable flush's single output into a `VersionEdit` targeting `level`, as chosen by
/// [`crate::compaction::CompactionPicker::pick_level_for_memtable_output`].
pub fn edit_for_flush(output: &CompactionOutput, level: u8) -> VersionEdit {
    let mut edit = VersionEdit::new();
    let metadata = FileMetadata::new(
        output.file_number,
        output.summary.file_size,
        output.summary.smallest_key.clone(),
        output.summary.largest_key.clone(),
    );
    edit.add_file(level, metadata);
    edit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;
    use crate::compaction::CompactionPicker;
    use crate::filesystem::MemoryFileSystem;
    use crate::format::{EntryType, InternalKey};
    use crate::version::Version;

    fn key(user_key: &str, sequence: u64, entry_type: EntryType) -> Vec<u8> {
        InternalKey { user_key: user_key.as_bytes(), sequence: SequenceNumber(sequence), entry_type }.encode()
    }

    fn compactor() -> Compactor<MemoryFileSystem> {
        Compactor::new(
            Arc::new(MemoryFileSystem::new()),
            PathBuf::from("/db"),
            Arc::new(BytewiseComparator),
            CompactorOptions {
                target_file_size: 1024 * 1024,
                grandparent_overlap_limit: 10 * 1024 * 1024,
                block_size: 4096,
                block_restart_interval: 16,
                compression: CompressionKind::None,
                filter_policy: None,
            },
        )
    }

    #[test]
    fn flush_carries_tombstones_over_as_entries() {
        let memtable = Memtable::new(Arc::new(BytewiseComparator));
        memtable.insert(b"a", SequenceNumber(1), EntryType::Value, Some(b"1"));
        memtable.insert(b"b", SequenceNumber(2), EntryType::Deletion, None);

        let compactor = compactor();
        let mut next = 10_u64;
        let output = compactor.flush_memtable(&memtable, || {
            let n = next;
            next += 1;
            crate::format::FileNumber(n)
        }).unwrap().unwrap();
        assert_eq!(output.summary.num_entries, 2);
    }

    #[test]
    fn shadowed_entry_below_horizon_is_dropped() {
        let compactor = compactor();
        let entries = vec![
            (key("k", 5, EntryType::Value), b"new".to_vec()),
            (key("k", 1, EntryType::Value), b"old".to_vec()),
        ];
        let kept = compactor.apply_drop_rules(entries, Some(SequenceNumber(5)), &mut |_| true);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].1, b"new".to_vec());
    }

    #[test]
    fn aged_tombstone_dropped_only_at_base_level() {
        let compactor = compactor();
        let entries = vec![(key("k", 1, EntryType::Deletion), Vec::new())];
        let kept_not_base = compactor.apply_drop_rules(entries.clone(), Some(SequenceNumber(5)), &mut |_| false);
        assert_eq!(kept_not_base.len(), 1);
        let kept_base = compactor.apply_drop_rules(entries, Some(SequenceNumber(5)), &mut |_| true);
        assert!(kept_base.is_empty());
    }

    #[test]
    fn run_compaction_produces_deleted_inputs_and_new_outputs() {
        let fs = Arc::new(MemoryFileSystem::new());
        let cmp: Arc<dyn Comparator> = Arc::new(BytewiseComparator);
        let db_path = PathBuf::from("/db");
        let table_cache = TableCache::new(fs.clone(), db_path.clone(), cmp.clone(), None, 10);
        let compactor_options = CompactorOptions {
            target_file_size: 1024 * 1024,
            grandparent_overlap_limit: 10 * 1024 * 1024,
            block_size: 4096,
            block_restart_interval: 16,
            compression: CompressionKind::None,
            filter_policy: None,
        };
        let compactor = Compactor::new(fs.clone(), db_path.clone(), cmp, compactor_options);

        let entries = vec![
            (key("a", 1, EntryType::Value), b"1".to_vec()),
            (key("b", 1, EntryType::Value), b"2".to_vec()),
        ];
        let file_number = crate::format::FileNumber(1);
        let summary = compactor.write_table(file_number, &entries).unwrap();
        let metadata = Arc::new(FileMetadata::new(file_number, summary.file_size, summary.smallest_key, summary.largest_key));

        let mut version = Version::empty();
        version.files_mut(0).push(metadata);
        let picker = CompactionPicker::new(&BytewiseComparator, 1024 * 1024);
        let compaction = picker.pick_size_driven(&version, 0, None).unwrap();

        let mut next = 100_u64;
        let outputs = compactor.run(&table_cache, &compaction, None, |_| true, || {
            let n = next;
            next += 1;
            crate::format::FileNumber(n)
        }).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].summary.num_entries, 2);

        let edit = edit_for_compaction(&compaction, &outputs);
        assert_eq!(edit.deleted_files, vec![(0, file_number)]);
        assert_eq!(edit.new_files.len(), 1);
    }
}
