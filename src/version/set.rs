//! The mutable registry of versions: the current version, older versions still pinned by a
//! snapshot or in-flight compaction, and the monotonically increasing counters (file number,
//! sequence number) that every edit must carry forward.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::config_constants::NUM_LEVELS_USIZE;
use crate::error::Result;
use crate::filesystem::WritableFile;
use crate::format::{FileNumber, SequenceNumber};
use crate::write_log::WriteLogWriter;

use super::builder::VersionBuilder;
use super::edit::VersionEdit;
use super::Version;

/// Tracks the set of versions an active read or compaction may still be looking at, so
/// [`VersionSet::install`] knows it must keep a superseded `Version` around rather than drop it.
#[derive(Debug, Default)]
struct OldVersions(Vec<Arc<Version>>);

impl OldVersions {
    fn retain_live(&mut self) {
        self.0.retain(|v| Arc::strong_count(v) > 1);
    }
}

pub struct VersionSet<File> {
    comparator: Arc<dyn Comparator>,
    current: Arc<Version>,
    old_versions: OldVersions,

    pub log_number: FileNumber,
    pub prev_log_number: FileNumber,
    next_file_number: FileNumber,
    pub last_sequence: SequenceNumber,
    pub manifest_file_number: FileNumber,

    manifest_writer: Option<WriteLogWriter<File>>,
    /// `(level, smallest_key_not_yet_compacted)`, the per-level round-robin starting point for
    /// size-driven compactions.
    compact_pointers: [Option<Vec<u8>>; NUM_LEVELS_USIZE],
    /// File numbers allocated for an in-flight compaction's output but not yet folded into a
    /// `VersionEdit` by `log_and_apply`. Counted as live by [`Self::live_files`] so a concurrent
    /// garbage-collection pass run by the other thread (background vs. a manual `compact_range`)
    /// can't delete a table a compaction is still writing.
    pending_outputs: HashSet<FileNumber>,
}

impl<File: WritableFile> VersionSet<File> {
    #[must_use]
    pub fn new(comparator: Arc<dyn Comparator>, manifest_writer: WriteLogWriter<File>, manifest_file_number: FileNumber) -> Self {
        Self {
            comparator,
            current: Arc::new(Version::empty()),
            old_versions: OldVersions::default(),
            log_number: FileNumber(0),
            prev_log_number: FileNumber(0),
            next_file_number: FileNumber(2),
            last_sequence: SequenceNumber::ZERO,
            manifest_file_number,
            manifest_writer: Some(manifest_writer),
            compact_pointers: Default::default(),
            pending_outputs: HashSet::new(),
        }
    }

    #[must_use]
    pub fn current(&self) -> Arc<Version> {
        self.current.clone()
    }

    pub fn new_file_number(&mut self) -> FileNumber {
        let n = self.next_file_number;
        self.next_file_number = FileNumber(self.next_file_number.0 + 1);
        n
    }

    /// Allocates a file number for a compaction output and registers it as pending until
    /// [`Self::clear_pending_output`] is called, so it survives any garbage collection pass that
    /// runs before the edit naming it is installed.
    pub fn new_output_file_number(&mut self) -> FileNumber {
        let n = self.new_file_number();
        self.pending_outputs.insert(n);
        n
    }

    /// Releases a previously pending output, once the edit that installs it (or discards it
    /// outright) has been decided.
    pub fn clear_pending_output(&mut self, file_number: FileNumber) {
        self.pending_outputs.remove(&file_number);
    }

    /// Reuses `file_number` if it's the most recently issued one, so a file created but then
    /// discarded before being referenced by any version doesn't burn a number permanently.
    pub fn reuse_file_number(&mut self, file_number: FileNumber) {
        if self.next_file_number.0 == file_number.0 + 1 {
            self.next_file_number = file_number;
        }
    }

    pub fn compact_pointer(&self, level: u8) -> Option<&[u8]> {
        self.compact_pointers[level as usize].as_deref()
    }

    /// Seeds state recovered from the MANIFEST into a freshly constructed set, before the first
    /// `log_and_apply` of the new process's lifetime.
    pub fn seed_recovered(&mut self, next_file_number: FileNumber, compact_pointers: CompactPointers) {
        self.next_file_number = next_file_number;
        for (level, key) in compact_pointers {
            self.compact_pointers[level as usize] = Some(key);
        }
    }

    /// Applies `edit` to the current version, appends it to the MANIFEST, fsyncs, and installs
    /// the new version as current, all under the caller's exclusive access (the writer queue
    /// or the single compaction thread — never both at once).
    ///
    /// On success, `edit`'s compact-pointer entries are folded into this set's round-robin
    /// state and `log_number`/`prev_log_number` are updated from the edit's own fields if
    /// present.
    pub fn log_and_apply(&mut self, mut edit: VersionEdit) -> Result<()> {
        edit.next_file_number.get_or_insert(self.next_file_number);
        edit.last_sequence.get_or_insert(self.last_sequence);

        let mut builder = VersionBuilder::new(&self.current);
        builder.apply(&edit);
        let new_version = builder.finish(&*self.comparator);

        let mut buf = Vec::new();
        edit.encode(&mut buf);

        let writer = self
            .manifest_writer
            .as_mut()
            .expect("manifest writer is only absent during a panic mid log_and_apply");
        writer.add_record(&buf)?;
        writer.sync()?;

        for (level, key) in edit.compact_pointers {
            self.compact_pointers[level as usize] = Some(key);
        }
        if let Some(log_number) = edit.log_number {
            self.log_number = log_number;
        }
        if let Some(prev_log_number) = edit.prev_log_number {
            self.prev_log_number = prev_log_number;
        }

        let old = std::mem::replace(&mut self.current, Arc::new(new_version));
        self.old_versions.0.push(old);
        self.old_versions.retain_live();

        Ok(())
    }

    /// Swaps in a version built during recovery without writing a MANIFEST record (the edits
    /// that produced it were already durably logged).
    pub fn install_recovered(&mut self, version: Version) {
        self.current = Arc::new(version);
    }

    /// Every file number a delete pass must not touch: referenced by the current version, by a
    /// superseded version some snapshot or in-flight read still pins, or allocated to a
    /// compaction output that hasn't been installed (or discarded) yet.
    #[must_use]
    pub fn live_files(&self) -> HashSet<FileNumber> {
        let mut live = HashSet::new();
        for level in 0..NUM_LEVELS_USIZE {
            #[allow(clippy::cast_possible_truncation)]
            let level_u8 = level as u8;
            live.extend(self.current.files(level_u8).iter().map(|f| f.file_number));
            for old in &self.old_versions.0 {
                live.extend(old.files(level_u8).iter().map(|f| f.file_number));
            }
        }
        live.extend(self.pending_outputs.iter().copied());
        live
    }
}

/// The per-level compact-pointer map persisted across a MANIFEST, exposed for recovery to seed
/// a freshly-constructed `VersionSet` before the first `log_and_apply`.
pub type CompactPointers = BTreeMap<u8, Vec<u8>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;
    use crate::filesystem::{FileSystem, MemoryFileSystem};

    fn new_set() -> VersionSet<crate::filesystem::mem_fs::MemWritable> {
        let fs = MemoryFileSystem::new();
        let file = fs.create(std::path::Path::new("MANIFEST-000001")).unwrap();
        VersionSet::new(Arc::new(BytewiseComparator), WriteLogWriter::new(file), FileNumber(1))
    }

    #[test]
    fn new_file_numbers_increase_monotonically() {
        let mut set = new_set();
        let a = set.new_file_number();
        let b = set.new_file_number();
        assert!(b.0 > a.0);
    }

    #[test]
    fn log_and_apply_installs_a_new_current_version() {
        let mut set = new_set();
        let mut edit = VersionEdit::new();
        edit.add_file(0, crate::version::FileMetadata::new(FileNumber(10), 100, vec![0; 9], vec![0xff; 9]));
        set.log_and_apply(edit).unwrap();
        assert_eq!(set.current().num_files_at_level(0), 1);
    }
}
