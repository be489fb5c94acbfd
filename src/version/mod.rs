//! Immutable snapshots of the set of on-disk table files ([`Version`]), the sparse deltas that
//! transform one version into the next ([`edit::VersionEdit`]), the accumulator that applies a
//! batch of edits ([`builder::VersionBuilder`]), and the mutable registry of the current and
//! still-referenced-by-a-snapshot versions ([`set::VersionSet`]).

pub mod builder;
pub mod edit;
pub mod file_metadata;
pub mod set;

use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::config_constants::{MAX_BYTES_FOR_LEVEL_BASE, MAX_BYTES_MULTIPLIER, NUM_LEVELS_USIZE};
use crate::format;

pub use file_metadata::FileMetadata;

/// An immutable snapshot of every table file known to the database, grouped by level, plus the
/// derived compaction score used to pick the next compaction. `Version`s are kept alive by
/// `Arc` for as long as a `Version`-holding [`Snapshot`](crate::snapshot::Snapshot) or in-flight
/// read references them, and are otherwise dropped once superseded in the `VersionSet`.
#[derive(Debug)]
pub struct Version {
    levels: [Vec<Arc<FileMetadata>>; NUM_LEVELS_USIZE],
    /// The level whose files-size-over-budget ratio (for level >= 1) or file count (for level 0)
    /// is highest, and that ratio itself. `None` once no level exceeds its budget.
    compaction_score: Option<(u8, f64)>,
}

impl Version {
    #[must_use]
    pub fn empty() -> Self {
        Self { levels: Default::default(), compaction_score: None }
    }

    #[must_use]
    pub fn files(&self, level: u8) -> &[Arc<FileMetadata>] {
        &self.levels[level as usize]
    }

    pub(crate) fn files_mut(&mut self, level: u8) -> &mut Vec<Arc<FileMetadata>> {
        &mut self.levels[level as usize]
    }

    #[must_use]
    pub fn num_files_at_level(&self, level: u8) -> usize {
        self.levels[level as usize].len()
    }

    /// The highest-priority level to compact next, if any level is over budget.
    #[must_use]
    pub fn compaction_level(&self) -> Option<u8> {
        self.compaction_score.map(|(level, _)| level)
    }

    #[must_use]
    pub fn compaction_score(&self) -> Option<f64> {
        self.compaction_score.map(|(_, score)| score)
    }

    /// Recomputes `compaction_score` from the current file lists. Must be called after any
    /// mutation of `levels` (done by [`builder::VersionBuilder::finish`]).
    pub(crate) fn finalize(&mut self, l0_compaction_trigger: usize) {
        let mut best: Option<(u8, f64)> = None;

        let l0_score = self.levels[0].len() as f64 / l0_compaction_trigger as f64;
        if l0_score > 1.0 {
            best = Some((0, l0_score));
        }

        for level in 1..NUM_LEVELS_USIZE - 1 {
            let bytes: u64 = self.levels[level].iter().map(|f| f.file_size).sum();
            let budget = level_byte_budget(level as u8);
            #[allow(clippy::cast_precision_loss)]
            let score = bytes as f64 / budget as f64;
            if score > 1.0 && best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((level as u8, score));
            }
        }

        self.compaction_score = best;
    }

    /// Finds every file at `level` whose key range overlaps `[smallest, largest]` (both
    /// encoded internal keys, inclusive). For level 0, files may overlap each other, so the
    /// search isn't a binary search and the match isn't necessarily contiguous.
    #[must_use]
    pub fn overlapping_files(&self, level: u8, smallest: &[u8], largest: &[u8], cmp: &dyn Comparator) -> Vec<Arc<FileMetadata>> {
        self.levels[level as usize]
            .iter()
            .filter(|file| ranges_overlap(&file.smallest, &file.largest, smallest, largest, cmp))
            .cloned()
            .collect()
    }

    /// Looks up the most recent entry for `user_key` at or before `sequence`, searching level 0
    /// newest-file-first and levels >= 1 via binary search, stopping at the first level whose
    /// files can cover the key at all.
    ///
    /// Delegates the actual block/file I/O to `read_file`, so this can be exercised without a
    /// real `TableCache`.
    pub fn get(
        &self,
        user_key: &[u8],
        sequence: SequenceNumberCompat,
        cmp: &dyn Comparator,
        mut read_file: impl FnMut(&FileMetadata, &[u8]) -> crate::error::Result<Option<Option<Vec<u8>>>>,
    ) -> crate::error::Result<Option<Option<Vec<u8>>>> {
        let lookup_key = format::seek_key(user_key, sequence.0);

        let mut l0_candidates: Vec<&Arc<FileMetadata>> = self.levels[0]
            .iter()
            .filter(|file| {
                cmp.compare(user_key, strip_tag(&file.smallest)) != Ordering::Less
                    && cmp.compare(user_key, strip_tag(&file.largest)) != Ordering::Greater
            })
            .collect();
        l0_candidates.sort_by_key(|file| std::cmp::Reverse(file.file_number.0));

        for file in l0_candidates {
            if let Some(result) = read_file(file, &lookup_key)? {
                return Ok(Some(result));
            }
        }

        for level in 1..NUM_LEVELS_USIZE {
            let files = &self.levels[level];
            let index = files.partition_point(|file| cmp.compare(strip_tag(&file.largest), user_key) == Ordering::Less);
            if let Some(file) = files.get(index) {
                if cmp.compare(user_key, strip_tag(&file.smallest)) != Ordering::Less {
                    if let Some(result) = read_file(file, &lookup_key)? {
                        return Ok(Some(result));
                    }
                }
            }
        }

        Ok(None)
    }
}

/// A thin wrapper so `Version::get`'s signature doesn't need to name `format::SequenceNumber`
/// at every call site that only has the concept of "a snapshot sequence".
#[derive(Debug, Clone, Copy)]
pub struct SequenceNumberCompat(pub format::SequenceNumber);

fn strip_tag(encoded_internal_key: &[u8]) -> &[u8] {
    format::user_key_of(encoded_internal_key)
}

fn ranges_overlap(a_smallest: &[u8], a_largest: &[u8], b_smallest: &[u8], b_largest: &[u8], cmp: &dyn Comparator) -> bool {
    cmp.compare(strip_tag(a_smallest), strip_tag(b_largest)) != Ordering::Greater
        && cmp.compare(strip_tag(b_smallest), strip_tag(a_largest)) != Ordering::Greater
}

#[must_use]
pub fn level_byte_budget(level: u8) -> u64 {
    debug_assert!(level >= 1);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let budget = MAX_BYTES_FOR_LEVEL_BASE * MAX_BYTES_MULTIPLIER.powi(i32::from(level) - 1);
    budget as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;

    #[test]
    fn level_byte_budget_grows_by_multiplier_per_level() {
        let l1 = level_byte_budget(1);
        let l2 = level_byte_budget(2);
        assert_eq!(l2, l1 * 10);
    }

    #[test]
    fn finalize_flags_level_zero_once_trigger_exceeded() {
        let mut version = Version::empty();
        for n in 0..5 {
            version.files_mut(0).push(Arc::new(FileMetadata::new(
                crate::format::FileNumber(n),
                100,
                vec![0; 9],
                vec![0xff; 9],
            )));
        }
        version.finalize(4);
        assert_eq!(version.compaction_level(), Some(0));
    }

    #[test]
    fn ranges_overlap_detects_disjoint_ranges() {
        let cmp = BytewiseComparator;
        let a_smallest = crate::format::seek_key(b"a", crate::format::SequenceNumber(1));
        let a_largest = crate::format::seek_key(b"c", crate::format::SequenceNumber(1));
        let b_smallest = crate::format::seek_key(b"d", crate::format::SequenceNumber(1));
        let b_largest = crate::format::seek_key(b"f", crate::format::SequenceNumber(1));
        assert!(!ranges_overlap(&a_smallest, &a_largest, &b_smallest, &b_largest, &cmp));
    }
}
