//! Picks the next compaction to run: which files, from which levels, and why.
//!
//! Two trigger kinds compete for the "highest priority" compaction each round:
//! - **Size-driven**: the level `Version::finalize` flagged as over its byte/file-count budget.
//! - **Seek-driven**: a single level-0 (today, any level) file whose `allowed_seeks` budget hit
//!   zero, because repeated lookups had to fall through it without being served there.
//!
//! Size-driven compactions take priority when both are pending.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::config_constants::{
    EXPANDED_COMPACTION_BYTE_LIMIT_FACTOR, GRANDPARENT_OVERLAP_FACTOR,
    MAX_GRANDPARENT_OVERLAP_FOR_TRIVIAL_MOVE, MAX_MEM_COMPACT_LEVEL, NUM_LEVELS_USIZE,
};
use crate::format::{self, SequenceNumber};
use crate::version::{level_byte_budget, FileMetadata, Version};

/// A compaction about to run: which level (`level`) is merged with the overlapping files one
/// level down (`level + 1`), plus the grandparent (`level + 2`) file list used to bound output
/// file sizes.
#[derive(Debug)]
pub struct Compaction {
    pub level: u8,
    pub inputs: Vec<Arc<FileMetadata>>,
    pub next_level_inputs: Vec<Arc<FileMetadata>>,
    pub grandparents: Vec<Arc<FileMetadata>>,
    /// `true` when this compaction can be satisfied by simply moving the single input file to
    /// `level + 1` without reading or rewriting any data.
    pub is_trivial_move: bool,
    /// `true` for a size-driven pick: the caller should advance `level`'s compact pointer to
    /// `inputs[0]`'s largest key so the next size-driven compaction of this level resumes past
    /// it, rather than restarting from the smallest-keyed file every time.
    pub advances_compact_pointer: bool,
}

impl Compaction {
    #[must_use]
    pub fn is_single_input_file_move(&self) -> bool {
        self.is_trivial_move
    }
}

pub struct CompactionPicker<'a> {
    comparator: &'a dyn Comparator,
    target_file_size: u64,
}

impl<'a> CompactionPicker<'a> {
    #[must_use]
    pub fn new(comparator: &'a dyn Comparator, target_file_size: u64) -> Self {
        Self { comparator, target_file_size }
    }

    /// Picks a compaction driven by a level's compaction score, seeded from `compact_pointer` so
    /// repeated size-driven compactions of the same level sweep the whole keyspace round-robin
    /// rather than always starting at the smallest key.
    #[must_use]
    pub fn pick_size_driven(&self, version: &Version, level: u8, compact_pointer: Option<&[u8]>) -> Option<Compaction> {
        let files = version.files(level);
        if files.is_empty() {
            return None;
        }

        let chosen = if level == 0 {
            files.to_vec()
        } else {
            let start = compact_pointer
                .and_then(|pointer| {
                    files.iter().find(|f| self.comparator.compare(format::user_key_of(&f.largest), format::user_key_of(pointer)) == Ordering::Greater)
                })
                .unwrap_or(&files[0]);
            vec![start.clone()]
        };

        Some(self.finish_picking(version, level, chosen, true))
    }

    /// Picks a compaction of the single file whose seek budget was just exhausted.
    #[must_use]
    pub fn pick_seek_driven(&self, version: &Version, level: u8, file: Arc<FileMetadata>) -> Compaction {
        self.finish_picking(version, level, vec![file], false)
    }

    /// Picks a compaction covering every file in `[start, end]` at `level` — the backing
    /// implementation of `compact_range`, possibly expanded across several calls by the caller
    /// when a single compaction can't cover the whole requested range.
    #[must_use]
    pub fn pick_range(&self, version: &Version, level: u8, start: &[u8], end: &[u8]) -> Option<Compaction> {
        let files = version.overlapping_files(level, start, end, self.comparator);
        if files.is_empty() {
            return None;
        }
        Some(self.finish_picking(version, level, files, false))
    }

    /// Where a memtable flush's output table should land: level 0 unless it overlaps no file
    /// there, in which case it's pushed down (up to [`MAX_MEM_COMPACT_LEVEL`]) as long as the
    /// next level still has no overlap and the level-two-down grandparent overlap stays under
    /// budget — the same reasoning a major compaction uses to bound how much re-compaction work
    /// a single file can cause later.
    #[must_use]
    pub fn pick_level_for_memtable_output(&self, version: &Version, smallest_user_key: &[u8], largest_user_key: &[u8]) -> u8 {
        let lo = format::seek_key(smallest_user_key, SequenceNumber::ZERO);
        let hi = format::seek_key(largest_user_key, SequenceNumber::ZERO);

        let mut level = 0_u8;
        if version.overlapping_files(0, &lo, &hi, self.comparator).is_empty() {
            while level < MAX_MEM_COMPACT_LEVEL {
                if !version.overlapping_files(level + 1, &lo, &hi, self.comparator).is_empty() {
                    break;
                }
                if ((level + 2) as usize) < NUM_LEVELS_USIZE {
                    let overlap_bytes: u64 = version
                        .overlapping_files(level + 2, &lo, &hi, self.comparator)
                        .iter()
                        .map(|f| f.file_size)
                        .sum();
                    if overlap_bytes > self.grandparent_overlap_limit() {
                        break;
                    }
                }
                level += 1;
            }
        }
        level
    }

    fn finish_picking(&self, version: &Version, level: u8, mut inputs: Vec<Arc<FileMetadata>>, advances_compact_pointer: bool) -> Compaction {
        let (mut smallest, mut largest) = key_range(&inputs, self.comparator);

        if level == 0 {
            // Level 0 files can overlap each other, so expand to every level-0 file that
            // overlaps the chosen range, and repeat until the range stops growing.
            loop {
                let expanded = version.overlapping_files(0, &smallest, &largest, self.comparator);
                if expanded.len() == inputs.len() {
                    break;
                }
                inputs = expanded;
                let (new_smallest, new_largest) = key_range(&inputs, self.comparator);
                smallest = new_smallest;
                largest = new_largest;
            }
        }

        add_boundary_inputs(version, level, self.comparator, &mut inputs);
        let (smallest, largest) = key_range(&inputs, self.comparator);

        let next_level = level + 1;
        let mut next_level_inputs = if (next_level as usize) < NUM_LEVELS_USIZE {
            version.overlapping_files(next_level, &smallest, &largest, self.comparator)
        } else {
            Vec::new()
        };

        let (mut total_smallest, mut total_largest) = key_range(&inputs, self.comparator);
        if !next_level_inputs.is_empty() {
            let (next_smallest, next_largest) = key_range(&next_level_inputs, self.comparator);
            total_smallest = min_key(&total_smallest, &next_smallest, self.comparator);
            total_largest = max_key(&total_largest, &next_largest, self.comparator);
        }

        // Try to grow `inputs` (without touching `next_level_inputs`) as long as doing so
        // doesn't pull in more next-level files and doesn't exceed the byte budget for "free"
        // expansion.
        if !next_level_inputs.is_empty() {
            let mut expanded_inputs = version.overlapping_files(level, &total_smallest, &total_largest, self.comparator);
            add_boundary_inputs(version, level, self.comparator, &mut expanded_inputs);
            let expanded_bytes: u64 = expanded_inputs.iter().map(|f| f.file_size).sum();
            let budget = self.target_file_size * EXPANDED_COMPACTION_BYTE_LIMIT_FACTOR;
            if expanded_inputs.len() > inputs.len() && expanded_bytes < budget {
                let (exp_smallest, exp_largest) = key_range(&expanded_inputs, self.comparator);
                let re_expanded_next = version.overlapping_files(next_level, &exp_smallest, &exp_largest, self.comparator);
                if re_expanded_next.len() == next_level_inputs.len() {
                    inputs = expanded_inputs;
                    total_smallest = exp_smallest;
                    total_largest = exp_largest;
                    next_level_inputs = re_expanded_next;
                }
            }
        }

        let grandparent_level = level + 2;
        let grandparents = if (grandparent_level as usize) < NUM_LEVELS_USIZE {
            version.overlapping_files(grandparent_level, &total_smallest, &total_largest, self.comparator)
        } else {
            Vec::new()
        };

        let is_trivial_move = next_level_inputs.is_empty()
            && inputs.len() == 1
            && grandparents.iter().map(|f| f.file_size).sum::<u64>()
                <= self.target_file_size * MAX_GRANDPARENT_OVERLAP_FOR_TRIVIAL_MOVE;

        Compaction { level, inputs, next_level_inputs, grandparents, is_trivial_move, advances_compact_pointer }
    }

    /// The running total of grandparent-overlap bytes at which a compaction's current output
    /// file should be closed and a new one started, bounding how much any single output file
    /// can overlap the level two below it.
    #[must_use]
    pub fn grandparent_overlap_limit(&self) -> u64 {
        self.target_file_size * GRANDPARENT_OVERLAP_FACTOR
    }
}

/// Pulls in any file at `level`, not already in `inputs`, whose smallest key shares a user key
/// with `inputs`' current largest key. Such a pair only arises when one user key's versions were
/// split across two adjacent files at compaction-output time; leaving the second file out of the
/// compaction would let a subsequent read land on the file that wasn't rewritten and see a value
/// this compaction was supposed to have superseded or dropped.
fn add_boundary_inputs(version: &Version, level: u8, comparator: &dyn Comparator, inputs: &mut Vec<Arc<FileMetadata>>) {
    loop {
        let Some(largest) = inputs
            .iter()
            .map(|f| f.largest.clone())
            .max_by(|a, b| format::compare_internal_keys(a, b, |x, y| comparator.compare(x, y)))
        else {
            return;
        };
        let largest_user_key = format::user_key_of(&largest).to_vec();
        let included: HashSet<_> = inputs.iter().map(|f| f.file_number).collect();

        let candidate = version.files(level).iter().find(|f| {
            !included.contains(&f.file_number)
                && comparator.compare(format::user_key_of(&f.smallest), &largest_user_key) == Ordering::Equal
        });

        match candidate {
            Some(file) => inputs.push(file.clone()),
            None => return,
        }
    }
}

fn key_range(files: &[Arc<FileMetadata>], cmp: &dyn Comparator) -> (Vec<u8>, Vec<u8>) {
    let mut smallest = files[0].smallest.clone();
    let mut largest = files[0].largest.clone();
    for file in &files[1..] {
        smallest = min_key(&smallest, &file.smallest, cmp);
        largest = max_key(&largest, &file.largest, cmp);
    }
    (smallest, largest)
}

fn min_key(a: &[u8], b: &[u8], cmp: &dyn Comparator) -> Vec<u8> {
    if cmp.compare(format::user_key_of(a), format::user_key_of(b)) != Ordering::Greater { a.to_vec() } else { b.to_vec() }
}

fn max_key(a: &[u8], b: &[u8], cmp: &dyn Comparator) -> Vec<u8> {
    if cmp.compare(format::user_key_of(a), format::user_key_of(b)) != Ordering::Less { a.to_vec() } else { b.to_vec() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;
    use crate::format::{FileNumber, SequenceNumber};

    fn file(n: u64, smallest: &str, largest: &str, size: u64) -> Arc<FileMetadata> {
        Arc::new(FileMetadata::new(
            FileNumber(n),
            size,
            format::seek_key(smallest.as_bytes(), SequenceNumber(1)),
            format::seek_key(largest.as_bytes(), SequenceNumber(1)),
        ))
    }

    #[test]
    fn trivial_move_chosen_when_no_overlap_and_no_grandparents() {
        let cmp = BytewiseComparator;
        let mut version = Version::empty();
        version.files_mut(1).push(file(1, "a", "b", 100));
        let picker = CompactionPicker::new(&cmp, 2 * 1024 * 1024);
        let compaction = picker.pick_size_driven(&version, 1, None).unwrap();
        assert!(compaction.is_trivial_move);
    }

    #[test]
    fn level_zero_compaction_expands_to_overlapping_files() {
        let cmp = BytewiseComparator;
        let mut version = Version::empty();
        version.files_mut(0).push(file(1, "a", "m", 100));
        version.files_mut(0).push(file(2, "g", "z", 100));
        let picker = CompactionPicker::new(&cmp, 2 * 1024 * 1024);
        let compaction = picker.pick_size_driven(&version, 0, None).unwrap();
        assert_eq!(compaction.inputs.len(), 2);
    }

    #[test]
    fn size_driven_pick_pulls_in_the_boundary_file_sharing_the_split_key() {
        let cmp = BytewiseComparator;
        let mut version = Version::empty();
        // Two files at level 1 whose key ranges were split mid-user-key: file 1's last entry and
        // file 2's first entry both carry user key "m", just at different sequence numbers.
        let file1 = Arc::new(FileMetadata::new(
            FileNumber(1),
            100,
            format::seek_key(b"a", SequenceNumber(1)),
            format::seek_key(b"m", SequenceNumber(5)),
        ));
        let file2 = Arc::new(FileMetadata::new(
            FileNumber(2),
            100,
            format::seek_key(b"m", SequenceNumber(2)),
            format::seek_key(b"z", SequenceNumber(1)),
        ));
        version.files_mut(1).push(file1);
        version.files_mut(1).push(file2);

        let picker = CompactionPicker::new(&cmp, 2 * 1024 * 1024);
        let compaction = picker.pick_size_driven(&version, 1, None).unwrap();

        let numbers: std::collections::HashSet<_> = compaction.inputs.iter().map(|f| f.file_number).collect();
        assert!(numbers.contains(&FileNumber(1)));
        assert!(numbers.contains(&FileNumber(2)), "boundary file sharing key \"m\" must be pulled into the compaction");
    }

    #[test]
    fn overlapping_next_level_file_rules_out_trivial_move() {
        let cmp = BytewiseComparator;
        let mut version = Version::empty();
        version.files_mut(1).push(file(1, "a", "m", 100));
        version.files_mut(2).push(file(2, "b", "c", 100));
        let picker = CompactionPicker::new(&cmp, 2 * 1024 * 1024);
        let compaction = picker.pick_size_driven(&version, 1, None).unwrap();
        assert!(!compaction.is_trivial_move);
        assert_eq!(compaction.next_level_inputs.len(), 1);
    }
}
