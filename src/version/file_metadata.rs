use std::sync::atomic::{AtomicI32, Ordering};

use crate::config_constants::{BYTES_PER_ALLOWED_SEEK, MIN_ALLOWED_SEEKS};
use crate::format::FileNumber;

/// Per-file metadata tracked inside a [`Version`](super::Version): identity, key range, size,
/// and the seek-compaction budget.
#[derive(Debug)]
pub struct FileMetadata {
    pub file_number: FileNumber,
    pub file_size: u64,
    /// Smallest encoded internal key covered by this file, inclusive.
    pub smallest: Vec<u8>,
    /// Largest encoded internal key covered by this file, inclusive.
    pub largest: Vec<u8>,
    /// Counts down on every seek that had to examine this file alongside at least one other;
    /// reaching zero schedules a seek-driven compaction for this file.
    allowed_seeks: AtomicI32,
}

impl FileMetadata {
    #[must_use]
    pub fn new(file_number: FileNumber, file_size: u64, smallest: Vec<u8>, largest: Vec<u8>) -> Self {
        let allowed_seeks = allowed_seeks_for_size(file_size);
        Self { file_number, file_size, smallest, largest, allowed_seeks: AtomicI32::new(allowed_seeks) }
    }

    /// Records a seek that charged against this file's budget. Returns `true` the first time
    /// the budget is exhausted (the caller should schedule a seek-compaction for this file
    /// exactly once).
    pub fn charge_seek(&self) -> bool {
        let prev = self.allowed_seeks.fetch_sub(1, Ordering::Relaxed);
        prev == 1
    }

    #[must_use]
    pub fn allowed_seeks_remaining(&self) -> i32 {
        self.allowed_seeks.load(Ordering::Relaxed)
    }
}

fn allowed_seeks_for_size(file_size: u64) -> i32 {
    let from_size = i32::try_from(file_size / BYTES_PER_ALLOWED_SEEK).unwrap_or(i32::MAX);
    from_size.max(i32::try_from(MIN_ALLOWED_SEEKS).expect("fits in i32"))
}

impl Clone for FileMetadata {
    fn clone(&self) -> Self {
        Self {
            file_number: self.file_number,
            file_size: self.file_size,
            smallest: self.smallest.clone(),
            largest: self.largest.clone(),
            allowed_seeks: AtomicI32::new(self.allowed_seeks.load(Ordering::Relaxed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_files_get_the_minimum_seek_budget() {
        let meta = FileMetadata::new(FileNumber(1), 1024, vec![], vec![]);
        assert_eq!(meta.allowed_seeks_remaining(), MIN_ALLOWED_SEEKS as i32);
    }

    #[test]
    fn charge_seek_reports_exhaustion_exactly_once() {
        let meta = FileMetadata::new(FileNumber(1), 0, vec![], vec![]);
        for _ in 0..MIN_ALLOWED_SEEKS - 1 {
            assert!(!meta.charge_seek());
        }
        assert!(meta.charge_seek());
        assert!(!meta.charge_seek());
    }
}
