//! Applies a batch of [`VersionEdit`]s to a base [`Version`], producing the next `Version`.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::config_constants::{L0_COMPACTION_TRIGGER, NUM_LEVELS_USIZE};
use crate::format;

use super::edit::VersionEdit;
use super::{FileMetadata, Version};

/// Accumulates the effect of one or more edits on top of a base version. Construct, apply every
/// pending edit, then call [`Self::finish`] once to get the new `Version`.
pub struct VersionBuilder<'a> {
    base: &'a Version,
    deleted: BTreeSet<(u8, crate::format::FileNumber)>,
    added: [Vec<Arc<FileMetadata>>; NUM_LEVELS_USIZE],
}

impl<'a> VersionBuilder<'a> {
    #[must_use]
    pub fn new(base: &'a Version) -> Self {
        Self { base, deleted: BTreeSet::new(), added: Default::default() }
    }

    pub fn apply(&mut self, edit: &VersionEdit) {
        for &(level, file_number) in &edit.deleted_files {
            self.deleted.insert((level, file_number));
        }
        for new_file in &edit.new_files {
            // `edit.new_files` carries owned `FileMetadata`; `VersionEdit::decode` and
            // `VersionEdit`'s own construction always build a fresh instance, so cloning it into
            // an `Arc` here is the only place that happens.
            self.added[new_file.level as usize].push(Arc::new(clone_metadata(&new_file.metadata)));
        }
    }

    /// Produces the new version: every base file not in `deleted`, plus every `added` file,
    /// each level re-sorted by smallest key (levels >= 1 must end up non-overlapping; debug
    /// builds assert this).
    #[must_use]
    pub fn finish(self, cmp: &dyn Comparator) -> Version {
        let mut version = Version::empty();

        for level in 0..NUM_LEVELS_USIZE {
            #[allow(clippy::cast_possible_truncation)]
            let level_u8 = level as u8;
            let mut files: Vec<Arc<FileMetadata>> = self.base.files(level_u8)
                .iter()
                .filter(|file| !self.deleted.contains(&(level_u8, file.file_number)))
                .cloned()
                .collect();
            files.extend(self.added[level].iter().cloned());

            if level == 0 {
                files.sort_by_key(|file| file.file_number.0);
            } else {
                files.sort_by(|a, b| cmp.compare(format::user_key_of(&a.smallest), format::user_key_of(&b.smallest)));
                debug_assert!(
                    files.windows(2).all(|pair| {
                        cmp.compare(format::user_key_of(&pair[0].largest), format::user_key_of(&pair[1].smallest)) != std::cmp::Ordering::Greater
                    }),
                    "level {level} has overlapping files after applying a version edit",
                );
            }

            *version.files_mut(level_u8) = files;
        }

        version.finalize(L0_COMPACTION_TRIGGER);
        version
    }
}

fn clone_metadata(metadata: &FileMetadata) -> FileMetadata {
    metadata.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;

    #[test]
    fn applying_a_new_file_adds_it_to_the_level() {
        let base = Version::empty();
        let mut builder = VersionBuilder::new(&base);
        let mut edit = VersionEdit::new();
        edit.add_file(1, FileMetadata::new(crate::format::FileNumber(1), 100, vec![0; 9], vec![0xff; 9]));
        builder.apply(&edit);
        let version = builder.finish(&BytewiseComparator);
        assert_eq!(version.num_files_at_level(1), 1);
    }

    #[test]
    fn deleting_a_file_removes_it() {
        let mut base = Version::empty();
        base.files_mut(1).push(Arc::new(FileMetadata::new(crate::format::FileNumber(1), 100, vec![0; 9], vec![0xff; 9])));
        let builder = {
            let mut b = VersionBuilder::new(&base);
            let mut edit = VersionEdit::new();
            edit.delete_file(1, crate::format::FileNumber(1));
            b.apply(&edit);
            b
        };
        let version = builder.finish(&BytewiseComparator);
        assert_eq!(version.num_files_at_level(1), 0);
    }
}
