//! Deletes files a database directory no longer needs: table files superseded by a compaction,
//! WAL segments older than the current `log_number`, and all but the current MANIFEST.
//!
//! The live set must be computed under the database's lock (so it can't race a concurrent
//! compaction's `log_and_apply`), but the actual `remove_file` calls are slow and don't need the
//! lock, so callers are expected to compute [`obsolete_files`] while holding it and then call
//! [`delete_files`] after releasing it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::database_files::DbFileName;
use crate::filesystem::FileSystem;
use crate::format::FileNumber;

/// Everything needed to decide whether a file in the database directory is still live.
pub struct LiveState {
    pub live_table_files: HashSet<FileNumber>,
    pub manifest_file_number: FileNumber,
    pub log_number: FileNumber,
    pub prev_log_number: FileNumber,
}

/// Lists every file in `db_path` that isn't referenced by `live`, ready to be removed.
pub fn obsolete_files<FS: FileSystem>(fs: &FS, db_path: &Path, live: &LiveState) -> std::io::Result<Vec<PathBuf>> {
    let mut obsolete = Vec::new();

    for name in fs.children(db_path)? {
        let Some(parsed) = DbFileName::parse(&name) else { continue };
        let keep = match parsed {
            DbFileName::Table { file_number } | DbFileName::TableLegacy { file_number } => {
                live.live_table_files.contains(&file_number)
            }
            DbFileName::Log { file_number } => file_number >= live.log_number || file_number == live.prev_log_number,
            DbFileName::Manifest { file_number } => file_number == live.manifest_file_number,
            DbFileName::Current | DbFileName::Lockfile | DbFileName::InfoLog | DbFileName::OldInfoLog => true,
            DbFileName::Temp { .. } => false,
        };
        if !keep {
            obsolete.push(db_path.join(name));
        }
    }

    Ok(obsolete)
}

/// Removes every path in `paths`, logging (via the returned list) any that failed rather than
/// aborting partway through — a file another process is still holding open on some platforms is
/// not a correctness problem, just a deferred cleanup.
pub fn delete_files<FS: FileSystem>(fs: &FS, paths: &[PathBuf]) -> Vec<(PathBuf, std::io::Error)> {
    let mut failures = Vec::new();
    for path in paths {
        if let Err(err) = fs.remove_file(path) {
            failures.push((path.clone(), err));
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::MemoryFileSystem;

    #[test]
    fn keeps_live_tables_and_current_manifest_only() {
        let fs = MemoryFileSystem::new();
        let db_path = Path::new("/db");
        fs.create_dir_all(db_path).unwrap();
        for name in ["000001.ldb", "000002.ldb", "MANIFEST-000001", "MANIFEST-000002", "CURRENT", "000003.log", "000004.dbtmp"] {
            fs.create(&db_path.join(name)).unwrap();
        }

        let live = LiveState {
            live_table_files: HashSet::from([FileNumber(2)]),
            manifest_file_number: FileNumber(2),
            log_number: FileNumber(3),
            prev_log_number: FileNumber(0),
        };
        let mut obsolete: Vec<String> = obsolete_files(&fs, db_path, &live)
            .unwrap()
            .into_iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        obsolete.sort();
        assert_eq!(obsolete, vec!["000001.ldb", "000004.dbtmp", "MANIFEST-000001"]);
    }
}
