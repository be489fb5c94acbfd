//! Reconstructs a database's state at open time: the current `Version` (by replaying the
//! MANIFEST's version edits), and the active memtable (by replaying whichever WAL segments are
//! newer than the version's `log_number`).
//!
//! This module only reads and decodes; it never writes. Deciding what to do with what it finds
//! (flush the replayed memtable, adopt its WAL segment via `reuse_logs`, or bootstrap a brand
//! new database) is [`crate::db`]'s job, since that requires opening files for writing and
//! appending to the MANIFEST.

use std::path::{Path, PathBuf};

use crate::database_files::DbFileName;
use crate::error::{Error, Result};
use crate::filesystem::FileSystem;
use crate::format::{FileNumber, SequenceNumber};
use crate::memtable::Memtable;
use crate::options::Options;
use crate::version::builder::VersionBuilder;
use crate::version::edit::VersionEdit;
use crate::version::set::CompactPointers;
use crate::version::Version;
use crate::write_batch::WriteBatch;
use crate::write_log::WriteLogReader;

/// Everything recovery was able to determine about an existing (or brand new) database.
pub struct RecoveredState {
    pub version: Version,
    pub log_number: FileNumber,
    pub prev_log_number: FileNumber,
    pub next_file_number: FileNumber,
    pub last_sequence: SequenceNumber,
    pub manifest_file_number: FileNumber,
    pub compact_pointers: CompactPointers,
    /// Entries replayed from WAL segments, not yet known to be durable in any table file.
    pub memtable: Memtable,
    /// `Some((file_number, current_length))` when the most recent WAL segment can be adopted
    /// (appended to directly) rather than flushed and replaced, per `Options::reuse_logs`.
    pub reusable_log: Option<(FileNumber, u64)>,
    /// `true` when no `CURRENT` file was found: a brand new, empty database.
    pub is_new: bool,
}

pub fn recover<FS: FileSystem>(fs: &FS, db_path: &Path, options: &Options) -> Result<RecoveredState> {
    fs.create_dir_all(db_path)?;
    let current_path = db_path.join(DbFileName::Current.file_name());

    if !fs.exists(&current_path) {
        if !options.create_if_missing {
            return Err(Error::invalid_argument("database does not exist and create_if_missing is false"));
        }
        return Ok(RecoveredState {
            version: Version::empty(),
            log_number: FileNumber(0),
            prev_log_number: FileNumber(0),
            next_file_number: FileNumber(2),
            last_sequence: SequenceNumber::ZERO,
            manifest_file_number: FileNumber(1),
            compact_pointers: CompactPointers::new(),
            memtable: Memtable::new(options.comparator.clone()),
            reusable_log: None,
            is_new: true,
        });
    }
    if options.error_if_exists {
        return Err(Error::invalid_argument("database already exists and error_if_exists is set"));
    }

    let manifest_replay = replay_manifest(fs, db_path, &current_path, options)?;
    let (memtable, reusable_log, max_log_number_seen) = replay_logs(
        fs,
        db_path,
        manifest_replay.log_number,
        manifest_replay.prev_log_number,
        options,
    )?;

    let mut last_sequence = manifest_replay.last_sequence;
    let mut next_file_number = manifest_replay.next_file_number;
    if let Some(seen) = max_log_number_seen {
        next_file_number = next_file_number.max(FileNumber(seen.0 + 1));
    }
    if let Some(replayed_last) = memtable_last_sequence(&memtable, last_sequence) {
        last_sequence = replayed_last;
    }

    Ok(RecoveredState {
        version: manifest_replay.version,
        log_number: manifest_replay.log_number,
        prev_log_number: manifest_replay.prev_log_number,
        next_file_number,
        last_sequence,
        manifest_file_number: manifest_replay.manifest_file_number,
        compact_pointers: manifest_replay.compact_pointers,
        memtable,
        reusable_log,
        is_new: false,
    })
}

struct ManifestReplay {
    version: Version,
    log_number: FileNumber,
    prev_log_number: FileNumber,
    next_file_number: FileNumber,
    last_sequence: SequenceNumber,
    manifest_file_number: FileNumber,
    compact_pointers: CompactPointers,
}

fn replay_manifest<FS: FileSystem>(fs: &FS, db_path: &Path, current_path: &Path, options: &Options) -> Result<ManifestReplay> {
    let current_contents = fs.read_file_to_end(current_path)?;
    let manifest_name = String::from_utf8(current_contents)
        .map_err(|_| Error::corruption("CURRENT file is not valid UTF-8"))?;
    let manifest_name = manifest_name.trim_end_matches('\n');
    let manifest_file_number = match DbFileName::parse(Path::new(manifest_name)) {
        Some(DbFileName::Manifest { file_number }) => file_number,
        _ => return Err(Error::corruption("CURRENT does not name a MANIFEST file")),
    };

    let manifest_path = db_path.join(manifest_name);
    let file = fs.open_sequential(&manifest_path)?;
    let mut reader = WriteLogReader::new(file, options.paranoid_checks);

    let base = Version::empty();
    let mut builder = VersionBuilder::new(&base);

    let mut log_number = FileNumber(0);
    let mut prev_log_number = FileNumber(0);
    let mut next_file_number = FileNumber(2);
    let mut last_sequence = SequenceNumber::ZERO;
    let mut compact_pointers = CompactPointers::new();

    loop {
        let record = reader.read_record().map_err(|err| Error::corruption(err.to_string()))?;
        let Some(record) = record else { break };
        let edit = VersionEdit::decode(&record)?;

        if let Some(name) = &edit.comparator_name {
            if name.as_str() != options.comparator.name() {
                return Err(Error::invalid_argument(format!(
                    "database was created with comparator {name:?}, but {:?} was requested",
                    options.comparator.name()
                )));
            }
        }
        if let Some(n) = edit.log_number {
            log_number = n;
        }
        if let Some(n) = edit.prev_log_number {
            prev_log_number = n;
        }
        if let Some(n) = edit.next_file_number {
            next_file_number = n;
        }
        if let Some(s) = edit.last_sequence {
            last_sequence = s;
        }
        for &(level, ref key) in &edit.compact_pointers {
            compact_pointers.insert(level, key.clone());
        }
        builder.apply(&edit);
    }

    let version = builder.finish(&*options.comparator);
    Ok(ManifestReplay { version, log_number, prev_log_number, next_file_number, last_sequence, manifest_file_number, compact_pointers })
}

/// Replays every `.log` segment numbered `>= log_number` (plus `prev_log_number`, if it still
/// exists, matching the window during which two WAL segments can be live at once) into a fresh
/// memtable, in file-number order.
fn replay_logs<FS: FileSystem>(
    fs: &FS,
    db_path: &Path,
    log_number: FileNumber,
    prev_log_number: FileNumber,
    options: &Options,
) -> Result<(Memtable, Option<(FileNumber, u64)>, Option<FileNumber>)> {
    let mut log_files: Vec<(FileNumber, PathBuf)> = fs
        .children(db_path)?
        .into_iter()
        .filter_map(|name| match DbFileName::parse(&name) {
            Some(DbFileName::Log { file_number }) if file_number >= log_number || file_number == prev_log_number => {
                Some((file_number, db_path.join(&name)))
            }
            _ => None,
        })
        .collect();
    log_files.sort_by_key(|(number, _)| *number);

    let memtable = Memtable::new(options.comparator.clone());
    let max_log_number_seen = log_files.last().map(|(number, _)| *number);

    for (index, (_, path)) in log_files.iter().enumerate() {
        let is_last = index + 1 == log_files.len();
        let file = fs.open_sequential(path)?;
        let mut reader = WriteLogReader::new(file, options.paranoid_checks && !is_last);

        loop {
            let record = reader.read_record().map_err(|err| Error::corruption(err.to_string()))?;
            let Some(record) = record else { break };
            let (starting_sequence, mut entries) = WriteBatch::decode(&record)?;

            let mut offset = 0_u64;
            while let Some(entry) = entries.next_entry()? {
                let sequence = SequenceNumber(starting_sequence.0 + offset);
                match entry {
                    crate::write_batch::WriteBatchEntry::Put { key, value } => {
                        memtable.insert(key, sequence, crate::format::EntryType::Value, Some(value));
                    }
                    crate::write_batch::WriteBatchEntry::Delete { key } => {
                        memtable.insert(key, sequence, crate::format::EntryType::Deletion, None);
                    }
                }
                offset += 1;
            }
        }
    }

    let reusable_log = if options.reuse_logs {
        if let Some((number, path)) = log_files.last() {
            let size = fs.size_of(path)?;
            Some((*number, size))
        } else {
            None
        }
    } else {
        None
    };

    Ok((memtable, reusable_log, max_log_number_seen))
}

fn memtable_last_sequence(memtable: &Memtable, fallback: SequenceNumber) -> Option<SequenceNumber> {
    memtable
        .snapshot_entries()
        .into_iter()
        .filter_map(|(internal_key, _)| crate::format::InternalKey::decode(&internal_key).ok().map(|k| k.sequence))
        .chain(std::iter::once(fallback))
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;
    use crate::filesystem::MemoryFileSystem;
    use crate::write_log::WriteLogWriter;
    use std::sync::Arc;

    fn opts() -> Options {
        Options { comparator: Arc::new(BytewiseComparator), ..Options::default() }
    }

    #[test]
    fn missing_current_yields_a_fresh_empty_state() {
        let fs = MemoryFileSystem::new();
        let state = recover(&fs, Path::new("/db"), &opts()).unwrap();
        assert!(state.is_new);
        assert!(state.memtable.is_empty());
    }

    #[test]
    fn replays_batches_from_the_log_named_in_the_manifest() {
        let fs = MemoryFileSystem::new();
        let db_path = Path::new("/db");
        fs.create_dir_all(db_path).unwrap();

        {
            let manifest_file = fs.create(&db_path.join("MANIFEST-000001")).unwrap();
            let mut writer = WriteLogWriter::new(manifest_file);
            let mut edit = VersionEdit::new();
            edit.comparator_name = Some(BytewiseComparator.name().to_owned());
            edit.log_number = Some(FileNumber(2));
            edit.next_file_number = Some(FileNumber(3));
            edit.last_sequence = Some(SequenceNumber(0));
            let mut buf = Vec::new();
            edit.encode(&mut buf);
            writer.add_record(&buf).unwrap();
        }
        fs.write_file_atomic(&db_path.join("CURRENT"), b"MANIFEST-000001\n").unwrap();

        {
            let log_file = fs.create(&db_path.join("000002.log")).unwrap();
            let mut writer = WriteLogWriter::new(log_file);
            let mut batch = WriteBatch::new();
            batch.put(b"a", b"1");
            let encoded = batch.encode(SequenceNumber(1));
            writer.add_record(&encoded).unwrap();
        }

        let state = recover(&fs, db_path, &opts()).unwrap();
        assert!(!state.is_new);
        assert_eq!(state.memtable.get(b"a", SequenceNumber(10)), Some(Some(b"1".to_vec())));
        assert_eq!(state.last_sequence, SequenceNumber(1));
    }
}
