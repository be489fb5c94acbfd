//! The public facade: opens a database directory, recovers whatever state it already holds, and
//! exposes the read/write/snapshot/iterator/administrative surface the rest of the crate
//! implements underneath.
//!
//! A `Db` owns a single background thread that flushes immutable memtables and runs compactions;
//! foreground calls only ever touch the WAL/memtable directly (through [`WriterQueue`]) and signal
//! the background thread when there's work for it, rather than doing that work inline.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::info;

use crate::comparator::Comparator;
use crate::compaction::{Compaction, CompactionPicker};
use crate::compactor::{edit_for_compaction, edit_for_flush, Compactor, CompactorOptions};
use crate::config_constants::NUM_LEVELS;
use crate::database_files::DbFileName;
use crate::error::{Error, Result};
use crate::filesystem::FileSystem;
use crate::filter::FilterPolicy;
use crate::format::{self, EntryType, FileNumber, SequenceNumber};
use crate::gc::{self, LiveState};
use crate::iter::DbIterator;
use crate::logger::{self, InfoLogLayer};
use crate::memtable::Memtable;
use crate::options::{Options, ReadOptions, WriteOptions};
use crate::recovery;
use crate::snapshot::{Snapshot, SnapshotList};
use crate::table_cache::TableCache;
use crate::version::edit::VersionEdit;
use crate::version::set::{CompactPointers, VersionSet};
use crate::version::{FileMetadata, SequenceNumberCompat, Version};
use crate::write_batch::{WriteBatch, WriteBatchEntry};
use crate::write_log::WriteLogWriter;
use crate::writer_queue::{write_delay, WriteApplier, WriteDelay, WriterQueue};

struct State<FS: FileSystem> {
    versions: VersionSet<FS::Writable>,
    mem: Memtable,
    imm: Option<Memtable>,
    log_writer: WriteLogWriter<FS::Writable>,
    /// Guards against the background thread picking up a second unit of work while one is
    /// already mid-flight; cleared once that unit's result has been folded back in.
    compacting: bool,
    pending_seek_compaction: Option<(u8, Arc<FileMetadata>)>,
}

struct Shared<FS: FileSystem> {
    fs: Arc<FS>,
    db_path: PathBuf,
    comparator: Arc<dyn Comparator>,
    filter_policy: Option<Arc<dyn FilterPolicy>>,
    options: Options,
    table_cache: TableCache<FS>,
    snapshots: SnapshotList,
    state: Mutex<State<FS>>,
    background_error: Mutex<Option<Error>>,
    shutting_down: AtomicBool,
    /// Notified whenever a flush or compaction completes, so a writer blocked in
    /// `make_room_for_write` (waiting for an immutable memtable to drain) wakes up.
    work_done: Condvar,
}

impl<FS: FileSystem> Shared<FS> {
    fn check_background_error(&self) -> Result<()> {
        if let Some(err) = &*self.background_error.lock() {
            return Err(Error::Background(err.to_string()));
        }
        Ok(())
    }

    fn compactor_options(&self) -> CompactorOptions {
        let picker = CompactionPicker::new(&*self.comparator, self.options.max_file_size);
        CompactorOptions {
            target_file_size: self.options.max_file_size,
            grandparent_overlap_limit: picker.grandparent_overlap_limit(),
            block_size: self.options.block_size,
            block_restart_interval: self.options.block_restart_interval,
            compression: self.options.compression,
            filter_policy: self.filter_policy.clone(),
        }
    }
}

/// An open, crash-consistent LSM-tree key-value store rooted at a single directory.
///
/// Cloning isn't supported; share a `Db` across threads behind an `Arc` instead. Every method
/// takes `&self`, since writes are internally serialized through a [`WriterQueue`] and reads
/// only ever touch immutable, `Arc`-shared snapshots of the on-disk state.
pub struct Db<FS: FileSystem + 'static> {
    shared: Arc<Shared<FS>>,
    writer_queue: WriterQueue,
    bg_sender: Sender<()>,
    bg_thread: Option<JoinHandle<()>>,
    /// Holds the directory's advisory lock for the database's lifetime; never read again after
    /// `open`, but must outlive every other field so the lock isn't released early.
    #[allow(dead_code)]
    lock_file: FS::Lock,
    log_layer: InfoLogLayer<FS::Writable>,
}

impl<FS: FileSystem + 'static> Db<FS> {
    /// Opens (and, if `options.create_if_missing`, creates) the database at `db_path`.
    pub fn open(fs: Arc<FS>, db_path: impl Into<PathBuf>, options: Options) -> Result<Self> {
        let db_path = db_path.into();
        let options = options.sanitize();
        fs.create_dir_all(&db_path)?;

        let lock_file = fs.lock(&db_path.join(DbFileName::Lockfile.file_name()))?;
        let log_layer = logger::open(&*fs, &db_path)?;

        let recovered = recovery::recover(&*fs, &db_path, &options)?;
        if recovered.is_new {
            info!(path = %db_path.display(), "creating a new database");
        } else {
            info!(path = %db_path.display(), last_sequence = recovered.last_sequence.0, "recovered existing database");
        }

        let manifest_number = recovered.next_file_number;
        let mut cursor = FileNumber(manifest_number.0 + 1);

        let (log_writer, log_number, prev_log_number, mem, imm) = if let Some((file_number, current_length)) = recovered.reusable_log {
            let file = fs.open_appendable(&db_path.join(DbFileName::Log { file_number }.file_name()))?;
            (WriteLogWriter::resuming_at(file, current_length), file_number, FileNumber(0), recovered.memtable, None)
        } else {
            let new_log_number = cursor;
            cursor = FileNumber(cursor.0 + 1);
            let file = fs.create(&db_path.join(DbFileName::Log { file_number: new_log_number }.file_name()))?;
            let imm = if recovered.memtable.is_empty() { None } else { Some(recovered.memtable) };
            let prev = if imm.is_some() { recovered.log_number } else { FileNumber(0) };
            (WriteLogWriter::new(file), new_log_number, prev, Memtable::new(options.comparator.clone()), imm)
        };
        let next_file_number = cursor;

        let manifest_path = db_path.join(DbFileName::Manifest { file_number: manifest_number }.file_name());
        let manifest_file = fs.create(&manifest_path)?;
        let mut manifest_writer = WriteLogWriter::new(manifest_file);
        let seed_edit = build_seed_edit(
            &options,
            &recovered.version,
            log_number,
            prev_log_number,
            next_file_number,
            recovered.last_sequence,
            &recovered.compact_pointers,
        );
        let mut buf = Vec::new();
        seed_edit.encode(&mut buf);
        manifest_writer.add_record(&buf)?;
        manifest_writer.sync()?;

        fs.write_file_atomic(
            &db_path.join(DbFileName::Current.file_name()),
            format!("{}\n", DbFileName::Manifest { file_number: manifest_number }.file_name().display()).as_bytes(),
        )?;

        let mut versions = VersionSet::new(options.comparator.clone(), manifest_writer, manifest_number);
        versions.install_recovered(recovered.version);
        versions.last_sequence = recovered.last_sequence;
        versions.log_number = log_number;
        versions.prev_log_number = prev_log_number;
        versions.seed_recovered(next_file_number, recovered.compact_pointers);

        let filter_policy = options.filter_policy.clone();
        let table_cache = TableCache::new(fs.clone(), db_path.clone(), options.comparator.clone(), filter_policy.clone(), options.max_open_files);

        let state = State { versions, mem, imm, log_writer, compacting: false, pending_seek_compaction: None };

        let shared = Arc::new(Shared {
            fs: fs.clone(),
            db_path: db_path.clone(),
            comparator: options.comparator.clone(),
            filter_policy,
            options,
            table_cache,
            snapshots: SnapshotList::new(),
            state: Mutex::new(state),
            background_error: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
            work_done: Condvar::new(),
        });

        // Whatever the previous process left behind (a superseded manifest, a flushed WAL
        // segment) is obsolete the moment the fresh manifest above is durable.
        garbage_collect(&shared);

        let (sender, receiver) = bounded::<()>(1);
        let bg_shared = shared.clone();
        let bg_thread = std::thread::spawn(move || run_background_loop(bg_shared, &receiver));

        Ok(Self { shared, writer_queue: WriterQueue::new(), bg_sender: sender, bg_thread: Some(bg_thread), lock_file, log_layer })
    }

    /// The `tracing_subscriber` layer mirroring this database's log events to its `LOG` file;
    /// fold this into the embedding application's own subscriber if on-disk logs are wanted.
    pub fn log_layer(&self) -> &InfoLogLayer<FS::Writable> {
        &self.log_layer
    }

    pub fn put(&self, key: &[u8], value: &[u8], options: WriteOptions) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(batch, options)
    }

    pub fn delete(&self, key: &[u8], options: WriteOptions) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(batch, options)
    }

    /// Applies every put/delete in `batch` atomically: either every entry becomes visible to
    /// subsequent reads, or (on an error) none do.
    pub fn write(&self, batch: WriteBatch, options: WriteOptions) -> Result<()> {
        self.shared.check_background_error()?;
        loop {
            let l0_files = self.shared.state.lock().versions.current().num_files_at_level(0);
            match write_delay(l0_files) {
                WriteDelay::None => break,
                WriteDelay::Sleep(duration) => {
                    std::thread::sleep(duration);
                    break;
                }
                WriteDelay::Stop => {
                    self.wake_background();
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }
        self.writer_queue.write(self, batch, options.sync)
    }

    pub fn get(&self, key: &[u8], options: ReadOptions) -> Result<Option<Vec<u8>>> {
        self.get_at(key, None, options)
    }

    pub fn has(&self, key: &[u8], options: ReadOptions) -> Result<bool> {
        Ok(self.get(key, options)?.is_some())
    }

    /// Takes a read-consistent point in time: reads through [`Self::get_at_snapshot`] or
    /// [`Self::iterator_at_snapshot`] with the returned handle observe exactly the writes
    /// committed up to this call, for as long as the handle stays alive.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let sequence = self.shared.state.lock().versions.last_sequence;
        self.shared.snapshots.acquire(sequence)
    }

    pub fn get_at_snapshot(&self, key: &[u8], snapshot: &Snapshot, options: ReadOptions) -> Result<Option<Vec<u8>>> {
        self.get_at(key, Some(snapshot.sequence()), options)
    }

    fn get_at(&self, key: &[u8], snapshot_sequence: Option<SequenceNumber>, _options: ReadOptions) -> Result<Option<Vec<u8>>> {
        self.shared.check_background_error()?;

        let (mem, imm, version, sequence) = {
            let state = self.shared.state.lock();
            let sequence = snapshot_sequence.unwrap_or(state.versions.last_sequence);
            (state.mem.clone(), state.imm.clone(), state.versions.current(), sequence)
        };

        if let Some(found) = mem.get(key, sequence) {
            return Ok(found);
        }
        if let Some(imm) = &imm {
            if let Some(found) = imm.get(key, sequence) {
                return Ok(found);
            }
        }

        let mut examined = Vec::new();
        let table_cache = &self.shared.table_cache;
        let result = version.get(key, SequenceNumberCompat(sequence), &*self.shared.comparator, |file, lookup_key| {
            examined.push(file.file_number);
            table_cache.get(file.file_number, file.file_size, key, lookup_key)
        })?;

        self.maybe_schedule_seek_compaction(&version, &examined);

        Ok(result.flatten())
    }

    /// A forward iterator over every live key, as of right now.
    pub fn iterator(&self, options: ReadOptions) -> Result<DbIterator> {
        let _ = options;
        let (mem, imm, version, sequence) = {
            let state = self.shared.state.lock();
            (state.mem.clone(), state.imm.clone(), state.versions.current(), state.versions.last_sequence)
        };
        self.build_iterator(&mem, &imm, &version, sequence)
    }

    pub fn iterator_at_snapshot(&self, snapshot: &Snapshot, options: ReadOptions) -> Result<DbIterator> {
        let _ = options;
        let (mem, imm, version) = {
            let state = self.shared.state.lock();
            (state.mem.clone(), state.imm.clone(), state.versions.current())
        };
        self.build_iterator(&mem, &imm, &version, snapshot.sequence())
    }

    fn build_iterator(&self, mem: &Memtable, imm: &Option<Memtable>, version: &Version, sequence: SequenceNumber) -> Result<DbIterator> {
        let memtables: Vec<&Memtable> = match imm {
            Some(imm) => vec![mem, imm],
            None => vec![mem],
        };
        DbIterator::build(&self.shared.comparator, sequence, &memtables, version, &self.shared.table_cache)
    }

    /// Forces every level overlapping `[start, end]` (or the whole keyspace, with `None` bounds)
    /// to compact down, one level at a time, blocking until done.
    pub fn compact_range(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        self.shared.check_background_error()?;
        let explicit_smallest = start.map(|k| format::seek_key(k, SequenceNumber::ZERO));
        let explicit_largest = end.map(|k| format::seek_key(k, SequenceNumber::ZERO));

        for level in 0..NUM_LEVELS.saturating_sub(1) {
            loop {
                let version = self.shared.state.lock().versions.current();
                let bounds = match (&explicit_smallest, &explicit_largest) {
                    (Some(lo), Some(hi)) => Some((lo.clone(), hi.clone())),
                    _ => level_key_bounds(&version, level).map(|(level_lo, level_hi)| {
                        (explicit_smallest.clone().unwrap_or(level_lo), explicit_largest.clone().unwrap_or(level_hi))
                    }),
                };
                let Some((lo, hi)) = bounds else { break };

                let picker = CompactionPicker::new(&*self.shared.comparator, self.shared.options.max_file_size);
                let Some(compaction) = picker.pick_range(&version, level, &lo, &hi) else { break };
                run_one_compaction(&self.shared, level, &compaction)?;
            }
        }
        Ok(())
    }

    /// Rough on-disk byte total overlapping each `[start, end)` range in `ranges`, estimated from
    /// whole-file sizes rather than exact key offsets.
    #[must_use]
    pub fn approximate_sizes(&self, ranges: &[(Vec<u8>, Vec<u8>)]) -> Vec<u64> {
        let state = self.shared.state.lock();
        let version = state.versions.current();
        let comparator = &*self.shared.comparator;
        ranges
            .iter()
            .map(|(start, end)| {
                let lo = format::seek_key(start, SequenceNumber::ZERO);
                let hi = format::seek_key(end, SequenceNumber::ZERO);
                (0..NUM_LEVELS).flat_map(|level| version.overlapping_files(level, &lo, &hi, comparator)).map(|f| f.file_size).sum()
            })
            .collect()
    }

    /// Queries a handful of named, informational properties; unrecognized names return `None`.
    ///
    /// Recognized names: `lsmdb.num-files-at-level<N>`, `lsmdb.sstables`, `lsmdb.stats`,
    /// `lsmdb.approximate-memory-usage`.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<String> {
        let state = self.shared.state.lock();

        if let Some(rest) = name.strip_prefix("lsmdb.num-files-at-level") {
            let level: u8 = rest.parse().ok()?;
            return Some(state.versions.current().num_files_at_level(level).to_string());
        }

        match name {
            "lsmdb.sstables" => {
                let version = state.versions.current();
                let mut out = String::new();
                for level in 0..NUM_LEVELS {
                    for file in version.files(level) {
                        out.push_str(&format!("level {level}: file {} ({} bytes)\n", file.file_number.0, file.file_size));
                    }
                }
                Some(out)
            }
            "lsmdb.stats" => {
                let version = state.versions.current();
                let mut out = String::new();
                for level in 0..NUM_LEVELS {
                    let files = version.num_files_at_level(level);
                    if files > 0 {
                        out.push_str(&format!("level {level}: {files} files\n"));
                    }
                }
                Some(out)
            }
            "lsmdb.approximate-memory-usage" => {
                let mut bytes = state.mem.approximate_memory_usage();
                if let Some(imm) = &state.imm {
                    bytes += imm.approximate_memory_usage();
                }
                Some(bytes.to_string())
            }
            _ => None,
        }
    }

    /// Surfaces any latched background error before the database is dropped. Dropping a `Db`
    /// without calling this still shuts down cleanly; this just gives callers a chance to notice
    /// a failed flush or compaction instead of only finding out from the next `write`.
    pub fn close(self) -> Result<()> {
        self.shared.check_background_error()
    }

    fn wake_background(&self) {
        let _ = self.bg_sender.try_send(());
    }

    fn maybe_schedule_seek_compaction(&self, version: &Arc<Version>, examined: &[FileNumber]) {
        let Some(&first) = examined.first() else { return };
        if examined.len() <= 1 {
            return;
        }
        for level in 0..NUM_LEVELS {
            if let Some(file) = version.files(level).iter().find(|f| f.file_number == first) {
                if file.charge_seek() {
                    let mut state = self.shared.state.lock();
                    if state.pending_seek_compaction.is_none() {
                        state.pending_seek_compaction = Some((level, file.clone()));
                        drop(state);
                        self.wake_background();
                    }
                }
                return;
            }
        }
    }

    /// Blocks until there's room for a new write: waits out an already-pending immutable
    /// memtable, then (if the active memtable has grown past `write_buffer_size`) rotates it
    /// into an immutable one behind a fresh WAL segment and wakes the background thread to flush
    /// it.
    fn make_room_for_write(&self, state: &mut MutexGuard<'_, State<FS>>) -> Result<()> {
        loop {
            if let Some(err) = &*self.shared.background_error.lock() {
                return Err(Error::Background(err.to_string()));
            }
            if state.mem.approximate_memory_usage() < self.shared.options.write_buffer_size {
                return Ok(());
            }
            if state.imm.is_some() {
                self.shared.work_done.wait(state);
                continue;
            }

            let old_log_number = state.versions.log_number;
            let new_log_number = state.versions.new_file_number();
            let new_log_path = self.shared.db_path.join(DbFileName::Log { file_number: new_log_number }.file_name());
            let new_log_file = self.shared.fs.create(&new_log_path)?;
            state.log_writer = WriteLogWriter::new(new_log_file);

            let mut edit = VersionEdit::new();
            edit.log_number = Some(new_log_number);
            edit.prev_log_number = Some(old_log_number);
            state.versions.log_and_apply(edit)?;

            state.imm = Some(std::mem::replace(&mut state.mem, Memtable::new(self.shared.comparator.clone())));

            self.wake_background();
            return Ok(());
        }
    }
}

impl<FS: FileSystem + 'static> WriteApplier for Db<FS> {
    fn apply(&self, batch: &WriteBatch, sync: bool) -> Result<()> {
        self.shared.check_background_error()?;
        if batch.is_empty() {
            return Ok(());
        }

        let mut state = self.shared.state.lock();
        self.make_room_for_write(&mut state)?;

        let sequence = state.versions.last_sequence.next();
        let encoded = batch.encode(sequence);
        state.log_writer.add_record(&encoded)?;
        if sync {
            state.log_writer.sync()?;
        }

        let mut offset = 0_u64;
        let mut entries = batch.iter();
        while let Some(entry) = entries.next_entry()? {
            let seq = SequenceNumber(sequence.0 + offset);
            match entry {
                WriteBatchEntry::Put { key, value } => state.mem.insert(key, seq, EntryType::Value, Some(value)),
                WriteBatchEntry::Delete { key } => state.mem.insert(key, seq, EntryType::Deletion, None),
            }
            offset += 1;
        }
        state.versions.last_sequence = SequenceNumber(sequence.0 + offset - 1);
        Ok(())
    }
}

impl<FS: FileSystem + 'static> Drop for Db<FS> {
    fn drop(&mut self) {
        self.shared.shutting_down.store(true, AtomicOrdering::Release);
        let _ = self.bg_sender.send(());
        if let Some(handle) = self.bg_thread.take() {
            let _ = handle.join();
        }
    }
}

/// Removes every file an `open`ed database would recognize, plus the directory itself. Fails if
/// another process currently holds the directory's lock.
pub fn destroy<FS: FileSystem>(fs: &FS, db_path: &Path) -> Result<()> {
    if !fs.exists(db_path) {
        return Ok(());
    }
    let lock_path = db_path.join(DbFileName::Lockfile.file_name());
    let lock = fs.lock(&lock_path)?;

    for name in fs.children(db_path)? {
        if DbFileName::parse(&name).is_some() {
            let _ = fs.remove_file(&db_path.join(&name));
        }
    }

    drop(lock);
    let _ = fs.remove_file(&lock_path);
    let _ = fs.remove_dir(db_path);
    Ok(())
}

fn build_seed_edit(
    options: &Options,
    version: &Version,
    log_number: FileNumber,
    prev_log_number: FileNumber,
    next_file_number: FileNumber,
    last_sequence: SequenceNumber,
    compact_pointers: &CompactPointers,
) -> VersionEdit {
    let mut edit = VersionEdit::new();
    edit.comparator_name = Some(options.comparator.name().to_owned());
    edit.log_number = Some(log_number);
    edit.prev_log_number = Some(prev_log_number);
    edit.next_file_number = Some(next_file_number);
    edit.last_sequence = Some(last_sequence);
    for (&level, key) in compact_pointers {
        edit.set_compact_pointer(level, key.clone());
    }
    for level in 0..NUM_LEVELS {
        for file in version.files(level) {
            edit.add_file(level, (**file).clone());
        }
    }
    edit
}

fn level_key_bounds(version: &Version, level: u8) -> Option<(Vec<u8>, Vec<u8>)> {
    let files = version.files(level);
    if files.is_empty() {
        return None;
    }
    let smallest = files.iter().map(|f| f.smallest.clone()).min()?;
    let largest = files.iter().map(|f| f.largest.clone()).max()?;
    Some((smallest, largest))
}

fn run_background_loop<FS: FileSystem + 'static>(shared: Arc<Shared<FS>>, receiver: &Receiver<()>) {
    loop {
        match receiver.recv_timeout(Duration::from_millis(500)) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
        if shared.shutting_down.load(AtomicOrdering::Acquire) {
            return;
        }
        background_work(&shared);
    }
}

/// Drains every flush and compaction currently due, one at a time, stopping once neither is
/// pending or a prior step latched a background error.
fn background_work<FS: FileSystem + 'static>(shared: &Arc<Shared<FS>>) {
    loop {
        if shared.shutting_down.load(AtomicOrdering::Acquire) {
            return;
        }

        let mut state = shared.state.lock();
        if state.compacting {
            return;
        }

        if let Some(imm) = state.imm.clone() {
            state.compacting = true;
            drop(state);
            let result = flush_immutable(shared, &imm);
            if !finish_background_round(shared, result) {
                return;
            }
            continue;
        }

        let version = state.versions.current();
        let picker = CompactionPicker::new(&*shared.comparator, shared.options.max_file_size);
        let picked = if let Some((level, file)) = state.pending_seek_compaction.take() {
            Some((level, picker.pick_seek_driven(&version, level, file)))
        } else if let Some(level) = version.compaction_level() {
            let compact_pointer = state.versions.compact_pointer(level).map(<[u8]>::to_vec);
            picker.pick_size_driven(&version, level, compact_pointer.as_deref()).map(|compaction| (level, compaction))
        } else {
            None
        };

        let Some((level, compaction)) = picked else { return };
        state.compacting = true;
        drop(state);

        let result = run_one_compaction(shared, level, &compaction);
        if !finish_background_round(shared, result) {
            return;
        }
    }
}

fn finish_background_round<FS: FileSystem>(shared: &Shared<FS>, result: Result<()>) -> bool {
    let mut state = shared.state.lock();
    state.compacting = false;
    let succeeded = result.is_ok();
    if let Err(err) = result {
        *shared.background_error.lock() = Some(err);
    }
    drop(state);
    shared.work_done.notify_all();
    succeeded
}

fn flush_immutable<FS: FileSystem + 'static>(shared: &Arc<Shared<FS>>, imm: &Memtable) -> Result<()> {
    let compactor = Compactor::new(shared.fs.clone(), shared.db_path.clone(), shared.comparator.clone(), shared.compactor_options());
    let output = compactor.flush_memtable(imm, || shared.state.lock().versions.new_output_file_number())?;

    let mut edit = match &output {
        Some(output) => {
            let version = shared.state.lock().versions.current();
            let picker = CompactionPicker::new(&*shared.comparator, shared.options.max_file_size);
            let level = picker.pick_level_for_memtable_output(
                &version,
                format::user_key_of(&output.summary.smallest_key),
                format::user_key_of(&output.summary.largest_key),
            );
            edit_for_flush(output, level)
        }
        None => VersionEdit::new(),
    };
    edit.prev_log_number = Some(FileNumber(0));

    let mut state = shared.state.lock();
    state.versions.log_and_apply(edit)?;
    if let Some(output) = &output {
        state.versions.clear_pending_output(output.file_number);
    }
    state.imm = None;
    drop(state);

    garbage_collect(shared);
    Ok(())
}

fn run_one_compaction<FS: FileSystem + 'static>(shared: &Arc<Shared<FS>>, level: u8, compaction: &Compaction) -> Result<()> {
    if compaction.is_single_input_file_move() {
        let file = &compaction.inputs[0];
        let mut edit = VersionEdit::new();
        if compaction.advances_compact_pointer {
            edit.set_compact_pointer(level, file.largest.clone());
        }
        edit.delete_file(level, file.file_number);
        edit.add_file(level + 1, (**file).clone());

        let mut state = shared.state.lock();
        state.versions.log_and_apply(edit)?;
        drop(state);
        garbage_collect(shared);
        return Ok(());
    }

    let (last_sequence, version) = {
        let state = shared.state.lock();
        (state.versions.last_sequence, state.versions.current())
    };
    let horizon = Some(shared.snapshots.oldest().unwrap_or(last_sequence));
    let comparator = shared.comparator.clone();
    let base_level_start = level + 2;

    let compactor = Compactor::new(shared.fs.clone(), shared.db_path.clone(), comparator.clone(), shared.compactor_options());
    let outputs = compactor.run(
        &shared.table_cache,
        compaction,
        horizon,
        |user_key| is_base_level_for_key(&version, &*comparator, base_level_start, user_key),
        || shared.state.lock().versions.new_output_file_number(),
    )?;

    let edit = edit_for_compaction(compaction, &outputs);
    let mut state = shared.state.lock();
    state.versions.log_and_apply(edit)?;
    for output in &outputs {
        state.versions.clear_pending_output(output.file_number);
    }
    drop(state);

    garbage_collect(shared);
    Ok(())
}

/// Whether no file at `start_level` or deeper could still hold `user_key`, i.e. a tombstone for
/// it compacted down to `start_level - 1` can never shadow anything and may be dropped outright.
fn is_base_level_for_key(version: &Version, comparator: &dyn Comparator, start_level: u8, user_key: &[u8]) -> bool {
    for level in start_level..NUM_LEVELS {
        for file in version.files(level) {
            if comparator.compare(user_key, format::user_key_of(&file.smallest)) != Ordering::Less
                && comparator.compare(user_key, format::user_key_of(&file.largest)) != Ordering::Greater
            {
                return false;
            }
        }
    }
    true
}

fn garbage_collect<FS: FileSystem>(shared: &Shared<FS>) {
    let live = {
        let state = shared.state.lock();
        LiveState {
            live_table_files: state.versions.live_files(),
            manifest_file_number: state.versions.manifest_file_number,
            log_number: state.versions.log_number,
            prev_log_number: state.versions.prev_log_number,
        }
    };
    let Ok(obsolete) = gc::obsolete_files(&*shared.fs, &shared.db_path, &live) else { return };

    for path in &obsolete {
        if let Some(name) = path.file_name() {
            match DbFileName::parse(Path::new(name)) {
                Some(DbFileName::Table { file_number } | DbFileName::TableLegacy { file_number }) => {
                    shared.table_cache.evict(file_number);
                }
                _ => {}
            }
        }
    }
    let _ = gc::delete_files(&*shared.fs, &obsolete);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;
    use crate::filesystem::MemoryFileSystem;

    fn test_options() -> Options {
        Options { comparator: Arc::new(BytewiseComparator), filter_policy: None, ..Options::default() }
    }

    #[test]
    fn put_then_get_round_trips() {
        let fs = Arc::new(MemoryFileSystem::new());
        let db = Db::open(fs, "/db", test_options()).unwrap();
        db.put(b"k", b"v", WriteOptions::default()).unwrap();
        assert_eq!(db.get(b"k", ReadOptions::default()).unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn delete_makes_the_key_disappear() {
        let fs = Arc::new(MemoryFileSystem::new());
        let db = Db::open(fs, "/db", test_options()).unwrap();
        db.put(b"k", b"v", WriteOptions::default()).unwrap();
        db.delete(b"k", WriteOptions::default()).unwrap();
        assert_eq!(db.get(b"k", ReadOptions::default()).unwrap(), None);
        assert!(!db.has(b"k", ReadOptions::default()).unwrap());
    }

    #[test]
    fn snapshot_sees_a_fixed_point_in_time() {
        let fs = Arc::new(MemoryFileSystem::new());
        let db = Db::open(fs, "/db", test_options()).unwrap();
        db.put(b"k", b"v1", WriteOptions::default()).unwrap();
        let snapshot = db.snapshot();
        db.put(b"k", b"v2", WriteOptions::default()).unwrap();

        assert_eq!(db.get_at_snapshot(b"k", &snapshot, ReadOptions::default()).unwrap(), Some(b"v1".to_vec()));
        assert_eq!(db.get(b"k", ReadOptions::default()).unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn iterator_yields_live_keys_in_order() {
        let fs = Arc::new(MemoryFileSystem::new());
        let db = Db::open(fs, "/db", test_options()).unwrap();
        db.put(b"b", b"2", WriteOptions::default()).unwrap();
        db.put(b"a", b"1", WriteOptions::default()).unwrap();
        db.delete(b"c", WriteOptions::default()).unwrap();

        let collected: Vec<_> = db.iterator(ReadOptions::default()).unwrap().collect();
        assert_eq!(collected, vec![(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())]);
    }

    #[test]
    fn reopening_recovers_synced_writes() {
        let fs = Arc::new(MemoryFileSystem::new());
        {
            let db = Db::open(fs.clone(), "/db", test_options()).unwrap();
            db.put(b"k", b"v", WriteOptions { sync: true }).unwrap();
        }
        let db = Db::open(fs, "/db", test_options()).unwrap();
        assert_eq!(db.get(b"k", ReadOptions::default()).unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn compact_range_preserves_reads_and_drops_tombstoned_keys() {
        let fs = Arc::new(MemoryFileSystem::new());
        let db = Db::open(fs, "/db", test_options()).unwrap();
        db.put(b"a", b"1", WriteOptions::default()).unwrap();
        db.put(b"b", b"2", WriteOptions::default()).unwrap();
        db.delete(b"b", WriteOptions::default()).unwrap();

        // Force the active memtable to a table file before compacting, since compact_range only
        // ever rewrites on-disk levels.
        {
            let mut state = db.shared.state.lock();
            let old_mem = std::mem::replace(&mut state.mem, Memtable::new(db.shared.comparator.clone()));
            state.imm = Some(old_mem);
        }
        for _ in 0..200 {
            if db.shared.state.lock().imm.is_none() {
                break;
            }
            db.wake_background();
            std::thread::sleep(Duration::from_millis(5));
        }

        db.compact_range(None, None).unwrap();

        assert_eq!(db.get(b"a", ReadOptions::default()).unwrap(), Some(b"1".to_vec()));
        assert_eq!(db.get(b"b", ReadOptions::default()).unwrap(), None);
    }

    #[test]
    fn automatic_flush_moves_entries_out_of_the_memtable() {
        let fs = Arc::new(MemoryFileSystem::new());
        let options = Options { write_buffer_size: 256, ..test_options() };
        let db = Db::open(fs, "/db", options).unwrap();

        for i in 0..100 {
            db.put(format!("key{i:04}").as_bytes(), b"value", WriteOptions::default()).unwrap();
        }

        let mut flushed = false;
        for _ in 0..200 {
            if db.property("lsmdb.num-files-at-level0").as_deref() != Some("0") {
                flushed = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(flushed, "expected at least one level-0 file after exceeding the write buffer size");
        assert_eq!(db.get(b"key0005", ReadOptions::default()).unwrap(), Some(b"value".to_vec()));
    }

    #[test]
    fn destroy_removes_every_recognized_file() {
        let fs = Arc::new(MemoryFileSystem::new());
        {
            let db = Db::open(fs.clone(), "/db", test_options()).unwrap();
            db.put(b"k", b"v", WriteOptions::default()).unwrap();
        }
        destroy(&*fs, Path::new("/db")).unwrap();
        assert!(fs.children(Path::new("/db")).map(|names| names.is_empty()).unwrap_or(true));
    }
}
