//! The `FileSystem` capability set the rest of the engine is written against, plus a
//! `std::fs`-backed implementation and an in-memory one used by this crate's own tests.

pub mod mem_fs;
mod std_fs;

use std::fmt::Debug;
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};

pub use mem_fs::MemoryFileSystem;
pub use std_fs::StdFileSystem;

/// A file opened for buffered sequential reading, as used when replaying logs and manifests.
pub trait SequentialFile: Read + Debug {}
impl<T: Read + Debug> SequentialFile for T {}

/// A file opened for positioned reads, as used by table readers.
pub trait RandomAccessFile: Debug {
    fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>>;
}

/// A file opened for appending, as used by the WAL, the MANIFEST, and table writers.
pub trait WritableFile: Write + Debug {
    fn sync_all(&mut self) -> io::Result<()>;
}

/// An advisory, process-exclusive lock on the database directory's `LOCK` file.
pub trait FileLock: Debug {}

/// Everything the engine needs from the filesystem, abstracted so tests can run against an
/// in-memory implementation instead of real disk I/O.
pub trait FileSystem: Debug + Send + Sync {
    type Sequential: SequentialFile;
    type RandomAccess: RandomAccessFile;
    type Writable: WritableFile;
    type Lock: FileLock;

    fn open_sequential(&self, path: &Path) -> io::Result<Self::Sequential>;
    fn open_random_access(&self, path: &Path) -> io::Result<Self::RandomAccess>;
    /// Opens `path` for writing, truncating any existing contents.
    fn create(&self, path: &Path) -> io::Result<Self::Writable>;
    /// Opens `path` for writing, appending to any existing contents.
    fn open_appendable(&self, path: &Path) -> io::Result<Self::Writable>;

    fn exists(&self, path: &Path) -> bool;
    fn children(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;
    fn size_of(&self, path: &Path) -> io::Result<u64>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn create_dir_all(&self, dir: &Path) -> io::Result<()>;
    fn remove_dir(&self, dir: &Path) -> io::Result<()>;

    fn lock(&self, path: &Path) -> io::Result<Self::Lock>;

    /// Writes `contents` to `path` as a single atomic operation: written to a temp file and
    /// renamed into place, so a crash never leaves `path` half-written. Used for `CURRENT`.
    fn write_file_atomic(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let tmp = path.with_extension("dbtmp-atomic");
        {
            let mut file = self.create(&tmp)?;
            file.write_all(contents)?;
            file.sync_all()?;
        }
        self.rename(&tmp, path)
    }

    fn read_file_to_end(&self, path: &Path) -> io::Result<Vec<u8>> {
        let mut file = self.open_sequential(path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// Seekable position-independent reads layered over a plain `Read + Seek` file, used by the
/// `std_fs` backend where the OS doesn't expose pread directly through `std`.
#[derive(Debug)]
pub(crate) struct ReadAtAdapter<F>(pub parking_lot::Mutex<F>);

impl<F: Read + Seek + Debug> RandomAccessFile for ReadAtAdapter<F> {
    fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        use std::io::SeekFrom;
        let mut guard = self.0.lock();
        guard.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        guard.read_exact(&mut buf)?;
        Ok(buf)
    }
}
