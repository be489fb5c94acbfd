use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;

use super::{FileLock, ReadAtAdapter, WritableFile};

/// A [`FileSystem`](super::FileSystem) backed directly by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFileSystem;

impl super::FileSystem for StdFileSystem {
    type Sequential = File;
    type RandomAccess = ReadAtAdapter<File>;
    type Writable = File;
    type Lock = StdFileLock;

    fn open_sequential(&self, path: &Path) -> io::Result<Self::Sequential> {
        File::open(path)
    }

    fn open_random_access(&self, path: &Path) -> io::Result<Self::RandomAccess> {
        Ok(ReadAtAdapter(parking_lot::Mutex::new(File::open(path)?)))
    }

    fn create(&self, path: &Path) -> io::Result<Self::Writable> {
        OpenOptions::new().write(true).create(true).truncate(true).open(path)
    }

    fn open_appendable(&self, path: &Path) -> io::Result<Self::Writable> {
        OpenOptions::new().write(true).create(true).append(true).open(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn children(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.file_name().into()))
            .collect()
    }

    fn size_of(&self, path: &Path) -> io::Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn create_dir_all(&self, dir: &Path) -> io::Result<()> {
        fs::create_dir_all(dir)
    }

    fn remove_dir(&self, dir: &Path) -> io::Result<()> {
        fs::remove_dir(dir)
    }

    fn lock(&self, path: &Path) -> io::Result<Self::Lock> {
        let file = OpenOptions::new().write(true).create(true).open(path)?;
        FileExt::try_lock_exclusive(&file)?;
        Ok(StdFileLock(file))
    }
}

impl WritableFile for File {
    fn sync_all(&mut self) -> io::Result<()> {
        File::sync_all(self)
    }
}

/// Holds the `LOCK` file open for the process's lifetime; the advisory lock is released when
/// this is dropped.
#[derive(Debug)]
pub struct StdFileLock(File);

impl FileLock for StdFileLock {}
