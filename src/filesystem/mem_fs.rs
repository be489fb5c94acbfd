use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{FileLock, RandomAccessFile, WritableFile};

#[derive(Debug, Default)]
struct Inner {
    files: HashMap<PathBuf, Vec<u8>>,
    locked: std::collections::HashSet<PathBuf>,
}

/// An in-memory [`FileSystem`](super::FileSystem), used by this crate's own integration tests
/// so they run without touching real disk.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileSystem(Arc<Mutex<Inner>>);

impl MemoryFileSystem {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl super::FileSystem for MemoryFileSystem {
    type Sequential = io::Cursor<Vec<u8>>;
    type RandomAccess = MemRandomAccess;
    type Writable = MemWritable;
    type Lock = MemFileLock;

    fn open_sequential(&self, path: &Path) -> io::Result<Self::Sequential> {
        let inner = self.0.lock();
        let contents = inner
            .files
            .get(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))?;
        Ok(io::Cursor::new(contents.clone()))
    }

    fn open_random_access(&self, path: &Path) -> io::Result<Self::RandomAccess> {
        let inner = self.0.lock();
        if !inner.files.contains_key(path) {
            return Err(io::Error::new(io::ErrorKind::NotFound, path.display().to_string()));
        }
        Ok(MemRandomAccess { fs: self.0.clone(), path: path.to_owned() })
    }

    fn create(&self, path: &Path) -> io::Result<Self::Writable> {
        self.0.lock().files.insert(path.to_owned(), Vec::new());
        Ok(MemWritable { fs: self.0.clone(), path: path.to_owned() })
    }

    fn open_appendable(&self, path: &Path) -> io::Result<Self::Writable> {
        self.0.lock().files.entry(path.to_owned()).or_default();
        Ok(MemWritable { fs: self.0.clone(), path: path.to_owned() })
    }

    fn exists(&self, path: &Path) -> bool {
        self.0.lock().files.contains_key(path)
    }

    fn children(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let inner = self.0.lock();
        Ok(inner
            .files
            .keys()
            .filter_map(|p| p.strip_prefix(dir).ok())
            .filter(|rel| rel.components().count() == 1)
            .map(|rel| rel.to_owned())
            .collect())
    }

    fn size_of(&self, path: &Path) -> io::Result<u64> {
        let inner = self.0.lock();
        inner
            .files
            .get(path)
            .map(|data| data.len() as u64)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.0
            .lock()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut inner = self.0.lock();
        let data = inner
            .files
            .remove(from)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, from.display().to_string()))?;
        inner.files.insert(to.to_owned(), data);
        Ok(())
    }

    fn create_dir_all(&self, _dir: &Path) -> io::Result<()> {
        Ok(())
    }

    fn remove_dir(&self, _dir: &Path) -> io::Result<()> {
        Ok(())
    }

    fn lock(&self, path: &Path) -> io::Result<Self::Lock> {
        let mut inner = self.0.lock();
        if !inner.locked.insert(path.to_owned()) {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "already locked"));
        }
        Ok(MemFileLock { fs: self.0.clone(), path: path.to_owned() })
    }
}

#[derive(Debug)]
pub struct MemRandomAccess {
    fs: Arc<Mutex<Inner>>,
    path: PathBuf,
}

impl RandomAccessFile for MemRandomAccess {
    fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let inner = self.fs.lock();
        let data = inner
            .files
            .get(&self.path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "file removed"))?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let end = start.saturating_add(len).min(data.len());
        if end - start != len {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short read"));
        }
        Ok(data[start..end].to_vec())
    }
}

#[derive(Debug)]
pub struct MemWritable {
    fs: Arc<Mutex<Inner>>,
    path: PathBuf,
}

impl io::Write for MemWritable {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.fs.lock();
        let data = inner.files.entry(self.path.clone()).or_default();
        data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl WritableFile for MemWritable {
    fn sync_all(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct MemFileLock {
    fs: Arc<Mutex<Inner>>,
    path: PathBuf,
}

impl Drop for MemFileLock {
    fn drop(&mut self) {
        self.fs.lock().locked.remove(&self.path);
    }
}

impl FileLock for MemFileLock {}
