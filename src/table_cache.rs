//! An LRU cache of open [`TableReader`]s, keyed by file number, so repeated reads against the
//! same table file don't reopen and re-read its index/filter blocks every time.

use std::path::PathBuf;
use std::sync::Arc;

use quick_cache::sync::Cache;

use crate::comparator::Comparator;
use crate::database_files::DbFileName;
use crate::error::{Error, Result};
use crate::filesystem::FileSystem;
use crate::filter::FilterPolicy;
use crate::format::FileNumber;
use crate::table::TableReader;

pub struct TableCache<FS: FileSystem> {
    fs: Arc<FS>,
    db_path: PathBuf,
    comparator: Arc<dyn Comparator>,
    filter_policy: Option<Arc<dyn FilterPolicy>>,
    cache: Cache<FileNumber, Arc<TableReader<FS::RandomAccess>>>,
}

impl<FS: FileSystem> TableCache<FS> {
    #[must_use]
    pub fn new(fs: Arc<FS>, db_path: PathBuf, comparator: Arc<dyn Comparator>, filter_policy: Option<Arc<dyn FilterPolicy>>, capacity: usize) -> Self {
        Self { fs, db_path, comparator, filter_policy, cache: Cache::new(capacity.max(1)) }
    }

    pub fn get(&self, file_number: FileNumber, file_size: u64, user_key: &[u8], lookup_key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let reader = self.reader(file_number, file_size)?;
        reader.get(user_key, lookup_key)
    }

    pub fn all_entries(&self, file_number: FileNumber, file_size: u64) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let reader = self.reader(file_number, file_size)?;
        reader.all_entries()
    }

    fn reader(&self, file_number: FileNumber, file_size: u64) -> Result<Arc<TableReader<FS::RandomAccess>>> {
        if let Some(reader) = self.cache.get(&file_number) {
            return Ok(reader);
        }

        let path = self.table_path(file_number)?;
        let file = self.fs.open_random_access(&path)?;
        let reader = Arc::new(TableReader::open(file, file_size, self.comparator.clone(), self.filter_policy.clone())?);
        self.cache.insert(file_number, reader.clone());
        Ok(reader)
    }

    /// Resolves a table's path, preferring the current `.ldb` extension and falling back to the
    /// legacy `.sst` extension used by older databases.
    fn table_path(&self, file_number: FileNumber) -> Result<PathBuf> {
        let ldb = self.db_path.join(DbFileName::Table { file_number }.file_name());
        if self.fs.exists(&ldb) {
            return Ok(ldb);
        }
        let sst = self.db_path.join(DbFileName::TableLegacy { file_number }.file_name());
        if self.fs.exists(&sst) {
            return Ok(sst);
        }
        Err(Error::corruption(format!("table file {file_number:?} is missing from the database directory")))
    }

    /// Drops a file from the cache, e.g. once it's been deleted by garbage collection.
    pub fn evict(&self, file_number: FileNumber) {
        self.cache.remove(&file_number);
    }
}
