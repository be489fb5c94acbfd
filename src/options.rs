//! Tunable knobs for opening and operating a database, with defaults and clamping ranges chosen
//! to match a conventional LSM-tree deployment.

use std::sync::Arc;

use crate::comparator::{BytewiseComparator, Comparator};
use crate::compressor::CompressionKind;
use crate::filter::{BloomFilterPolicy, FilterPolicy};

const MIN_WRITE_BUFFER_SIZE: usize = 64 * 1024;
const MAX_WRITE_BUFFER_SIZE: usize = 1024 * 1024 * 1024;
const MIN_MAX_FILE_SIZE: u64 = 1024 * 1024;
const MAX_MAX_FILE_SIZE: u64 = 1024 * 1024 * 1024;

/// Options that only take effect at `open` time.
#[derive(Clone)]
pub struct Options {
    pub comparator: Arc<dyn Comparator>,
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,
    pub compression: CompressionKind,

    pub create_if_missing: bool,
    pub error_if_exists: bool,
    pub paranoid_checks: bool,

    pub write_buffer_size: usize,
    pub max_open_files: usize,
    pub max_file_size: u64,
    pub block_size: usize,
    pub block_restart_interval: usize,
    pub block_cache_capacity_bytes: usize,

    /// Adopt the most recent WAL segment (and its replayed memtable) found during recovery as
    /// the live log, rather than flushing it to a table and starting a fresh log.
    pub reuse_logs: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            comparator: Arc::new(BytewiseComparator),
            filter_policy: Some(Arc::new(BloomFilterPolicy::default())),
            compression: CompressionKind::default(),
            create_if_missing: true,
            error_if_exists: false,
            paranoid_checks: false,
            write_buffer_size: 4 * 1024 * 1024,
            max_open_files: 1000,
            max_file_size: 2 * 1024 * 1024,
            block_size: 4096,
            block_restart_interval: 16,
            block_cache_capacity_bytes: 8 * 1024 * 1024,
            reuse_logs: false,
        }
    }
}

impl Options {
    /// Clamps user-supplied tunables into the ranges the engine can safely operate with.
    #[must_use]
    pub fn sanitize(mut self) -> Self {
        self.write_buffer_size = self.write_buffer_size.clamp(MIN_WRITE_BUFFER_SIZE, MAX_WRITE_BUFFER_SIZE);
        self.max_file_size = self.max_file_size.clamp(MIN_MAX_FILE_SIZE, MAX_MAX_FILE_SIZE);
        self.max_open_files = self.max_open_files.max(64);
        self
    }
}

/// Per-call options for reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    pub verify_checksums: bool,
    pub fill_cache: bool,
}

/// Per-call options for writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    pub sync: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_clamps_write_buffer_size() {
        let opts = Options { write_buffer_size: 1, ..Options::default() }.sanitize();
        assert_eq!(opts.write_buffer_size, MIN_WRITE_BUFFER_SIZE);
    }

    #[test]
    fn sanitize_clamps_max_file_size_upward() {
        let opts = Options { max_file_size: 0, ..Options::default() }.sanitize();
        assert_eq!(opts.max_file_size, MIN_MAX_FILE_SIZE);
    }
}
