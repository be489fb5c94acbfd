//! `lsmdb` is an embedded, ordered key-value storage engine built on a log-structured
//! merge-tree: writes land in an in-memory table backed by a write-ahead log, and are
//! periodically compacted down through a sequence of on-disk levels to bound read
//! amplification. The design mirrors LevelDB: immutable, versioned sets of sorted table files
//! per level, leveled compaction driven by both file-count and per-file seek-miss heuristics,
//! and snapshot isolation via a monotonic sequence number threaded through every entry.
//!
//! Start with [`Db::open`] and [`Options`]. Everything the engine writes to disk lives under a
//! single directory, abstracted behind the [`filesystem::FileSystem`] trait so the whole engine
//! can run against an in-memory filesystem in tests.

pub mod comparator;
pub mod compaction;
pub mod compactor;
pub mod compressor;
pub mod config_constants;
pub mod database_files;
pub mod db;
pub mod error;
pub mod filesystem;
pub mod filter;
pub mod format;
pub mod gc;
pub mod iter;
pub mod logger;
pub mod memtable;
pub mod options;
pub mod recovery;
pub mod snapshot;
pub mod table;
pub mod table_cache;
pub mod version;
pub mod write_batch;
pub mod write_log;
pub mod writer_queue;

pub use comparator::{BytewiseComparator, Comparator};
pub use compressor::CompressionKind;
pub use db::Db;
pub use error::{Error, Result};
pub use filesystem::{FileSystem, MemoryFileSystem, StdFileSystem};
pub use filter::{BloomFilterPolicy, FilterPolicy};
pub use iter::DbIterator;
pub use options::{Options, ReadOptions, WriteOptions};
pub use snapshot::Snapshot;
pub use write_batch::WriteBatch;
