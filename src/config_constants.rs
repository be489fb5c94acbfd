//! Tuning constants governing compaction triggers, level byte budgets, and seek-driven
//! compaction. These are the standard empirical values this style of LSM tree has converged on,
//! preserved verbatim rather than re-derived.

/// Number of levels in the LSM tree, levels `0..NUM_LEVELS`.
pub const NUM_LEVELS: u8 = 7;
pub const NUM_LEVELS_USIZE: usize = NUM_LEVELS as usize;

/// The highest level a level-0 flush may land on directly.
pub const MAX_MEM_COMPACT_LEVEL: u8 = 2;

/// Level-0 file count at which a size-driven compaction may target level 0.
pub const L0_COMPACTION_TRIGGER: usize = 4;
/// Level-0 file count at which writers are slowed down by a fixed delay.
pub const L0_SLOWDOWN_WRITES_TRIGGER: usize = 8;
/// Level-0 file count at which writers block entirely.
pub const L0_STOP_WRITES_TRIGGER: usize = 12;

/// Byte budget of level 1; level `n >= 1` budget multiplies by `MAX_BYTES_MULTIPLIER` per level.
pub const MAX_BYTES_FOR_LEVEL_BASE: f64 = 10.0 * 1024.0 * 1024.0;
pub const MAX_BYTES_MULTIPLIER: f64 = 10.0;

/// A compaction's output file is closed early once accumulated grandparent overlap exceeds
/// `GRANDPARENT_OVERLAP_FACTOR * target_file_size`.
pub const GRANDPARENT_OVERLAP_FACTOR: u64 = 10;

/// A trivial move is only taken if total grandparent overlap is at most this multiple of the
/// target file size.
pub const MAX_GRANDPARENT_OVERLAP_FOR_TRIVIAL_MOVE: u64 = 10;

/// Ceiling on "grow level-i without affecting level i+1": expanded inputs must stay under this
/// multiple of the target file size.
pub const EXPANDED_COMPACTION_BYTE_LIMIT_FACTOR: u64 = 25;

/// Minimum `allowed_seeks` floor for any file, regardless of size.
pub const MIN_ALLOWED_SEEKS: u32 = 100;
/// One allowed seek is granted per this many bytes of file size.
pub const BYTES_PER_ALLOWED_SEEK: u64 = 16 * 1024;

/// Size of a physical block in the write-ahead-log / MANIFEST framing.
pub const WRITE_LOG_BLOCK_SIZE: usize = 32 * 1024;

/// Writers wait this long once level 0 crosses [`L0_SLOWDOWN_WRITES_TRIGGER`], to let
/// compactions catch up, before proceeding.
pub const WRITE_SLOWDOWN_DELAY_MICROS: u64 = 1000;
