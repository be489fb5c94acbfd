use crate::compressor::CompressionKind;
use crate::error::Result;
use crate::filesystem::WritableFile;
use crate::filter::FilterPolicy;
use crate::format;

use super::{append_block_trailer, BlockHandle, FOOTER_LEN, TABLE_MAGIC};

/// Builds one table file, given internal-key-ordered entries via repeated [`Self::add`] calls.
///
/// Data is grouped into blocks of roughly `block_size` bytes; every `block_restart_interval`
/// entries the full key is written (a "restart point") so a binary search within a block
/// could avoid replaying every preceding entry's key. This crate's reader instead always scans
/// linearly from the nearest restart point, trading a little read throughput for a much smaller
/// reader implementation.
pub struct TableWriter<File> {
    file: File,
    filter_policy: Option<std::sync::Arc<dyn FilterPolicy>>,
    compression: CompressionKind,
    block_size: usize,
    block_restart_interval: usize,

    offset: u64,
    current_block: Vec<u8>,
    current_block_entries: usize,
    restarts: Vec<u32>,
    /// `(smallest_internal_key_in_block, block_handle)` pairs, flushed into the index block.
    index_entries: Vec<(Vec<u8>, BlockHandle)>,
    filter_keys: Vec<Vec<u8>>,

    smallest_key: Option<Vec<u8>>,
    largest_key: Option<Vec<u8>>,
    num_entries: u64,
}

impl<File: WritableFile> TableWriter<File> {
    #[must_use]
    pub fn new(
        file: File,
        filter_policy: Option<std::sync::Arc<dyn FilterPolicy>>,
        compression: CompressionKind,
        block_size: usize,
        block_restart_interval: usize,
    ) -> Self {
        Self {
            file,
            filter_policy,
            compression,
            block_size,
            block_restart_interval: block_restart_interval.max(1),
            offset: 0,
            current_block: Vec::new(),
            current_block_entries: 0,
            restarts: Vec::new(),
            index_entries: Vec::new(),
            filter_keys: Vec::new(),
            smallest_key: None,
            largest_key: None,
            num_entries: 0,
        }
    }

    /// Adds one entry. Entries must be added in ascending internal-key order.
    pub fn add(&mut self, internal_key: &[u8], value: &[u8]) -> Result<()> {
        if self.smallest_key.is_none() {
            self.smallest_key = Some(internal_key.to_vec());
        }
        self.largest_key = Some(internal_key.to_vec());
        self.num_entries += 1;
        self.filter_keys.push(format::user_key_of(internal_key).to_vec());

        if self.current_block_entries % self.block_restart_interval == 0 {
            #[allow(clippy::cast_possible_truncation)]
            self.restarts.push(self.current_block.len() as u32);
        }
        format::write_length_prefixed_slice(&mut self.current_block, internal_key);
        format::write_length_prefixed_slice(&mut self.current_block, value);
        self.current_block_entries += 1;

        if self.current_block.len() >= self.block_size {
            self.flush_data_block()?;
        }
        Ok(())
    }

    fn flush_data_block(&mut self) -> Result<()> {
        if self.current_block_entries == 0 {
            return Ok(());
        }
        let smallest_in_block = {
            let first_restart = self.restarts[0] as usize;
            let mut cursor = &self.current_block[first_restart..];
            format::read_length_prefixed_slice(&mut cursor)?.to_vec()
        };

        for restart in &self.restarts {
            self.current_block.extend_from_slice(&restart.to_le_bytes());
        }
        #[allow(clippy::cast_possible_truncation)]
        let num_restarts = self.restarts.len() as u32;
        self.current_block.extend_from_slice(&num_restarts.to_le_bytes());

        let handle = self.write_block(std::mem::take(&mut self.current_block))?;
        self.index_entries.push((smallest_in_block, handle));

        self.current_block_entries = 0;
        self.restarts.clear();
        Ok(())
    }

    fn write_block(&mut self, raw: Vec<u8>) -> Result<BlockHandle> {
        let compressed = self.compression.compress(&raw)?;
        let start_offset = self.offset;
        let mut framed = Vec::with_capacity(compressed.len() + super::BLOCK_TRAILER_LEN);
        append_block_trailer(self.compression, &compressed, &mut framed);
        self.file.write_all(&framed)?;
        self.offset += framed.len() as u64;
        Ok(BlockHandle { offset: start_offset, len: framed.len() as u64 })
    }

    /// Flushes the final data block, the filter block (if a policy is configured), the index
    /// block, and the footer, then syncs the file.
    pub fn finish(mut self) -> Result<TableSummary> {
        self.flush_data_block()?;

        let filter_handle = if let Some(policy) = self.filter_policy.clone() {
            let key_refs: Vec<&[u8]> = self.filter_keys.iter().map(Vec::as_slice).collect();
            let filter = policy.create_filter(&key_refs);
            Some(self.write_block(filter)?)
        } else {
            None
        };

        let mut index_block = Vec::new();
        for (key, handle) in &self.index_entries {
            format::write_length_prefixed_slice(&mut index_block, key);
            handle.encode(&mut index_block);
        }
        let index_handle = self.write_block(index_block)?;

        let mut footer = Vec::with_capacity(FOOTER_LEN);
        index_handle.encode(&mut footer);
        if let Some(handle) = filter_handle {
            handle.encode(&mut footer);
        } else {
            BlockHandle { offset: 0, len: 0 }.encode(&mut footer);
        }
        footer.extend_from_slice(&TABLE_MAGIC.to_le_bytes());
        debug_assert_eq!(footer.len(), FOOTER_LEN);
        self.file.write_all(&footer)?;
        self.offset += footer.len() as u64;
        self.file.sync_all()?;

        Ok(TableSummary {
            file_size: self.offset,
            smallest_key: self.smallest_key.unwrap_or_default(),
            largest_key: self.largest_key.unwrap_or_default(),
            num_entries: self.num_entries,
        })
    }
}

/// What the caller (minor/major compaction) needs to record about a just-written table as a
/// `version::edit::NewFile`.
#[derive(Debug)]
pub struct TableSummary {
    pub file_size: u64,
    pub smallest_key: Vec<u8>,
    pub largest_key: Vec<u8>,
    pub num_entries: u64,
}
