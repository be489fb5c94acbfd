use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::error::{Error, Result};
use crate::filesystem::RandomAccessFile;
use crate::filter::FilterPolicy;
use crate::format;

use super::{verify_block_trailer, BlockHandle, FOOTER_LEN, TABLE_MAGIC};

/// Opens and serves point lookups and ordered iteration against one table file.
pub struct TableReader<File> {
    file: File,
    comparator: Arc<dyn Comparator>,
    filter_policy: Option<Arc<dyn FilterPolicy>>,
    index: Vec<(Vec<u8>, BlockHandle)>,
    filter_block: Option<Vec<u8>>,
}

impl<File: RandomAccessFile> TableReader<File> {
    pub fn open(file: File, file_size: u64, comparator: Arc<dyn Comparator>, filter_policy: Option<Arc<dyn FilterPolicy>>) -> Result<Self> {
        if file_size < FOOTER_LEN as u64 {
            return Err(Error::corruption("table file is shorter than its footer"));
        }
        let footer = file.read_at(file_size - FOOTER_LEN as u64, FOOTER_LEN)?;
        let magic = u64::from_le_bytes(footer[32..40].try_into().expect("8 bytes"));
        if magic != TABLE_MAGIC {
            return Err(Error::corruption("table file has an invalid magic number"));
        }
        let index_handle = BlockHandle::decode(&footer[0..16]);
        let filter_handle = BlockHandle::decode(&footer[16..32]);

        let index_raw = read_block(&file, index_handle)?;
        let index = decode_index_block(&index_raw)?;

        let filter_block = if filter_handle.len > 0 {
            Some(read_block(&file, filter_handle)?)
        } else {
            None
        };

        Ok(Self { file, comparator, filter_policy, index, filter_block })
    }

    /// Looks up `lookup_key` (an encoded internal key at the maximum type for its sequence),
    /// invoking `found` with the first entry at or after it. `found` decides whether the entry
    /// matches the user key being searched for; this mirrors `Version::get`'s level search.
    pub fn get(&self, user_key: &[u8], lookup_key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let Some(block_index) = self.find_block(user_key) else { return Ok(None) };

        if let (Some(policy), Some(filter)) = (&self.filter_policy, &self.filter_block) {
            if !policy.key_may_match(user_key, filter) {
                return Ok(None);
            }
        }

        let (_, handle) = &self.index[block_index];
        let block = read_block(&self.file, *handle)?;
        let mut entries = iterate_block(&block)?;

        for (key, value) in &mut entries {
            match format::compare_internal_keys(&key, lookup_key, |a, b| self.comparator.compare(a, b)) {
                Ordering::Less => continue,
                Ordering::Equal | Ordering::Greater => {
                    if self.comparator.compare(format::user_key_of(&key), user_key) == Ordering::Equal {
                        return Ok(Some((key, value)));
                    }
                    return Ok(None);
                }
            }
        }
        Ok(None)
    }

    /// Returns every entry in the table, in internal-key order. Used by compaction's merging
    /// iterator; a real engine would stream block-by-block, but reading a whole (bounded-size)
    /// table at once keeps this reader simple.
    pub fn all_entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        for (_, handle) in &self.index {
            let block = read_block(&self.file, *handle)?;
            out.extend(iterate_block(&block)?);
        }
        Ok(out)
    }

    fn find_block(&self, user_key: &[u8]) -> Option<usize> {
        let index = self.index.partition_point(|(smallest, _)| {
            self.comparator.compare(format::user_key_of(smallest), user_key) != Ordering::Greater
        });
        index.checked_sub(1)
    }
}

fn read_block(file: &impl RandomAccessFile, handle: BlockHandle) -> Result<Vec<u8>> {
    let raw = file.read_at(handle.offset, handle.len as usize)?;
    let (compression, payload) = verify_block_trailer(&raw)?;
    compression.decompress(payload)
}

fn decode_index_block(block: &[u8]) -> Result<Vec<(Vec<u8>, BlockHandle)>> {
    let mut input = block;
    let mut out = Vec::new();
    while !input.is_empty() {
        let key = format::read_length_prefixed_slice(&mut input)?.to_vec();
        if input.len() < 16 {
            return Err(Error::corruption("table index entry is missing its block handle"));
        }
        let handle = BlockHandle::decode(&input[..16]);
        input = &input[16..];
        out.push((key, handle));
    }
    Ok(out)
}

/// Decodes a data block's entries. The restart-point array at the block's tail is ignored by
/// this reader (see the note on [`super::writer::TableWriter`]): every entry stores its full
/// key, so a plain linear scan from the front is sufficient and correct.
fn iterate_block(block: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    if block.len() < 4 {
        return Err(Error::corruption("table data block is too short to hold a restart count"));
    }
    let num_restarts = u32::from_le_bytes(block[block.len() - 4..].try_into().expect("4 bytes")) as usize;
    let restarts_len = num_restarts * 4 + 4;
    if block.len() < restarts_len {
        return Err(Error::corruption("table data block restart array overruns the block"));
    }
    let mut input = &block[..block.len() - restarts_len];

    let mut out = Vec::new();
    while !input.is_empty() {
        let key = format::read_length_prefixed_slice(&mut input)?.to_vec();
        let value = format::read_length_prefixed_slice(&mut input)?.to_vec();
        out.push((key, value));
    }
    Ok(out)
}
