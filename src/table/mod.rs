//! The on-disk table (SSTable) format: a sorted sequence of internal-key entries grouped into
//! data blocks, a sparse restart-point index so a block doesn't need every key kept resident,
//! an optional Bloom filter block, and a fixed-size footer pointing at the index and
//! (optionally) filter blocks. Every block is CRC32C-checksummed and optionally Snappy
//! compressed.

mod reader;
mod writer;

pub use reader::TableReader;
pub use writer::TableWriter;

use crc32c::crc32c;

use crate::compressor::CompressionKind;

/// `{crc32c of (compression_byte ++ compressed_data): u32 LE}{compression_byte: u8}` trailer
/// appended after every block's (possibly compressed) bytes.
const BLOCK_TRAILER_LEN: usize = 5;

/// Fixed-size footer at the end of every table file:
/// `{index_block_offset: u64}{index_block_len: u64}{filter_block_offset: u64}{filter_block_len: u64}{magic: u64}`.
const FOOTER_LEN: usize = 8 * 5;
const TABLE_MAGIC: u64 = 0xdb_4c_53_4d_1e_57_4c_31;

/// The offset and length of a block within a table file.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockHandle {
    offset: u64,
    len: u64,
}

impl BlockHandle {
    fn encode(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.len.to_le_bytes());
    }

    fn decode(bytes: &[u8]) -> Self {
        let offset = u64::from_le_bytes(bytes[0..8].try_into().expect("8 bytes"));
        let len = u64::from_le_bytes(bytes[8..16].try_into().expect("8 bytes"));
        Self { offset, len }
    }
}

fn append_block_trailer(compression: CompressionKind, payload: &[u8], out: &mut Vec<u8>) {
    let start = out.len();
    out.extend_from_slice(payload);
    let crc = crc32c(&out[start..]) ^ u32::from(compression.as_byte());
    out.push(compression.as_byte());
    out.extend_from_slice(&crc.to_le_bytes());
}

fn verify_block_trailer(block_and_trailer: &[u8]) -> crate::error::Result<(CompressionKind, &[u8])> {
    let len = block_and_trailer.len();
    if len < BLOCK_TRAILER_LEN {
        return Err(crate::error::Error::corruption("table block shorter than its trailer"));
    }
    let payload = &block_and_trailer[..len - BLOCK_TRAILER_LEN];
    let compression_byte = block_and_trailer[len - BLOCK_TRAILER_LEN];
    let crc_bytes = &block_and_trailer[len - 4..];
    let expected_crc = u32::from_le_bytes(crc_bytes.try_into().expect("4 bytes"));

    let actual_crc = crc32c(payload) ^ u32::from(compression_byte);
    if actual_crc != expected_crc {
        return Err(crate::error::Error::corruption("table block checksum mismatch"));
    }
    let compression = CompressionKind::from_byte(compression_byte)
        .ok_or_else(|| crate::error::Error::corruption("table block has an unrecognized compression byte"))?;
    Ok((compression, payload))
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use super::{TableReader, TableWriter};
    use crate::comparator::BytewiseComparator;
    use crate::compressor::CompressionKind;
    use crate::filesystem::{FileSystem, MemoryFileSystem};
    use crate::filter::BloomFilterPolicy;
    use crate::format::{seek_key, EntryType, InternalKey, SequenceNumber};

    #[test]
    fn writes_and_reads_back_every_entry() {
        let fs = MemoryFileSystem::new();
        let path = Path::new("000001.ldb");
        let filter: Arc<dyn crate::filter::FilterPolicy> = Arc::new(BloomFilterPolicy::default());

        let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..50)
            .map(|n| {
                let key = InternalKey {
                    user_key: format!("key{n:04}").as_bytes(),
                    sequence: SequenceNumber(1),
                    entry_type: EntryType::Value,
                }
                .encode();
                (key, format!("value{n}").into_bytes())
            })
            .collect();

        {
            let file = fs.create(path).unwrap();
            let mut writer = TableWriter::new(file, Some(filter.clone()), CompressionKind::None, 256, 4);
            for (key, value) in &entries {
                writer.add(key, value).unwrap();
            }
            writer.finish().unwrap();
        }

        let file_size = fs.size_of(path).unwrap();
        let file = fs.open_random_access(path).unwrap();
        let reader = TableReader::open(file, file_size, Arc::new(BytewiseComparator), Some(filter)).unwrap();

        let lookup = seek_key(b"key0010", SequenceNumber(1));
        let found = reader.get(b"key0010", &lookup).unwrap();
        assert_eq!(found.map(|(_, v)| v), Some(b"value10".to_vec()));

        assert_eq!(reader.all_entries().unwrap().len(), entries.len());
    }

    #[test]
    fn get_returns_none_for_absent_key() {
        let fs = MemoryFileSystem::new();
        let path = Path::new("000002.ldb");
        {
            let file = fs.create(path).unwrap();
            let mut writer = TableWriter::new(file, None, CompressionKind::None, 256, 4);
            let key = InternalKey { user_key: b"a", sequence: SequenceNumber(1), entry_type: EntryType::Value }.encode();
            writer.add(&key, b"1").unwrap();
            writer.finish().unwrap();
        }
        let file_size = fs.size_of(path).unwrap();
        let file = fs.open_random_access(path).unwrap();
        let reader = TableReader::open(file, file_size, Arc::new(BytewiseComparator), None).unwrap();
        let lookup = seek_key(b"zzz", SequenceNumber(1));
        assert!(reader.get(b"zzz", &lookup).unwrap().is_none());
    }
}
