use std::io;

use crc32c::crc32c;

use crate::config_constants::WRITE_LOG_BLOCK_SIZE;
use crate::filesystem::WritableFile;

use super::{RecordType, HEADER_SIZE};

/// Fragments logical records across 32 KiB blocks and writes the framed bytes to `file`.
///
/// Owns no buffering beyond what's needed to fragment a single record: each call to
/// [`Self::add_record`] copies its input once, into fragment-sized pieces, and writes each
/// piece through immediately.
#[derive(Debug)]
pub struct WriteLogWriter<File> {
    file: File,
    /// Bytes remaining in the current physical block.
    block_offset: usize,
}

impl<File: WritableFile> WriteLogWriter<File> {
    #[must_use]
    pub fn new(file: File) -> Self {
        Self { file, block_offset: 0 }
    }

    /// Resumes appending to a log whose on-disk length is already known (used when continuing
    /// to write to a WAL segment adopted from a previous process via `reuse_logs`).
    #[must_use]
    pub fn resuming_at(file: File, current_length: u64) -> Self {
        let block_offset = (current_length as usize) % WRITE_LOG_BLOCK_SIZE;
        Self { file, block_offset }
    }

    pub fn add_record(&mut self, mut data: &[u8]) -> io::Result<()> {
        let mut first_fragment = true;

        loop {
            let space_left = WRITE_LOG_BLOCK_SIZE - self.block_offset;
            if space_left < HEADER_SIZE {
                // Not enough room for even a header: pad the rest of the block with zeroes
                // and start a fresh one.
                if space_left > 0 {
                    self.file.write_all(&vec![0u8; space_left])?;
                }
                self.block_offset = 0;
                continue;
            }

            let avail = space_left - HEADER_SIZE;
            let fragment_len = avail.min(data.len());
            let last_fragment = fragment_len == data.len();

            let record_type = match (first_fragment, last_fragment) {
                (true, true) => RecordType::Full,
                (true, false) => RecordType::First,
                (false, true) => RecordType::Last,
                (false, false) => RecordType::Middle,
            };

            self.write_fragment(record_type, &data[..fragment_len])?;
            data = &data[fragment_len..];
            first_fragment = false;

            if last_fragment {
                return Ok(());
            }
        }
    }

    fn write_fragment(&mut self, record_type: RecordType, fragment: &[u8]) -> io::Result<()> {
        debug_assert!(fragment.len() <= u16::MAX as usize);
        #[allow(clippy::cast_possible_truncation)]
        let len = fragment.len() as u16;

        let mut header = [0u8; HEADER_SIZE];
        header[4..6].copy_from_slice(&len.to_le_bytes());
        header[6] = record_type as u8;
        let crc = crc32c_with_type(record_type, fragment);
        header[0..4].copy_from_slice(&crc.to_le_bytes());

        self.file.write_all(&header)?;
        self.file.write_all(fragment)?;
        self.block_offset += HEADER_SIZE + fragment.len();
        Ok(())
    }

    pub fn sync(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }
}

pub(crate) fn crc32c_with_type(record_type: RecordType, fragment: &[u8]) -> u32 {
    crc32c::crc32c_append(crc32c(&[record_type as u8]), fragment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::{FileSystem, MemoryFileSystem};
    use std::path::Path;

    #[test]
    fn single_record_round_trips_through_reader() {
        let fs = MemoryFileSystem::new();
        let path = Path::new("000001.log");
        {
            let file = fs.create(path).unwrap();
            let mut writer = WriteLogWriter::new(file);
            writer.add_record(b"hello world").unwrap();
        }
        let file = fs.open_sequential(path).unwrap();
        let mut reader = super::super::WriteLogReader::new(file, true);
        assert_eq!(reader.read_record().unwrap(), Some(b"hello world".to_vec()));
        assert_eq!(reader.read_record().unwrap(), None);
    }

    #[test]
    fn record_spanning_multiple_blocks_round_trips() {
        let fs = MemoryFileSystem::new();
        let path = Path::new("000001.log");
        let big = vec![0x42u8; WRITE_LOG_BLOCK_SIZE * 3];
        {
            let file = fs.create(path).unwrap();
            let mut writer = WriteLogWriter::new(file);
            writer.add_record(&big).unwrap();
            writer.add_record(b"tail record").unwrap();
        }
        let file = fs.open_sequential(path).unwrap();
        let mut reader = super::super::WriteLogReader::new(file, true);
        assert_eq!(reader.read_record().unwrap(), Some(big));
        assert_eq!(reader.read_record().unwrap(), Some(b"tail record".to_vec()));
        assert_eq!(reader.read_record().unwrap(), None);
    }
}
