use std::io::{self, Read};

use thiserror::Error;

use crate::config_constants::WRITE_LOG_BLOCK_SIZE;

use super::writer::crc32c_with_type;
use super::{RecordType, HEADER_SIZE};

#[derive(Debug, Error)]
pub enum LogReadError {
    #[error("I/O error reading a log record: {0}")]
    Io(#[from] io::Error),
    #[error("log record checksum mismatch")]
    ChecksumMismatch,
    #[error("log record has an unrecognized fragment type byte {0}")]
    BadRecordType(u8),
    #[error("log fragment sequence is out of order (a {0:?} fragment was seen without a preceding First/Middle fragment)")]
    MissingStart(RecordType),
}

/// Reassembles fragmented records written by [`WriteLogWriter`](super::WriteLogWriter).
///
/// Each call to [`Self::read_record`] returns an owned `Vec<u8>` rather than a zero-copy view:
/// simpler to reason about, at the cost of one allocation per logical record.
#[derive(Debug)]
pub struct WriteLogReader<File> {
    file: File,
    block: Vec<u8>,
    /// Byte offset within `block` of the next unread fragment header.
    block_pos: usize,
    block_len: usize,
    /// Whether a checksum mismatch should be reported as an error (`true`) or silently treated
    /// as end-of-log (`false`, used when recovering the final, possibly torn, WAL segment).
    checksum_errors_are_fatal: bool,
    eof: bool,
}

impl<File: Read> WriteLogReader<File> {
    #[must_use]
    pub fn new(file: File, checksum_errors_are_fatal: bool) -> Self {
        Self {
            file,
            block: vec![0u8; WRITE_LOG_BLOCK_SIZE],
            block_pos: 0,
            block_len: 0,
            checksum_errors_are_fatal,
            eof: false,
        }
    }

    /// Returns the next reassembled logical record, or `None` at a clean end of the log.
    pub fn read_record(&mut self) -> Result<Option<Vec<u8>>, LogReadError> {
        let mut record = Vec::new();
        let mut in_fragmented_record = false;

        loop {
            match self.read_fragment()? {
                None => {
                    if in_fragmented_record && self.checksum_errors_are_fatal {
                        return Err(LogReadError::Io(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "log ends mid-record",
                        )));
                    }
                    return Ok(None);
                }
                Some((RecordType::Full, data)) => {
                    if in_fragmented_record {
                        return Err(LogReadError::MissingStart(RecordType::Full));
                    }
                    return Ok(Some(data));
                }
                Some((RecordType::First, data)) => {
                    if in_fragmented_record {
                        return Err(LogReadError::MissingStart(RecordType::First));
                    }
                    record = data;
                    in_fragmented_record = true;
                }
                Some((RecordType::Middle, data)) => {
                    if !in_fragmented_record {
                        return Err(LogReadError::MissingStart(RecordType::Middle));
                    }
                    record.extend_from_slice(&data);
                }
                Some((RecordType::Last, data)) => {
                    if !in_fragmented_record {
                        return Err(LogReadError::MissingStart(RecordType::Last));
                    }
                    record.extend_from_slice(&data);
                    return Ok(Some(record));
                }
            }
        }
    }

    fn fill_block(&mut self) -> io::Result<bool> {
        let mut total_read = 0;
        while total_read < WRITE_LOG_BLOCK_SIZE {
            match self.file.read(&mut self.block[total_read..])? {
                0 => break,
                n => total_read += n,
            }
        }
        self.block_len = total_read;
        self.block_pos = 0;
        Ok(total_read > 0)
    }

    fn read_fragment(&mut self) -> Result<Option<(RecordType, Vec<u8>)>, LogReadError> {
        loop {
            if self.eof {
                return Ok(None);
            }
            if self.block_len - self.block_pos < HEADER_SIZE {
                if !self.fill_block()? {
                    self.eof = true;
                    return Ok(None);
                }
                continue;
            }

            let header = &self.block[self.block_pos..self.block_pos + HEADER_SIZE];
            let expected_crc = u32::from_le_bytes(header[0..4].try_into().expect("4 bytes"));
            let len = u16::from_le_bytes(header[4..6].try_into().expect("2 bytes")) as usize;
            let type_byte = header[6];

            if type_byte == 0 && len == 0 && expected_crc == 0 {
                // Zero padding written when a block didn't have room for another header.
                self.block_pos = self.block_len;
                continue;
            }

            let record_type = RecordType::from_byte(type_byte)
                .ok_or(LogReadError::BadRecordType(type_byte))?;

            let fragment_start = self.block_pos + HEADER_SIZE;
            let fragment_end = fragment_start + len;
            if fragment_end > self.block_len {
                // Torn write at the tail of the log; treat as a clean end unless paranoid.
                self.eof = true;
                if self.checksum_errors_are_fatal {
                    return Err(LogReadError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "log fragment runs past block boundary",
                    )));
                }
                return Ok(None);
            }

            let fragment = &self.block[fragment_start..fragment_end];
            let actual_crc = crc32c_with_type(record_type, fragment);
            if actual_crc != expected_crc {
                self.eof = true;
                if self.checksum_errors_are_fatal {
                    return Err(LogReadError::ChecksumMismatch);
                }
                return Ok(None);
            }

            let fragment = fragment.to_vec();
            self.block_pos = fragment_end;
            return Ok(Some((record_type, fragment)));
        }
    }
}
