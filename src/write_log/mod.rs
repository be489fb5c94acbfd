//! The log record framing shared by the write-ahead log and the MANIFEST: logical records are
//! split into 32 KiB-block-sized physical fragments, each with a 7-byte
//! `{crc32c: u32}{length: u16}{record_type: u8}` header.

mod reader;
mod writer;

pub use reader::{LogReadError, WriteLogReader};
pub use writer::WriteLogWriter;

use crate::config_constants::WRITE_LOG_BLOCK_SIZE;

pub(crate) const HEADER_SIZE: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum RecordType {
    Full = 1,
    First = 2,
    Middle = 3,
    Last = 4,
}

impl RecordType {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Full),
            2 => Some(Self::First),
            3 => Some(Self::Middle),
            4 => Some(Self::Last),
            _ => None,
        }
    }
}

const _: () = assert!(HEADER_SIZE < WRITE_LOG_BLOCK_SIZE);
