//! The version-edit wire format: a sparse set of changes to apply to a `Version`, persisted as
//! one MANIFEST log record per edit. Tags identify which optional fields are present so an edit
//! that only touches one field stays small.

use crate::error::{Error, Result};
use crate::format::{
    read_length_prefixed_slice, read_varint_u32, read_varint_u64, write_length_prefixed_slice,
    write_varint_u32, write_varint_u64, FileNumber, SequenceNumber,
};

use super::file_metadata::FileMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
enum EditTag {
    Comparator = 1,
    LogNumber = 2,
    NextFileNumber = 3,
    LastSequence = 4,
    CompactPointer = 5,
    DeletedFile = 6,
    NewFile = 7,
    PrevLogNumber = 9,
}

impl EditTag {
    fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            1 => Self::Comparator,
            2 => Self::LogNumber,
            3 => Self::NextFileNumber,
            4 => Self::LastSequence,
            5 => Self::CompactPointer,
            6 => Self::DeletedFile,
            7 => Self::NewFile,
            9 => Self::PrevLogNumber,
            _ => return None,
        })
    }
}

/// A single `new_files` entry in a [`VersionEdit`]: the level to add the file to plus its
/// metadata.
#[derive(Debug)]
pub struct NewFile {
    pub level: u8,
    pub metadata: FileMetadata,
}

/// A description of changes to apply atomically to the current [`Version`](super::Version).
#[derive(Debug, Default)]
pub struct VersionEdit {
    pub comparator_name: Option<String>,
    pub log_number: Option<FileNumber>,
    pub prev_log_number: Option<FileNumber>,
    pub next_file_number: Option<FileNumber>,
    pub last_sequence: Option<SequenceNumber>,
    /// `(level, smallest_internal_key_not_yet_compacted)`, updated after each compaction of that
    /// level so later compactions of the same level resume from where the last one left off.
    pub compact_pointers: Vec<(u8, Vec<u8>)>,
    pub deleted_files: Vec<(u8, FileNumber)>,
    pub new_files: Vec<NewFile>,
}

impl VersionEdit {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, level: u8, metadata: FileMetadata) {
        self.new_files.push(NewFile { level, metadata });
    }

    pub fn delete_file(&mut self, level: u8, file_number: FileNumber) {
        self.deleted_files.push((level, file_number));
    }

    pub fn set_compact_pointer(&mut self, level: u8, internal_key: Vec<u8>) {
        self.compact_pointers.push((level, internal_key));
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        if let Some(name) = &self.comparator_name {
            write_varint_u32(out, EditTag::Comparator as u32);
            write_length_prefixed_slice(out, name.as_bytes());
        }
        if let Some(log_number) = self.log_number {
            write_varint_u32(out, EditTag::LogNumber as u32);
            write_varint_u64(out, log_number.0);
        }
        if let Some(prev_log_number) = self.prev_log_number {
            write_varint_u32(out, EditTag::PrevLogNumber as u32);
            write_varint_u64(out, prev_log_number.0);
        }
        if let Some(next_file_number) = self.next_file_number {
            write_varint_u32(out, EditTag::NextFileNumber as u32);
            write_varint_u64(out, next_file_number.0);
        }
        if let Some(last_sequence) = self.last_sequence {
            write_varint_u32(out, EditTag::LastSequence as u32);
            write_varint_u64(out, last_sequence.0);
        }
        for (level, key) in &self.compact_pointers {
            write_varint_u32(out, EditTag::CompactPointer as u32);
            write_varint_u32(out, u32::from(*level));
            write_length_prefixed_slice(out, key);
        }
        for (level, file_number) in &self.deleted_files {
            write_varint_u32(out, EditTag::DeletedFile as u32);
            write_varint_u32(out, u32::from(*level));
            write_varint_u64(out, file_number.0);
        }
        for new_file in &self.new_files {
            write_varint_u32(out, EditTag::NewFile as u32);
            write_varint_u32(out, u32::from(new_file.level));
            write_varint_u64(out, new_file.metadata.file_number.0);
            write_varint_u64(out, new_file.metadata.file_size);
            write_length_prefixed_slice(out, &new_file.metadata.smallest);
            write_length_prefixed_slice(out, &new_file.metadata.largest);
        }
    }

    pub fn decode(mut input: &[u8]) -> Result<Self> {
        let mut edit = Self::new();

        while !input.is_empty() {
            let tag = read_varint_u32(&mut input)?;
            let tag = EditTag::from_u32(tag)
                .ok_or_else(|| Error::corruption("version edit has an unrecognized tag"))?;

            match tag {
                EditTag::Comparator => {
                    let name = read_length_prefixed_slice(&mut input)?;
                    edit.comparator_name = Some(
                        String::from_utf8(name.to_vec())
                            .map_err(|_| Error::corruption("comparator name is not valid UTF-8"))?,
                    );
                }
                EditTag::LogNumber => edit.log_number = Some(FileNumber(read_varint_u64(&mut input)?)),
                EditTag::PrevLogNumber => {
                    edit.prev_log_number = Some(FileNumber(read_varint_u64(&mut input)?));
                }
                EditTag::NextFileNumber => {
                    edit.next_file_number = Some(FileNumber(read_varint_u64(&mut input)?));
                }
                EditTag::LastSequence => {
                    edit.last_sequence = Some(SequenceNumber(read_varint_u64(&mut input)?));
                }
                EditTag::CompactPointer => {
                    let level = read_level(&mut input)?;
                    let key = read_length_prefixed_slice(&mut input)?.to_vec();
                    edit.compact_pointers.push((level, key));
                }
                EditTag::DeletedFile => {
                    let level = read_level(&mut input)?;
                    let file_number = FileNumber(read_varint_u64(&mut input)?);
                    edit.deleted_files.push((level, file_number));
                }
                EditTag::NewFile => {
                    let level = read_level(&mut input)?;
                    let file_number = FileNumber(read_varint_u64(&mut input)?);
                    let file_size = read_varint_u64(&mut input)?;
                    let smallest = read_length_prefixed_slice(&mut input)?.to_vec();
                    let largest = read_length_prefixed_slice(&mut input)?.to_vec();
                    edit.new_files.push(NewFile {
                        level,
                        metadata: FileMetadata::new(file_number, file_size, smallest, largest),
                    });
                }
            }
        }

        Ok(edit)
    }
}

fn read_level(input: &mut &[u8]) -> Result<u8> {
    let level = read_varint_u32(input)?;
    u8::try_from(level).map_err(|_| Error::corruption("version edit level does not fit in a u8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_field() {
        let mut edit = VersionEdit::new();
        edit.comparator_name = Some("lsmdb.BytewiseComparator".to_owned());
        edit.log_number = Some(FileNumber(3));
        edit.prev_log_number = Some(FileNumber(2));
        edit.next_file_number = Some(FileNumber(9));
        edit.last_sequence = Some(SequenceNumber(42));
        edit.set_compact_pointer(1, b"pointer".to_vec());
        edit.delete_file(0, FileNumber(5));
        edit.add_file(1, FileMetadata::new(FileNumber(6), 4096, b"a".to_vec(), b"z".to_vec()));

        let mut buf = Vec::new();
        edit.encode(&mut buf);
        let decoded = VersionEdit::decode(&buf).unwrap();

        assert_eq!(decoded.comparator_name, edit.comparator_name);
        assert_eq!(decoded.log_number, edit.log_number);
        assert_eq!(decoded.prev_log_number, edit.prev_log_number);
        assert_eq!(decoded.next_file_number, edit.next_file_number);
        assert_eq!(decoded.last_sequence, edit.last_sequence);
        assert_eq!(decoded.compact_pointers, edit.compact_pointers);
        assert_eq!(decoded.deleted_files, edit.deleted_files);
        assert_eq!(decoded.new_files.len(), 1);
        assert_eq!(decoded.new_files[0].metadata.file_number, FileNumber(6));
    }

    #[test]
    fn decode_rejects_unrecognized_tag() {
        let mut buf = Vec::new();
        write_varint_u32(&mut buf, 99);
        assert!(VersionEdit::decode(&buf).is_err());
    }
}
