//! The file taxonomy: recognizing and naming every file a database directory may contain.

use std::path::{Path, PathBuf};

use crate::format::FileNumber;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbFileName {
    Log { file_number: FileNumber },
    Lockfile,
    Table { file_number: FileNumber },
    /// Legacy `.sst` extension, accepted on read only.
    TableLegacy { file_number: FileNumber },
    Manifest { file_number: FileNumber },
    Current,
    Temp { file_number: FileNumber },
    InfoLog,
    OldInfoLog,
}

impl DbFileName {
    #[must_use]
    pub fn parse(file_name: &Path) -> Option<Self> {
        // All valid LevelDB-style file names are 7-bit ASCII.
        let file_name = file_name.to_str()?;
        let &first_byte = file_name.as_bytes().first()?;
        // `from_str_radix` accepts a leading `+`; reject it so "+5.log" isn't parsed as file 5.
        if first_byte == b'+' {
            return None;
        }

        if let Some(digits) = file_name.strip_suffix(".ldb") {
            return Some(Self::Table { file_number: parse_file_number(digits)? });
        }
        if let Some(digits) = file_name.strip_suffix(".log") {
            return Some(Self::Log { file_number: parse_file_number(digits)? });
        }
        if let Some(digits) = file_name.strip_suffix(".sst") {
            return Some(Self::TableLegacy { file_number: parse_file_number(digits)? });
        }
        if let Some(digits) = file_name.strip_suffix(".dbtmp") {
            return Some(Self::Temp { file_number: parse_file_number(digits)? });
        }
        if let Some(digits) = file_name.strip_prefix("MANIFEST-") {
            return Some(Self::Manifest { file_number: parse_file_number(digits)? });
        }

        Some(match file_name {
            "LOCK" => Self::Lockfile,
            "CURRENT" => Self::Current,
            "LOG" => Self::InfoLog,
            "LOG.old" => Self::OldInfoLog,
            _ => return None,
        })
    }

    #[must_use]
    pub fn file_name(self) -> PathBuf {
        match self {
            Self::Log { file_number } => format!("{:06}.log", file_number.0).into(),
            Self::Lockfile => Path::new("LOCK").to_owned(),
            Self::Table { file_number } => format!("{:06}.ldb", file_number.0).into(),
            Self::TableLegacy { file_number } => format!("{:06}.sst", file_number.0).into(),
            Self::Manifest { file_number } => format!("MANIFEST-{:06}", file_number.0).into(),
            Self::Current => Path::new("CURRENT").to_owned(),
            Self::Temp { file_number } => format!("{:06}.dbtmp", file_number.0).into(),
            Self::InfoLog => Path::new("LOG").to_owned(),
            Self::OldInfoLog => Path::new("LOG.old").to_owned(),
        }
    }
}

fn parse_file_number(digits: &str) -> Option<FileNumber> {
    let &first = digits.as_bytes().first()?;
    if first == b'+' {
        return None;
    }
    digits.parse::<u64>().ok().map(FileNumber)
}
