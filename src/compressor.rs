//! Block compression policy for [`crate::table`].

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionKind {
    None = 0,
    Snappy = 1,
}

impl Default for CompressionKind {
    fn default() -> Self {
        #[cfg(feature = "snappy-compression")]
        {
            Self::Snappy
        }
        #[cfg(not(feature = "snappy-compression"))]
        {
            Self::None
        }
    }
}

impl CompressionKind {
    #[must_use]
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::None),
            1 => Some(Self::Snappy),
            _ => None,
        }
    }

    pub fn compress(self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::None => Ok(data.to_vec()),
            #[cfg(feature = "snappy-compression")]
            Self::Snappy => Ok(snap::raw::Encoder::new()
                .compress_vec(data)
                .map_err(|e| Error::corruption(format!("snappy compression failed: {e}")))?),
            #[cfg(not(feature = "snappy-compression"))]
            Self::Snappy => Err(Error::unsupported("snappy-compression feature is disabled")),
        }
    }

    pub fn decompress(self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::None => Ok(data.to_vec()),
            #[cfg(feature = "snappy-compression")]
            Self::Snappy => Ok(snap::raw::Decoder::new()
                .decompress_vec(data)
                .map_err(|e| Error::corruption(format!("snappy decompression failed: {e}")))?),
            #[cfg(not(feature = "snappy-compression"))]
            Self::Snappy => Err(Error::unsupported("snappy-compression feature is disabled")),
        }
    }
}

#[cfg(all(test, feature = "snappy-compression"))]
mod tests {
    use super::*;

    #[test]
    fn snappy_round_trips() {
        let data = b"hello hello hello hello world world world".repeat(4);
        let compressed = CompressionKind::Snappy.compress(&data).unwrap();
        let decompressed = CompressionKind::Snappy.decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn none_is_identity() {
        let data = b"raw bytes".to_vec();
        let compressed = CompressionKind::None.compress(&data).unwrap();
        assert_eq!(compressed, data);
    }
}
