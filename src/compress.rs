//! Per-value compression backends.
//!
//! The codec offers every byte-string and text payload to both backends and
//! keeps whichever output is strictly smallest, including the identity. The
//! chosen method is embedded in the value's type tag, never negotiated out
//! of band. Decompression always runs under the caller's allocation
//! ceiling, since length fields inside compressed payloads are
//! attacker-shaped until proven otherwise.

use std::io::{Read, Write};

use crate::error::CodecError;

/// Compression method, as embedded in a type-tag offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Identity = 0,
    Deflate = 1,
    Zstd = 2,
}

impl Method {
    pub(crate) fn from_tag_offset(offset: u8) -> Option<Method> {
        match offset {
            0 => Some(Method::Identity),
            1 => Some(Method::Deflate),
            2 => Some(Method::Zstd),
            _ => None,
        }
    }
}

/// A compression backend usable by the codec.
pub trait Compressor: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;

    /// Decompresses `data`, refusing to produce more than `ceiling` bytes.
    fn decompress(&self, data: &[u8], ceiling: usize) -> Result<Vec<u8>, CodecError>;
}

/// Deflate-style backend (raw deflate, no container header).
pub struct DeflateCompressor {
    level: u32,
}

impl DeflateCompressor {
    pub fn new(level: u32) -> Self {
        Self { level }
    }
}

impl Default for DeflateCompressor {
    fn default() -> Self {
        Self { level: 6 }
    }
}

impl Compressor for DeflateCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::new(self.level));
        encoder.write_all(data).map_err(|_| CodecError::Corrupt)?;
        encoder.finish().map_err(|_| CodecError::Corrupt)
    }

    fn decompress(&self, data: &[u8], ceiling: usize) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        let limit = (ceiling as u64).saturating_add(1);
        flate2::read::DeflateDecoder::new(data)
            .take(limit)
            .read_to_end(&mut out)
            .map_err(|_| CodecError::Corrupt)?;
        if out.len() > ceiling {
            return Err(CodecError::AllocationCeiling {
                requested: out.len() as u64,
                ceiling: ceiling as u64,
            });
        }
        Ok(out)
    }
}

/// Dictionary-oriented backend (zstd, with an optional pre-trained
/// dictionary shared between the sealing and opening side).
pub struct ZstdCompressor {
    level: i32,
    dictionary: Option<Vec<u8>>,
}

impl ZstdCompressor {
    pub fn new(level: i32) -> Self {
        Self {
            level,
            dictionary: None,
        }
    }

    pub fn with_dictionary(level: i32, dictionary: Vec<u8>) -> Self {
        Self {
            level,
            dictionary: Some(dictionary),
        }
    }
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        Self::new(3)
    }
}

impl Compressor for ZstdCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        match &self.dictionary {
            Some(dict) => zstd::bulk::Compressor::with_dictionary(self.level, dict)
                .and_then(|mut c| c.compress(data))
                .map_err(|_| CodecError::Corrupt),
            None => zstd::bulk::compress(data, self.level).map_err(|_| CodecError::Corrupt),
        }
    }

    fn decompress(&self, data: &[u8], ceiling: usize) -> Result<Vec<u8>, CodecError> {
        // The declared content size bounds the allocation; a frame lying
        // about it then fails against the capacity below.
        let capacity = match zstd::zstd_safe::get_frame_content_size(data) {
            Ok(Some(size)) if size > ceiling as u64 => {
                return Err(CodecError::AllocationCeiling {
                    requested: size,
                    ceiling: ceiling as u64,
                })
            }
            Ok(Some(size)) => size as usize,
            _ => ceiling,
        };
        let out = match &self.dictionary {
            Some(dict) => zstd::bulk::Decompressor::with_dictionary(dict)
                .and_then(|mut d| d.decompress(data, capacity))
                .map_err(|_| CodecError::Corrupt)?,
            None => zstd::bulk::decompress(data, capacity).map_err(|_| CodecError::Corrupt)?,
        };
        if out.len() > ceiling {
            return Err(CodecError::AllocationCeiling {
                requested: out.len() as u64,
                ceiling: ceiling as u64,
            });
        }
        Ok(out)
    }
}
