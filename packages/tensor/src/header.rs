//! Fixed 68-byte tensor header.

use crate::error::{CodecError, CodecResult};

/// Number of little-endian `u32` words in the header.
pub const HEADER_FIELDS: usize = 17;

/// Header size in bytes.
pub const HEADER_LEN: usize = HEADER_FIELDS * 4;

/// Compression marker the server uses for compressed payloads.
pub const COMPRESSED_MAGIC: u32 = 1_012_247;

/// Tensor lives in CPU memory.
pub const MEMORY_CPU: u32 = 0x1;

/// NHWC layout flag.
pub const LAYOUT_NHWC: u32 = 0x02;

/// Half-float element type flag.
pub const ELEMENT_TYPE_F16: u32 = 0x20000;

const FIELD_COMPRESSION: usize = 0;
const FIELD_MEMORY: usize = 1;
const FIELD_LAYOUT: usize = 2;
const FIELD_ELEMENT_TYPE: usize = 3;
const FIELD_BATCH: usize = 5;
const FIELD_HEIGHT: usize = 6;
const FIELD_WIDTH: usize = 7;
const FIELD_CHANNELS: usize = 8;

/// Decoded view of the tensor header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorHeader {
    pub compression: u32,
    pub height: u32,
    pub width: u32,
    pub channels: u32,
}

impl TensorHeader {
    /// Header for an uncompressed tensor of the given shape.
    pub fn new(height: u32, width: u32, channels: u32) -> Self {
        Self {
            compression: 0,
            height,
            width,
            channels,
        }
    }

    /// Whether the payload uses the server's compressed encoding.
    pub fn is_compressed(&self) -> bool {
        self.compression == COMPRESSED_MAGIC
    }

    /// Number of half-precision elements in the payload.
    pub fn element_count(&self) -> Option<usize> {
        (self.height as usize)
            .checked_mul(self.width as usize)?
            .checked_mul(self.channels as usize)
    }

    /// Total tensor size in bytes (header plus payload) implied by this header.
    pub fn total_len(&self) -> Option<usize> {
        self.element_count()?.checked_mul(2)?.checked_add(HEADER_LEN)
    }

    /// Parse the header at the front of `bytes`.
    ///
    /// Compression is checked before the length so that a compressed tensor is
    /// always reported as such, however short the buffer.
    pub fn parse(bytes: &[u8]) -> CodecResult<Self> {
        if read_word(bytes, FIELD_COMPRESSION) == Some(COMPRESSED_MAGIC) {
            return Err(CodecError::CompressionNotSupported);
        }
        if bytes.len() < HEADER_LEN {
            return Err(CodecError::InvalidData(format!(
                "payload is {} bytes, header needs {}",
                bytes.len(),
                HEADER_LEN
            )));
        }

        let word = |field| read_word(bytes, field).unwrap_or_default();
        Ok(Self {
            compression: word(FIELD_COMPRESSION),
            height: word(FIELD_HEIGHT),
            width: word(FIELD_WIDTH),
            channels: word(FIELD_CHANNELS),
        })
    }

    /// Serialize into the 68-byte wire header.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut fields = [0u32; HEADER_FIELDS];
        fields[FIELD_COMPRESSION] = self.compression;
        fields[FIELD_MEMORY] = MEMORY_CPU;
        fields[FIELD_LAYOUT] = LAYOUT_NHWC;
        fields[FIELD_ELEMENT_TYPE] = ELEMENT_TYPE_F16;
        fields[FIELD_BATCH] = 1;
        fields[FIELD_HEIGHT] = self.height;
        fields[FIELD_WIDTH] = self.width;
        fields[FIELD_CHANNELS] = self.channels;

        let mut out = [0u8; HEADER_LEN];
        for (chunk, field) in out.chunks_exact_mut(4).zip(fields) {
            chunk.copy_from_slice(&field.to_le_bytes());
        }
        out
    }
}

fn read_word(bytes: &[u8], field: usize) -> Option<u32> {
    let start = field * 4;
    let raw = bytes.get(start..start + 4)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}
