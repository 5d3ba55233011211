//! Checksummed frames for compressed blocks.

use crate::codec::{BlockCodec, MAX_BLOCK_LEN, RAW_CODEC_ID};
use crate::error::{CodecError, CodecResult};

/// Magic bytes at the start of every frame.
pub const FRAME_MAGIC: [u8; 2] = *b"PB";

/// Size of the fixed frame header in bytes.
pub const FRAME_HEADER_LEN: usize = 19;

/// The fixed-size header of a block frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Codec that produced the payload, or [`RAW_CODEC_ID`].
    pub codec: u8,
    /// Block number within its segment.
    pub block: u32,
    /// Uncompressed length of the block.
    pub raw_len: u32,
    /// Length of the payload following the header.
    pub stored_len: u32,
    /// CRC32 of the uncompressed bytes.
    pub checksum: u32,
}

impl FrameHeader {
    /// Total frame length (header plus payload).
    #[must_use]
    pub fn frame_len(&self) -> usize {
        FRAME_HEADER_LEN + self.stored_len as usize
    }

    /// Decodes a header from the first [`FRAME_HEADER_LEN`] bytes of `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is too short, the magic does not match,
    /// or a length field is out of range.
    pub fn decode(data: &[u8]) -> CodecResult<Self> {
        if data.len() < FRAME_HEADER_LEN {
            return Err(CodecError::UnexpectedEof);
        }
        if data[0..2] != FRAME_MAGIC {
            return Err(CodecError::corrupted("invalid frame magic"));
        }

        let header = Self {
            codec: data[2],
            block: read_u32(data, 3),
            raw_len: read_u32(data, 7),
            stored_len: read_u32(data, 11),
            checksum: read_u32(data, 15),
        };

        if header.raw_len as usize > MAX_BLOCK_LEN {
            return Err(CodecError::corrupted(format!(
                "frame raw length {} exceeds limit",
                header.raw_len
            )));
        }
        if header.codec == RAW_CODEC_ID && header.stored_len != header.raw_len {
            return Err(CodecError::corrupted(
                "stored frame length differs from raw length",
            ));
        }

        Ok(header)
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&FRAME_MAGIC);
        buf.push(self.codec);
        buf.extend_from_slice(&self.block.to_le_bytes());
        buf.extend_from_slice(&self.raw_len.to_le_bytes());
        buf.extend_from_slice(&self.stored_len.to_le_bytes());
        buf.extend_from_slice(&self.checksum.to_le_bytes());
    }
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

/// One block of segment data in its stored form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedBlock {
    /// Block number within its segment.
    pub block: u32,
    /// Codec that produced `payload`, or [`RAW_CODEC_ID`].
    pub codec: u8,
    /// Uncompressed length.
    pub raw_len: u32,
    /// Stored bytes.
    pub payload: Vec<u8>,
    /// CRC32 of the uncompressed bytes.
    pub checksum: u32,
}

impl CompressedBlock {
    /// Compresses `raw` with `codec`.
    ///
    /// Falls back to storing the bytes uncompressed when compression does not
    /// make them smaller.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TooLarge`] if `raw` exceeds [`MAX_BLOCK_LEN`], or
    /// any error reported by the codec.
    pub fn compress(block: u32, raw: &[u8], codec: &dyn BlockCodec) -> CodecResult<Self> {
        if raw.len() > MAX_BLOCK_LEN {
            return Err(CodecError::TooLarge {
                len: raw.len(),
                limit: MAX_BLOCK_LEN,
            });
        }
        let raw_len = raw.len() as u32;
        let checksum = crc32fast::hash(raw);

        let compressed = codec.compress(raw)?;
        let (codec_id, payload) = if compressed.len() < raw.len() {
            (codec.id(), compressed)
        } else {
            (RAW_CODEC_ID, raw.to_vec())
        };

        Ok(Self {
            block,
            codec: codec_id,
            raw_len,
            payload,
            checksum,
        })
    }

    /// Returns true if the payload is compressed.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.codec != RAW_CODEC_ID
    }

    /// Returns the frame header describing this block.
    #[must_use]
    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            codec: self.codec,
            block: self.block,
            raw_len: self.raw_len,
            stored_len: self.payload.len() as u32,
            checksum: self.checksum,
        }
    }

    /// Encodes the block as a frame.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        self.header().encode_into(&mut buf);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decodes a frame. `data` must hold exactly one frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is invalid or the payload length does
    /// not match the header.
    pub fn decode(data: &[u8]) -> CodecResult<Self> {
        let header = FrameHeader::decode(data)?;

        if data.len() < header.frame_len() {
            return Err(CodecError::UnexpectedEof);
        }
        if data.len() > header.frame_len() {
            return Err(CodecError::corrupted(format!(
                "trailing bytes after frame: expected {} bytes, got {}",
                header.frame_len(),
                data.len()
            )));
        }

        Ok(Self {
            block: header.block,
            codec: header.codec,
            raw_len: header.raw_len,
            payload: data[FRAME_HEADER_LEN..].to_vec(),
            checksum: header.checksum,
        })
    }

    /// Restores the uncompressed bytes and verifies their checksum.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnknownCodec`] if the frame was written by a
    /// different codec, or a corruption-class error if decoding fails or the
    /// checksum does not match.
    pub fn decompress(&self, codec: &dyn BlockCodec) -> CodecResult<Vec<u8>> {
        let raw_len = self.raw_len as usize;

        let raw = if self.codec == RAW_CODEC_ID {
            if self.payload.len() != raw_len {
                return Err(CodecError::LengthMismatch {
                    expected: raw_len,
                    actual: self.payload.len(),
                });
            }
            self.payload.clone()
        } else if self.codec == codec.id() {
            codec.decompress(&self.payload, raw_len)?
        } else {
            return Err(CodecError::UnknownCodec(self.codec));
        };

        let actual = crc32fast::hash(&raw);
        if actual != self.checksum {
            return Err(CodecError::ChecksumMismatch {
                expected: self.checksum,
                actual,
            });
        }

        Ok(raw)
    }
}
