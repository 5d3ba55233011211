//! Pluggable block codecs.

use crate::error::{CodecError, CodecResult};

/// Codec id recorded for blocks stored without compression.
pub const RAW_CODEC_ID: u8 = 0;

/// Codec id of [`Lz4Codec`].
pub const LZ4_CODEC_ID: u8 = 1;

/// Largest uncompressed block accepted by the codecs (64 MiB).
///
/// Bounds the allocation made for a decompressed block, so a corrupted length
/// field cannot trigger an arbitrarily large allocation.
pub const MAX_BLOCK_LEN: usize = 64 * 1024 * 1024;

/// A block-oriented, lossless compression codec.
///
/// Segments are configured with one codec at construction time. The codec
/// only sees whole blocks; framing and checksums live in
/// [`crate::CompressedBlock`].
pub trait BlockCodec: Send + Sync {
    /// Identifier written into every frame produced with this codec.
    ///
    /// Must not be [`RAW_CODEC_ID`].
    fn id(&self) -> u8;

    /// Compresses one block.
    ///
    /// # Errors
    ///
    /// Returns an error if the input exceeds the codec's limits.
    fn compress(&self, input: &[u8]) -> CodecResult<Vec<u8>>;

    /// Decompresses one block that is known to expand to `expected_len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TooLarge`] if `expected_len` exceeds the codec's
    /// limits and a corruption-class error if the input is malformed or does
    /// not expand to exactly `expected_len` bytes.
    fn decompress(&self, input: &[u8], expected_len: usize) -> CodecResult<Vec<u8>>;
}

/// LZ4 block-format codec.
///
/// Uses the raw LZ4 block format without a size prefix; the uncompressed
/// length is carried by the frame header instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Codec;

impl BlockCodec for Lz4Codec {
    fn id(&self) -> u8 {
        LZ4_CODEC_ID
    }

    fn compress(&self, input: &[u8]) -> CodecResult<Vec<u8>> {
        check_len(input.len())?;
        Ok(lz4_flex::block::compress(input))
    }

    fn decompress(&self, input: &[u8], expected_len: usize) -> CodecResult<Vec<u8>> {
        check_len(expected_len)?;

        let output = lz4_flex::block::decompress(input, expected_len)
            .map_err(|e| CodecError::corrupted(format!("LZ4 decompression failed: {e}")))?;

        if output.len() != expected_len {
            return Err(CodecError::LengthMismatch {
                expected: expected_len,
                actual: output.len(),
            });
        }
        Ok(output)
    }
}

fn check_len(len: usize) -> CodecResult<()> {
    if len > MAX_BLOCK_LEN {
        return Err(CodecError::TooLarge {
            len,
            limit: MAX_BLOCK_LEN,
        });
    }
    Ok(())
}
