//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while compressing, decompressing or framing blocks.
///
/// Every variant except [`CodecError::TooLarge`] means the input bytes are
/// malformed; `TooLarge` is a resource limit and says nothing about the data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The compressed payload could not be decoded.
    #[error("corrupted block: {message}")]
    Corrupted {
        /// Description of the decoding failure.
        message: String,
    },

    /// Decompression produced a different number of bytes than recorded.
    #[error("length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch {
        /// Recorded uncompressed length.
        expected: usize,
        /// Length actually produced.
        actual: usize,
    },

    /// The checksum of the decoded bytes does not match the recorded one.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Recorded checksum.
        expected: u32,
        /// Checksum of the decoded bytes.
        actual: u32,
    },

    /// A frame names a codec that is not available.
    #[error("unknown codec id {0}")]
    UnknownCodec(u8),

    /// Unexpected end of input.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// A block exceeds the maximum supported size.
    #[error("block of {len} bytes exceeds limit of {limit} bytes")]
    TooLarge {
        /// Requested length.
        len: usize,
        /// Maximum supported length.
        limit: usize,
    },
}

impl CodecError {
    /// Create a corrupted block error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Returns true if this error means the input bytes are malformed.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        !matches!(self, Self::TooLarge { .. })
    }
}
