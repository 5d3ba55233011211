//! Error types for the pagedfile core.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in pagedfile operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] pagedfile_storage::StorageError),

    /// Block codec error.
    #[error("codec error: {0}")]
    Codec(#[from] pagedfile_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid open options.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// The file set does not exist.
    #[error("file set not found: {}", path.display())]
    NotFound {
        /// Base path of the missing file set.
        path: PathBuf,
    },

    /// The base path cannot be used to name segments.
    #[error("unusable base path {}: {message}", path.display())]
    Naming {
        /// The offending base path.
        path: PathBuf,
        /// Why it is unusable.
        message: String,
    },

    /// A segment was requested before all lower segments exist.
    #[error("segment {requested} requested but next creatable segment is {next}")]
    Sequence {
        /// The requested segment index.
        requested: u32,
        /// The only index that may be created next.
        next: u32,
    },

    /// A segment-level write or truncate would exceed the segment capacity.
    #[error("segment {segment}: end offset {end} exceeds capacity {capacity}")]
    Capacity {
        /// Segment index.
        segment: u32,
        /// Requested end offset within the segment.
        end: u64,
        /// Segment capacity.
        capacity: u64,
    },

    /// A read extends beyond the logical size.
    #[error("range out of bounds: offset {offset}, len {len}, size {size}")]
    Range {
        /// Requested offset.
        offset: u64,
        /// Requested length.
        len: u64,
        /// Current logical size.
        size: u64,
    },

    /// Metadata or segment contents are inconsistent.
    #[error("corruption: {message}")]
    Corruption {
        /// Description of the inconsistency.
        message: String,
    },

    /// A write failed after part of it was committed.
    #[error("write failed after {written} bytes: {source}")]
    PartialWrite {
        /// Number of bytes committed before the failure.
        written: u64,
        /// The failure that stopped the write.
        source: Box<CoreError>,
    },

    /// The file set was opened read-only.
    #[error("file set is read-only")]
    ReadOnly,

    /// The file set or segment is closed.
    #[error("file set is closed")]
    Closed,
}

impl CoreError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a naming error.
    pub fn naming(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Naming {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates a range error.
    pub fn range(offset: u64, len: u64, size: u64) -> Self {
        Self::Range { offset, len, size }
    }

    /// Wraps `source` with the number of bytes committed before it occurred.
    ///
    /// Nothing is wrapped when no bytes were committed.
    pub fn partial_write(written: u64, source: CoreError) -> Self {
        if written == 0 {
            source
        } else {
            Self::PartialWrite {
                written,
                source: Box::new(source),
            }
        }
    }

    /// Returns true if this error reports corrupted data or metadata.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        match self {
            Self::Corruption { .. } => true,
            Self::Codec(e) => e.is_corruption(),
            Self::PartialWrite { source, .. } => source.is_corruption(),
            _ => false,
        }
    }

    /// Returns the number of bytes committed by a failed write.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        match self {
            Self::PartialWrite { written, .. } => *written,
            _ => 0,
        }
    }
}

impl From<CoreError> for io::Error {
    fn from(err: CoreError) -> Self {
        let kind = match err {
            CoreError::Io(e) => return e,
            CoreError::Storage(pagedfile_storage::StorageError::Io(e)) => return e,
            CoreError::NotFound { .. } => io::ErrorKind::NotFound,
            CoreError::ReadOnly => io::ErrorKind::PermissionDenied,
            CoreError::Config { .. } | CoreError::Naming { .. } | CoreError::Range { .. } => {
                io::ErrorKind::InvalidInput
            }
            ref e if e.is_corruption() => io::ErrorKind::InvalidData,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagedfile_codec::CodecError;

    #[test]
    fn partial_write_with_zero_bytes_is_unwrapped() {
        let err = CoreError::partial_write(0, CoreError::ReadOnly);
        assert!(matches!(err, CoreError::ReadOnly));
        assert_eq!(err.bytes_written(), 0);
    }

    #[test]
    fn partial_write_reports_bytes() {
        let err = CoreError::partial_write(12, CoreError::corruption("bad frame"));
        assert_eq!(err.bytes_written(), 12);
        assert!(err.is_corruption());
    }

    #[test]
    fn io_conversion_keeps_kinds() {
        let inner = io::Error::new(io::ErrorKind::TimedOut, "slow disk");
        let err: io::Error = CoreError::Io(inner).into();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        let err: io::Error = CoreError::ReadOnly.into();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);

        let err: io::Error = CoreError::corruption("bad footer").into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn codec_errors_classified() {
        let corrupt: CoreError = CodecError::UnexpectedEof.into();
        assert!(corrupt.is_corruption());

        let limit: CoreError = CodecError::TooLarge { len: 10, limit: 1 }.into();
        assert!(!limit.is_corruption());
    }
}
