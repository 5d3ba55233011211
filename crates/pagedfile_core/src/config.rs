//! Open options for a paged file.

use crate::error::{CoreError, CoreResult};
use pagedfile_codec::MAX_BLOCK_LEN;

/// Default size of one compressed block (64 KiB).
pub const DEFAULT_BLOCK_SIZE: u32 = 64 * 1024;

/// Default number of dirty blocks a segment buffers before writing them out.
pub const DEFAULT_MAX_DIRTY_BLOCKS: usize = 16;

/// How a file set is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Open an existing file set for reading only.
    Read,
    /// Create a new file set, discarding any existing one, then read and write.
    Write,
    /// Open an existing file set (or create one) for reading and writing.
    ReadWrite,
}

impl OpenMode {
    /// Returns true if the mode allows modification.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        !matches!(self, Self::Read)
    }
}

/// Configuration for opening a paged file.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum logical bytes per segment.
    ///
    /// Required when creating a file set. When reopening, the value stored
    /// in the metadata wins.
    pub segment_capacity: Option<u64>,

    /// Whether new file sets compress their segments.
    pub compression: bool,

    /// Whether to create the file set if it doesn't exist.
    pub create_if_missing: bool,

    /// Size of one compressed block. Ignored without compression.
    pub block_size: u32,

    /// Dirty blocks buffered per segment before they are compressed and written.
    pub max_dirty_blocks: usize,

    /// Whether `flush` also syncs data to durable storage.
    pub sync_on_flush: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            segment_capacity: None,
            compression: false,
            create_if_missing: true,
            block_size: DEFAULT_BLOCK_SIZE,
            max_dirty_blocks: DEFAULT_MAX_DIRTY_BLOCKS,
            sync_on_flush: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the segment capacity used when creating a file set.
    #[must_use]
    pub const fn segment_capacity(mut self, capacity: u64) -> Self {
        self.segment_capacity = Some(capacity);
        self
    }

    /// Sets whether new file sets are compressed.
    #[must_use]
    pub const fn compression(mut self, value: bool) -> Self {
        self.compression = value;
        self
    }

    /// Sets whether to create the file set if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the compressed block size.
    #[must_use]
    pub const fn block_size(mut self, size: u32) -> Self {
        self.block_size = size;
        self
    }

    /// Sets how many dirty blocks a segment buffers.
    #[must_use]
    pub const fn max_dirty_blocks(mut self, count: usize) -> Self {
        self.max_dirty_blocks = count;
        self
    }

    /// Sets whether `flush` syncs to durable storage.
    #[must_use]
    pub const fn sync_on_flush(mut self, value: bool) -> Self {
        self.sync_on_flush = value;
        self
    }

    /// Checks the options that do not depend on existing metadata.
    pub(crate) fn validate(&self) -> CoreResult<()> {
        if self.segment_capacity == Some(0) {
            return Err(CoreError::config("segment capacity must be positive"));
        }
        if self.block_size == 0 {
            return Err(CoreError::config("block size must be positive"));
        }
        if self.block_size as usize > MAX_BLOCK_LEN {
            return Err(CoreError::config(format!(
                "block size {} exceeds limit {MAX_BLOCK_LEN}",
                self.block_size
            )));
        }
        if self.max_dirty_blocks == 0 {
            return Err(CoreError::config("max dirty blocks must be positive"));
        }
        Ok(())
    }
}
