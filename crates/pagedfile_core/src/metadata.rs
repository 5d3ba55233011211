//! File-set metadata stored at the base path.
//!
//! ```text
//! | magic "PFAR" (4) | version (2) | flags (2) | capacity (8) | block_size (4) |
//! | total_size (8) | segment_count (4) | crc32 (4) |
//! ```
//!
//! All integers are little-endian. The checksum covers every preceding byte.

use crate::error::{CoreError, CoreResult};
use crate::naming::SegmentNaming;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};

/// Magic bytes of the metadata file.
pub const METADATA_MAGIC: [u8; 4] = *b"PFAR";

/// Current metadata version.
pub const METADATA_VERSION: u16 = 1;

/// Encoded size of the metadata.
pub const METADATA_LEN: usize = 36;

const FLAG_COMPRESSED: u16 = 0x0001;
const FLAG_CLEAN: u16 = 0x0002;

/// Persistent description of a file set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSetMetadata {
    /// Maximum logical bytes per segment.
    pub segment_capacity: u64,
    /// Compressed block size.
    pub block_size: u32,
    /// Total logical size.
    pub total_size: u64,
    /// Number of segments.
    pub segment_count: u32,
    /// Whether segments are compressed.
    pub compressed: bool,
    /// Whether the file set was closed cleanly after its last modification.
    pub clean: bool,
}

impl FileSetMetadata {
    /// Number of segments needed to hold `total_size` bytes.
    #[must_use]
    pub fn expected_segments(total_size: u64, capacity: u64) -> u64 {
        total_size.div_ceil(capacity)
    }

    /// Encodes the metadata to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(METADATA_LEN);

        buf.extend_from_slice(&METADATA_MAGIC);
        buf.extend_from_slice(&METADATA_VERSION.to_le_bytes());

        let mut flags = 0u16;
        if self.compressed {
            flags |= FLAG_COMPRESSED;
        }
        if self.clean {
            flags |= FLAG_CLEAN;
        }
        buf.extend_from_slice(&flags.to_le_bytes());

        buf.extend_from_slice(&self.segment_capacity.to_le_bytes());
        buf.extend_from_slice(&self.block_size.to_le_bytes());
        buf.extend_from_slice(&self.total_size.to_le_bytes());
        buf.extend_from_slice(&self.segment_count.to_le_bytes());

        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        buf
    }

    /// Decodes and validates metadata.
    ///
    /// # Errors
    ///
    /// Returns a corruption error if the magic, version, checksum or any
    /// field is invalid.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < 4 || data[0..4] != METADATA_MAGIC {
            return Err(CoreError::corruption("invalid metadata magic"));
        }
        if data.len() != METADATA_LEN {
            return Err(CoreError::corruption(format!(
                "metadata length {} (expected {METADATA_LEN})",
                data.len()
            )));
        }

        let body = &data[..METADATA_LEN - 4];
        let stored_crc = u32::from_le_bytes([data[32], data[33], data[34], data[35]]);
        let actual_crc = crc32fast::hash(body);
        if stored_crc != actual_crc {
            return Err(CoreError::corruption(format!(
                "metadata checksum mismatch: expected {stored_crc:08x}, got {actual_crc:08x}"
            )));
        }

        let version = u16::from_le_bytes([data[4], data[5]]);
        if version > METADATA_VERSION {
            return Err(CoreError::corruption(format!(
                "unsupported metadata version: {version}"
            )));
        }

        let flags = u16::from_le_bytes([data[6], data[7]]);
        let segment_capacity = read_u64(data, 8);
        let block_size = u32::from_le_bytes([data[16], data[17], data[18], data[19]]);
        let total_size = read_u64(data, 20);
        let segment_count = u32::from_le_bytes([data[28], data[29], data[30], data[31]]);

        if segment_capacity == 0 {
            return Err(CoreError::corruption("metadata segment capacity is zero"));
        }
        if block_size == 0 {
            return Err(CoreError::corruption("metadata block size is zero"));
        }
        // A trailing segment may be empty when the size ends on a boundary.
        let expected = Self::expected_segments(total_size, segment_capacity);
        let trailing_empty = total_size % segment_capacity == 0
            && u64::from(segment_count) == expected + 1;
        if u64::from(segment_count) != expected && !trailing_empty {
            return Err(CoreError::corruption(format!(
                "metadata lists {segment_count} segments, size {total_size} needs {expected}"
            )));
        }

        Ok(Self {
            segment_capacity,
            block_size,
            total_size,
            segment_count,
            compressed: flags & FLAG_COMPRESSED != 0,
            clean: flags & FLAG_CLEAN != 0,
        })
    }

    /// Loads the metadata stored at the base path.
    ///
    /// Returns `None` if the metadata file doesn't exist.
    pub fn load(naming: &SegmentNaming) -> CoreResult<Option<Self>> {
        let data = match fs::read(naming.base_path()) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Self::decode(&data).map(Some)
    }

    /// Saves the metadata atomically.
    ///
    /// Uses write-then-rename for crash safety:
    /// 1. Write to a temporary file
    /// 2. Sync the temporary file
    /// 3. Rename it over the base path
    /// 4. Sync the directory so the rename is durable
    pub fn save(&self, naming: &SegmentNaming) -> CoreResult<()> {
        let temp_path = naming.temp_path();

        let mut file = File::create(&temp_path)?;
        file.write_all(&self.encode())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, naming.base_path())?;
        naming.sync_directory()?;

        Ok(())
    }

    /// Removes the metadata file if present.
    pub fn remove(naming: &SegmentNaming) -> CoreResult<()> {
        match fs::remove_file(naming.base_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(bytes)
}
