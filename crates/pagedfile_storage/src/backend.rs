//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level positioned storage backend.
///
/// Storage backends are **opaque byte stores**. They provide simple operations
/// for reading and writing at an offset, resizing and flushing
/// data. The segment layer owns all format interpretation - backends do not
/// understand blocks, frames or file-set metadata.
///
/// # Invariants
///
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `write_at` past the current end zero-fills the gap
/// - `set_len` zero-fills when growing and discards data when shrinking
/// - `sync` ensures all written data is durable
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The read would extend beyond the current size
    /// - An I/O error occurs
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Writes `data` at `offset`, growing the storage if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is read-only or an I/O error occurs.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Flushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the storage in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// This is a stronger guarantee than `flush` - it ensures that
    /// file metadata (size, timestamps) is also durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Resizes the storage to exactly `new_size` bytes.
    ///
    /// Shrinking discards everything past `new_size`; growing appends zeros.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is read-only or the resize fails.
    fn set_len(&mut self, new_size: u64) -> StorageResult<()>;
}
