//! In-memory storage backend for testing.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// An in-memory storage backend.
///
/// This backend stores all data in memory and is suitable for:
/// - Unit tests of the segment layer
/// - Fault-injection scenarios built on top of a byte vector
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use pagedfile_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// backend.write_at(2, b"test data").unwrap();
/// assert_eq!(backend.size().unwrap(), 11);
/// assert_eq!(backend.read_at(0, 2).unwrap(), vec![0, 0]);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory backend with pre-existing data.
    ///
    /// Useful for testing recovery scenarios.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Returns a copy of all data in the backend.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

fn to_index(value: u64) -> StorageResult<usize> {
    usize::try_from(value).map_err(|_| StorageError::Overflow(value))
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        let start = to_index(offset)?;
        Ok(data[start..start + len].to_vec())
    }

    fn write_at(&mut self, offset: u64, new_data: &[u8]) -> StorageResult<()> {
        if new_data.is_empty() {
            return Ok(());
        }

        let mut data = self.data.write();
        let start = to_index(offset)?;
        let end = start
            .checked_add(new_data.len())
            .ok_or(StorageError::Overflow(offset))?;

        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(new_data);
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn set_len(&mut self, new_size: u64) -> StorageResult<()> {
        let new_len = to_index(new_size)?;
        self.data.write().resize(new_len, 0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_new_is_empty() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(backend.data().is_empty());
    }

    #[test]
    fn memory_write_at_overwrites_in_place() {
        let mut backend = InMemoryBackend::with_data(b"hello world".to_vec());
        backend.write_at(6, b"there").unwrap();
        assert_eq!(backend.data(), b"hello there");
    }

    #[test]
    fn memory_write_at_past_end_zero_fills() {
        let mut backend = InMemoryBackend::new();
        backend.write_at(3, b"ab").unwrap();
        assert_eq!(backend.data(), b"\0\0\0ab");
    }

    #[test]
    fn memory_read_at_past_end_fails() {
        let backend = InMemoryBackend::with_data(b"hello".to_vec());

        let result = backend.read_at(10, 5);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));

        let result = backend.read_at(3, 10);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn memory_empty_read() {
        let backend = InMemoryBackend::with_data(b"hello".to_vec());

        let data = backend.read_at(2, 0).unwrap();
        assert!(data.is_empty());
    }

    #[test]
    fn memory_set_len_shrinks_and_grows() {
        let mut backend = InMemoryBackend::with_data(b"hello world".to_vec());

        backend.set_len(5).unwrap();
        assert_eq!(backend.data(), b"hello");

        backend.set_len(7).unwrap();
        assert_eq!(backend.data(), b"hello\0\0");
    }

    #[test]
    fn memory_flush_and_sync_succeed() {
        let mut backend = InMemoryBackend::new();
        backend.write_at(0, b"data").unwrap();
        assert!(backend.flush().is_ok());
        assert!(backend.sync().is_ok());
    }
}
