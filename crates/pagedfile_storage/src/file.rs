//! File-based storage backend for persistent storage.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file-based storage backend.
///
/// This backend provides persistent storage using OS file APIs.
/// Data survives process restarts.
///
/// # Durability
///
/// - `flush()` calls `File::flush()` to push data to the OS
/// - `sync()` calls `File::sync_all()` to ensure data is on disk
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
/// Internal locking ensures consistent access.
///
/// # Example
///
/// ```no_run
/// use pagedfile_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("data.pf.000000")).unwrap();
/// backend.write_at(0, b"persistent data").unwrap();
/// backend.sync().unwrap();  // Ensure data is durable
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
    writable: bool,
}

impl FileBackend {
    /// Opens or creates a file backend at the given path.
    ///
    /// If the file exists, it is opened for reading and writing.
    /// If it doesn't exist, a new file is created.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Self::from_file(path, file, true)
    }

    /// Opens an existing file for reading only.
    ///
    /// Every mutating operation on the returned backend fails with
    /// [`StorageError::ReadOnly`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be opened.
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        Self::from_file(path, file, false)
    }

    /// Opens or creates a file backend, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or file cannot be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    fn from_file(path: &Path, file: File, writable: bool) -> StorageResult<Self> {
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
            writable,
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns whether this backend accepts writes.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.writable {
            Ok(())
        } else {
            Err(StorageError::ReadOnly)
        }
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        self.check_writable()?;
        if data.is_empty() {
            return Ok(());
        }

        let end = offset
            .checked_add(data.len() as u64)
            .ok_or(StorageError::Overflow(offset))?;

        let mut file = self.file.write();
        let mut size = self.size.write();

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        *size = (*size).max(end);

        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        let mut file = self.file.write();
        file.flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn sync(&mut self) -> StorageResult<()> {
        if !self.writable {
            return Ok(());
        }
        let file = self.file.write();
        file.sync_all()?;
        Ok(())
    }

    fn set_len(&mut self, new_size: u64) -> StorageResult<()> {
        self.check_writable()?;

        let file = self.file.write();
        let mut size = self.size.write();

        if new_size == *size {
            return Ok(());
        }

        file.set_len(new_size)?;
        *size = new_size;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    #[derive(Debug, Clone)]
    enum Op {
        Write(u64, Vec<u8>),
        SetLen(u64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u64..256, prop::collection::vec(any::<u8>(), 0..64))
                .prop_map(|(offset, data)| Op::Write(offset, data)),
            (0u64..320).prop_map(Op::SetLen),
        ]
    }

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
        assert!(backend.is_writable());
    }

    #[test]
    fn file_write_at_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.write_at(0, b"hello").unwrap();
        backend.write_at(5, b" world").unwrap();
        assert_eq!(backend.size().unwrap(), 11);

        backend.write_at(0, b"HELLO").unwrap();
        assert_eq!(backend.size().unwrap(), 11);

        let data = backend.read_at(0, 11).unwrap();
        assert_eq!(&data, b"HELLO world");
    }

    #[test]
    fn file_write_past_end_zero_fills() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.write_at(4, b"xy").unwrap();

        assert_eq!(backend.size().unwrap(), 6);
        assert_eq!(backend.read_at(0, 6).unwrap(), b"\0\0\0\0xy");
    }

    #[test]
    fn file_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.write_at(0, b"hello").unwrap();

        let result = backend.read_at(10, 5);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));

        let result = backend.read_at(3, 5);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.write_at(0, b"persistent data").unwrap();
            backend.sync().unwrap();
        }

        {
            let backend = FileBackend::open_read_only(&path).unwrap();
            assert_eq!(backend.size().unwrap(), 15);
            assert_eq!(backend.read_at(0, 15).unwrap(), b"persistent data");
        }
    }

    #[test]
    fn file_read_only_rejects_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");
        FileBackend::open(&path).unwrap();

        let mut backend = FileBackend::open_read_only(&path).unwrap();
        assert!(!backend.is_writable());
        assert!(matches!(backend.write_at(0, b"x"), Err(StorageError::ReadOnly)));
        assert!(matches!(backend.set_len(10), Err(StorageError::ReadOnly)));
        assert!(backend.sync().is_ok());
    }

    #[test]
    fn file_read_only_missing_file_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.bin");

        let result = FileBackend::open_read_only(&path);
        assert!(matches!(result, Err(StorageError::Io(_))));
        assert!(!path.exists());
    }

    #[test]
    fn file_set_len_shrinks_and_grows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.write_at(0, b"hello world").unwrap();

        backend.set_len(5).unwrap();
        assert_eq!(backend.size().unwrap(), 5);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 5);

        backend.set_len(8).unwrap();
        assert_eq!(backend.read_at(0, 8).unwrap(), b"hello\0\0\0");
    }

    #[test]
    fn file_empty_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.write_at(0, b"hello").unwrap();

        let data = backend.read_at(2, 0).unwrap();
        assert!(data.is_empty());
    }

    #[test]
    fn file_create_with_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("path").join("test.bin");

        let backend = FileBackend::open_with_create_dirs(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
        assert_eq!(backend.path(), path);
    }

    #[test]
    fn file_flush_and_sync() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.write_at(0, b"data").unwrap();

        assert!(backend.flush().is_ok());
        assert!(backend.sync().is_ok());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn file_matches_byte_vector(ops in prop::collection::vec(op(), 1..24)) {
            let dir = tempdir().unwrap();
            let path = dir.path().join("test.bin");
            let mut backend = FileBackend::open(&path).unwrap();
            let mut model: Vec<u8> = Vec::new();

            for op in &ops {
                match op {
                    Op::Write(offset, data) => {
                        backend.write_at(*offset, data).unwrap();
                        if !data.is_empty() {
                            let start = *offset as usize;
                            let end = start + data.len();
                            if model.len() < end {
                                model.resize(end, 0);
                            }
                            model[start..end].copy_from_slice(data);
                        }
                    }
                    Op::SetLen(len) => {
                        backend.set_len(*len).unwrap();
                        model.resize(*len as usize, 0);
                    }
                }
                prop_assert_eq!(backend.size().unwrap(), model.len() as u64);
            }

            prop_assert_eq!(backend.read_at(0, model.len()).unwrap(), model.clone());
            drop(backend);
            prop_assert_eq!(std::fs::read(&path).unwrap(), model);
        }
    }
}
