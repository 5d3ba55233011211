//! `std::io` adapter over a paged file.

use crate::error::CoreError;
use crate::paged_file::PagedFile;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// A positioned reader and writer over a [`PagedFile`].
///
/// Behaves like a `std::fs::File`: reads stop at the end of the file,
/// writes past the end zero-fill the gap, and seeking past the end is
/// allowed.
#[derive(Debug)]
pub struct PagedFileCursor<'a> {
    file: &'a PagedFile,
    position: u64,
}

impl<'a> PagedFileCursor<'a> {
    pub(crate) fn new(file: &'a PagedFile) -> Self {
        Self { file, position: 0 }
    }

    /// Current position in the logical stream.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// The file this cursor reads and writes.
    #[must_use]
    pub fn file(&self) -> &'a PagedFile {
        self.file
    }
}

impl Read for PagedFileCursor<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.file.read_up_to(self.position, buf.len())?;
        buf[..data.len()].copy_from_slice(&data);
        self.position += data.len() as u64;
        Ok(data.len())
    }
}

impl Write for PagedFileCursor<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = match self.file.write(self.position, buf) {
            Ok(()) => buf.len(),
            Err(CoreError::PartialWrite { written, .. }) => written as usize,
            Err(e) => return Err(e.into()),
        };
        self.position += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.file.flush()?)
    }
}

impl Seek for PagedFileCursor<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.file.size().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        let Some(target) = target else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            ));
        };
        self.position = target;
        Ok(target)
    }
}
