//! Physical I/O for one segment.

use crate::error::{CoreError, CoreResult};
use crate::segment::blocks::BlockStore;
use pagedfile_codec::BlockCodec;
use pagedfile_storage::{FileBackend, StorageBackend};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Per-segment settings shared by every segment of a file set.
#[derive(Clone)]
pub struct SegmentSettings {
    capacity: u64,
    codec: Option<Arc<dyn BlockCodec>>,
    block_size: u64,
    max_dirty_blocks: usize,
    sync_on_flush: bool,
}

impl SegmentSettings {
    /// Creates settings for segments of `capacity` bytes.
    ///
    /// With a codec, segments are split into blocks of `block_size` bytes
    /// (clamped to the capacity) that are compressed independently.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the capacity or block size is zero,
    /// or a segment would need more than `u32::MAX` blocks.
    pub fn new(
        capacity: u64,
        codec: Option<Arc<dyn BlockCodec>>,
        block_size: u32,
        max_dirty_blocks: usize,
        sync_on_flush: bool,
    ) -> CoreResult<Self> {
        if capacity == 0 {
            return Err(CoreError::config("segment capacity must be positive"));
        }
        if block_size == 0 {
            return Err(CoreError::config("block size must be positive"));
        }

        let block_size = u64::from(block_size).min(capacity);
        if codec.is_some() && capacity.div_ceil(block_size) > u64::from(u32::MAX) {
            return Err(CoreError::config(format!(
                "capacity {capacity} needs too many blocks of {block_size} bytes"
            )));
        }

        Ok(Self {
            capacity,
            codec,
            block_size,
            max_dirty_blocks: max_dirty_blocks.max(1),
            sync_on_flush,
        })
    }

    /// Maximum logical bytes per segment.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Returns true if segments are compressed.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.codec.is_some()
    }

    /// Effective block size (never larger than the capacity).
    #[must_use]
    pub fn block_size(&self) -> u64 {
        self.block_size
    }
}

impl std::fmt::Debug for SegmentSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentSettings")
            .field("capacity", &self.capacity)
            .field("codec", &self.codec.as_ref().map(|c| c.id()))
            .field("block_size", &self.block_size)
            .field("max_dirty_blocks", &self.max_dirty_blocks)
            .field("sync_on_flush", &self.sync_on_flush)
            .finish()
    }
}

enum Layout {
    Plain,
    Blocked(BlockStore),
}

/// An open segment file.
///
/// Offsets are local to the segment. Writes never grow a segment past its
/// capacity; splitting a logical write across segments is the caller's job.
///
/// # Compression
///
/// With a codec configured, data is held in fixed-size blocks. Writes go to
/// an in-memory cache of dirty blocks, which is compressed and written out
/// when it overflows or on [`Self::flush`]. Reads decode only the blocks
/// overlapping the requested range.
pub struct SegmentHandle {
    index: u32,
    path: PathBuf,
    capacity: u64,
    sync_on_flush: bool,
    writable: bool,
    size: u64,
    backend: Option<Box<dyn StorageBackend>>,
    layout: Layout,
}

impl SegmentHandle {
    /// Opens an existing segment file, or creates it when `writable` is set.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened, or a corruption
    /// error if its contents exceed the capacity.
    pub fn open(
        index: u32,
        path: &Path,
        writable: bool,
        settings: &SegmentSettings,
    ) -> CoreResult<Self> {
        let backend: Box<dyn StorageBackend> = if writable {
            Box::new(FileBackend::open(path)?)
        } else {
            Box::new(FileBackend::open_read_only(path)?)
        };
        Self::with_backend(index, path, backend, writable, settings)
    }

    /// Creates an empty segment file, discarding any stale file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn create(index: u32, path: &Path, settings: &SegmentSettings) -> CoreResult<Self> {
        let mut backend = FileBackend::open(path)?;
        backend.set_len(0)?;
        Self::with_backend(index, path, Box::new(backend), true, settings)
    }

    /// Wraps an already opened backend.
    ///
    /// # Errors
    ///
    /// Returns a corruption error if the stored data is inconsistent.
    pub fn with_backend(
        index: u32,
        path: &Path,
        backend: Box<dyn StorageBackend>,
        writable: bool,
        settings: &SegmentSettings,
    ) -> CoreResult<Self> {
        let (layout, size) = match &settings.codec {
            Some(codec) => {
                let (store, size) = BlockStore::load(
                    index,
                    backend.as_ref(),
                    Arc::clone(codec),
                    settings.block_size,
                    settings.max_dirty_blocks,
                )?;
                (Layout::Blocked(store), size)
            }
            None => (Layout::Plain, backend.size()?),
        };

        if size > settings.capacity {
            return Err(CoreError::corruption(format!(
                "segment {index} holds {size} bytes, capacity is {}",
                settings.capacity
            )));
        }

        Ok(Self {
            index,
            path: path.to_path_buf(),
            capacity: settings.capacity,
            sync_on_flush: settings.sync_on_flush,
            writable,
            size,
            backend: Some(backend),
            layout,
        })
    }

    /// Segment index.
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Path of the segment file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current logical size.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns true until the segment is closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.backend.is_some()
    }

    /// Returns true if buffered blocks or index changes are not yet on disk.
    #[cfg(test)]
    fn has_pending_writes(&self) -> bool {
        match &self.layout {
            Layout::Plain => false,
            Layout::Blocked(store) => !store.is_clean(),
        }
    }

    /// Returns true if this compressed segment's size was recovered by
    /// scanning frames rather than read from its footer.
    pub(crate) fn was_rebuilt(&self) -> bool {
        match &self.layout {
            Layout::Plain => false,
            Layout::Blocked(store) => store.was_rebuilt(),
        }
    }

    /// Takes the segment to be zero-filled up to its capacity. Only valid
    /// for a rebuilt segment that is followed by another one.
    pub(crate) fn pad_to_capacity(&mut self) {
        self.size = self.capacity;
    }

    fn backend(&self) -> CoreResult<&dyn StorageBackend> {
        self.backend.as_deref().ok_or(CoreError::Closed)
    }

    fn check_capacity(&self, end: u64) -> CoreResult<()> {
        if end > self.capacity {
            return Err(CoreError::Capacity {
                segment: self.index,
                end,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    fn check_writable(&self) -> CoreResult<()> {
        if self.backend.is_none() {
            return Err(CoreError::Closed);
        }
        if !self.writable {
            return Err(CoreError::ReadOnly);
        }
        Ok(())
    }

    /// Reads exactly `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// Returns a range error if the read extends past the logical size, an
    /// I/O error if the file cannot be read, or a corruption-class error if
    /// a block fails to decode.
    pub fn read_at(&self, offset: u64, len: usize) -> CoreResult<Vec<u8>> {
        let backend = self.backend()?;
        let end = offset.saturating_add(len as u64);
        if end > self.size {
            return Err(CoreError::range(offset, len as u64, self.size));
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        match &self.layout {
            Layout::Plain => Ok(backend.read_at(offset, len)?),
            Layout::Blocked(store) => store.read(backend, offset, len),
        }
    }

    /// Writes `data` at `offset`, growing the segment if needed.
    ///
    /// # Errors
    ///
    /// Returns a capacity error if the write would end past the capacity.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> CoreResult<()> {
        self.check_writable()?;
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| CoreError::range(offset, data.len() as u64, self.size))?;
        self.check_capacity(end)?;
        if data.is_empty() {
            return Ok(());
        }

        let Some(backend) = self.backend.as_deref_mut() else {
            return Err(CoreError::Closed);
        };
        match &mut self.layout {
            Layout::Plain => backend.write_at(offset, data)?,
            Layout::Blocked(store) => store.write(backend, offset, data)?,
        }

        self.size = self.size.max(end);
        Ok(())
    }

    /// Shrinks the segment, or zero-extends it up to the capacity.
    ///
    /// # Errors
    ///
    /// Returns a capacity error if `new_size` exceeds the capacity.
    pub fn truncate(&mut self, new_size: u64) -> CoreResult<()> {
        self.check_writable()?;
        self.check_capacity(new_size)?;
        if new_size == self.size {
            return Ok(());
        }

        let Some(backend) = self.backend.as_deref_mut() else {
            return Err(CoreError::Closed);
        };
        match &mut self.layout {
            Layout::Plain => backend.set_len(new_size)?,
            Layout::Blocked(store) => store.truncate(backend, self.size, new_size)?,
        }

        self.size = new_size;
        Ok(())
    }

    /// Writes out buffered blocks and makes prior writes durable.
    ///
    /// # Errors
    ///
    /// Returns an error if compression or the underlying flush fails.
    pub fn flush(&mut self) -> CoreResult<()> {
        let size = self.size;
        let Some(backend) = self.backend.as_deref_mut() else {
            return Err(CoreError::Closed);
        };
        if !self.writable {
            return Ok(());
        }

        if let Layout::Blocked(store) = &mut self.layout {
            store.flush(backend, size)?;
        }
        backend.flush()?;
        if self.sync_on_flush {
            backend.sync()?;
        }
        Ok(())
    }

    /// Flushes and releases the file. Calling it again is a no-op.
    ///
    /// The file is released even if the flush fails; the flush error is
    /// returned.
    pub fn close(&mut self) -> CoreResult<()> {
        if self.backend.is_none() {
            return Ok(());
        }
        let result = self.flush();
        self.release();
        result
    }

    /// Releases the file without writing anything buffered.
    pub fn discard(&mut self) {
        self.release();
    }

    fn release(&mut self) {
        self.backend = None;
        self.layout = Layout::Plain;
    }
}

impl std::fmt::Debug for SegmentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentHandle")
            .field("index", &self.index)
            .field("path", &self.path)
            .field("size", &self.size)
            .field("capacity", &self.capacity)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl Drop for SegmentHandle {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(segment = self.index, error = %e, "failed to close segment");
        }
    }
}
