//! The logical file presented over a set of segments.

use crate::config::{Config, OpenMode};
use crate::cursor::PagedFileCursor;
use crate::error::{CoreError, CoreResult};
use crate::metadata::FileSetMetadata;
use crate::naming::SegmentNaming;
use crate::segment::{SegmentDescriptor, SegmentSettings, SegmentTable};
use pagedfile_codec::{BlockCodec, Lz4Codec};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One logical, addressable byte stream stored across segment files.
///
/// `PagedFile` is the primary entry point. Reads and writes take logical
/// offsets; the file set splits them at segment boundaries, creating and
/// growing segments as needed.
///
/// # Opening a File Set
///
/// ```rust,ignore
/// use pagedfile_core::{Config, OpenMode, PagedFile};
/// use std::path::Path;
///
/// let config = Config::new().segment_capacity(64 * 1024 * 1024);
/// let file = PagedFile::open(Path::new("archive.pf"), OpenMode::ReadWrite, config)?;
///
/// file.write(0, b"hello")?;
/// assert_eq!(file.read(0, 5)?, b"hello");
///
/// file.close()?;
/// ```
///
/// # Concurrency
///
/// All operations on one `PagedFile` are serialized by an internal mutex,
/// so it can be shared between threads behind an `Arc`.
pub struct PagedFile {
    base: PathBuf,
    mode: OpenMode,
    capacity: u64,
    block_size: u32,
    compressed: bool,
    inner: Mutex<Inner>,
}

struct Inner {
    table: SegmentTable,
    closed: bool,
    /// Last metadata written to disk.
    persisted: Option<FileSetMetadata>,
}

impl PagedFile {
    /// Opens a file set, compressing with LZ4 when compression is enabled.
    ///
    /// # Errors
    ///
    /// See [`Self::open_with_codec`].
    pub fn open(base: &Path, mode: OpenMode, config: Config) -> CoreResult<Self> {
        Self::open_with_codec(base, mode, config, Arc::new(Lz4Codec))
    }

    /// Opens a file set using `codec` for compressed segments.
    ///
    /// # Arguments
    ///
    /// * `base` - Base path; the metadata lives here, segments next to it
    /// * `mode` - How to open the file set
    /// * `config` - Open options
    /// * `codec` - Block codec used if the file set is compressed
    ///
    /// # Errors
    ///
    /// - `Config` if the options are invalid, or no capacity is given when
    ///   one is needed
    /// - `Naming` if the base path cannot be used
    /// - `NotFound` if the file set doesn't exist and won't be created
    /// - `Corruption` if the metadata or the segments are inconsistent
    pub fn open_with_codec(
        base: &Path,
        mode: OpenMode,
        config: Config,
        codec: Arc<dyn BlockCodec>,
    ) -> CoreResult<Self> {
        config.validate()?;
        let naming = SegmentNaming::new(base)?;
        let writable = mode.is_writable();
        if writable {
            naming.check_writable()?;
        }
        if mode == OpenMode::Write {
            SegmentTable::remove_all(&naming)?;
        }

        let metadata = FileSetMetadata::load(&naming)?;
        let has_segments = metadata.is_none() && !naming.scan()?.is_empty();

        let (table, block_size, compressed) = match metadata {
            Some(metadata) => Self::reopen(naming, writable, &config, codec, &metadata)?,
            None if !has_segments => {
                let create = match mode {
                    OpenMode::Read => false,
                    OpenMode::Write => true,
                    OpenMode::ReadWrite => config.create_if_missing,
                };
                if !create {
                    return Err(CoreError::NotFound {
                        path: base.to_path_buf(),
                    });
                }
                let capacity = config.segment_capacity.ok_or_else(|| {
                    CoreError::config("segment capacity is required to create a file set")
                })?;
                let settings = Self::settings(
                    capacity,
                    &config,
                    config.block_size,
                    config.compression,
                    codec,
                )?;
                info!(
                    path = %base.display(),
                    capacity,
                    compressed = config.compression,
                    "creating file set"
                );
                (
                    SegmentTable::new(naming, settings, writable),
                    config.block_size,
                    config.compression,
                )
            }
            None => {
                let capacity = config.segment_capacity.ok_or_else(|| {
                    CoreError::config("segment capacity is required to recover a file set")
                })?;
                warn!(
                    path = %base.display(),
                    "file set metadata missing, rebuilding from segments"
                );
                let settings = Self::settings(
                    capacity,
                    &config,
                    config.block_size,
                    config.compression,
                    codec,
                )?;
                (
                    SegmentTable::recover(naming, settings, writable)?,
                    config.block_size,
                    config.compression,
                )
            }
        };

        debug!(
            path = %base.display(),
            ?mode,
            segments = table.len(),
            size = table.total_size(),
            "opened file set"
        );

        let file = Self {
            base: base.to_path_buf(),
            mode,
            capacity: table.capacity(),
            block_size,
            compressed,
            inner: Mutex::new(Inner {
                table,
                closed: false,
                persisted: None,
            }),
        };

        // Mark the file set as in use so a crash is detected on the next open.
        if writable {
            let mut inner = file.inner.lock();
            if let Err(e) = file.persist(&mut inner, false) {
                inner.closed = true;
                return Err(e);
            }
        }
        Ok(file)
    }

    fn settings(
        capacity: u64,
        config: &Config,
        block_size: u32,
        compressed: bool,
        codec: Arc<dyn BlockCodec>,
    ) -> CoreResult<SegmentSettings> {
        SegmentSettings::new(
            capacity,
            compressed.then_some(codec),
            block_size,
            config.max_dirty_blocks,
            config.sync_on_flush,
        )
    }

    fn reopen(
        naming: SegmentNaming,
        writable: bool,
        config: &Config,
        codec: Arc<dyn BlockCodec>,
        metadata: &FileSetMetadata,
    ) -> CoreResult<(SegmentTable, u32, bool)> {
        let base = naming.base_path().display().to_string();
        if let Some(requested) = config.segment_capacity {
            if requested != metadata.segment_capacity {
                warn!(
                    path = %base,
                    requested,
                    stored = metadata.segment_capacity,
                    "ignoring segment capacity, file set was created with another"
                );
            }
        }
        if config.compression != metadata.compressed {
            debug!(
                path = %base,
                stored = metadata.compressed,
                "using stored compression setting"
            );
        }

        let settings = Self::settings(
            metadata.segment_capacity,
            config,
            metadata.block_size,
            metadata.compressed,
            codec,
        )?;

        let table = if metadata.clean {
            SegmentTable::from_metadata(naming, settings, writable, metadata)
        } else {
            warn!(path = %base, "file set was not closed cleanly, rebuilding from segments");
            let table = SegmentTable::recover(naming, settings, writable)?;
            if table.total_size() != metadata.total_size {
                info!(
                    path = %base,
                    recorded = metadata.total_size,
                    recovered = table.total_size(),
                    "recovered size differs from metadata"
                );
            }
            table
        };

        Ok((table, metadata.block_size, metadata.compressed))
    }

    /// Writes the metadata if it changed since it was last written.
    fn persist(&self, inner: &mut Inner, clean: bool) -> CoreResult<()> {
        let segment_count = u32::try_from(inner.table.len())
            .map_err(|_| CoreError::corruption("segment count exceeds u32"))?;
        let metadata = FileSetMetadata {
            segment_capacity: self.capacity,
            block_size: self.block_size,
            total_size: inner.table.total_size(),
            segment_count,
            compressed: self.compressed,
            clean,
        };
        if inner.persisted == Some(metadata) {
            return Ok(());
        }

        metadata.save(inner.table.naming())?;
        inner.persisted = Some(metadata);
        Ok(())
    }

    /// Reads exactly `len` bytes at `offset`.
    ///
    /// A zero-length read always succeeds. On failure no data is returned.
    ///
    /// # Errors
    ///
    /// Returns a range error if `offset + len` exceeds [`Self::size`].
    pub fn read(&self, offset: u64, len: usize) -> CoreResult<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let mut inner = self.inner.lock();
        inner.ensure_open()?;

        let size = inner.table.total_size();
        match offset.checked_add(len as u64) {
            Some(end) if end <= size => inner.read_range(offset, len as u64),
            _ => Err(CoreError::range(offset, len as u64, size)),
        }
    }

    /// Reads up to `max_len` bytes at `offset`, stopping at the end of the
    /// file. Returns an empty buffer at or past the end.
    pub fn read_up_to(&self, offset: u64, max_len: usize) -> CoreResult<Vec<u8>> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;

        let size = inner.table.total_size();
        if offset >= size || max_len == 0 {
            return Ok(Vec::new());
        }
        let len = (size - offset).min(max_len as u64);
        inner.read_range(offset, len)
    }

    /// Writes `data` at `offset`.
    ///
    /// Writing past the end zero-fills the gap first. Spans are written in
    /// ascending segment order.
    ///
    /// # Errors
    ///
    /// If the write fails after some spans were committed, the error is a
    /// `PartialWrite` carrying the number of bytes written.
    pub fn write(&self, offset: u64, data: &[u8]) -> CoreResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        inner.ensure_writable(self.mode)?;

        let table = &mut inner.table;
        let spans = table.spans(offset, data.len() as u64)?;
        if offset > table.total_size() {
            table.extend_to(offset)?;
        }

        let mut written = 0usize;
        for span in &spans {
            let chunk = &data[written..written + span.len as usize];
            if let Err(e) = table.write_span(span, chunk) {
                return Err(CoreError::partial_write(written as u64, e));
            }
            written += chunk.len();
        }
        Ok(())
    }

    /// Shrinks or grows the file to `new_size`.
    ///
    /// Shrinking deletes trailing segments; growing zero-fills.
    pub fn truncate(&self, new_size: u64) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_writable(self.mode)?;
        inner.table.truncate_to(new_size)
    }

    /// Returns the logical size.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.inner.lock().table.total_size()
    }

    /// Flushes every open segment and updates the metadata.
    pub fn flush(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        inner.table.flush_all()?;
        if self.mode.is_writable() {
            self.persist(&mut inner, false)?;
        }
        Ok(())
    }

    /// Flushes and releases every segment. Calling it again is a no-op.
    ///
    /// Every segment is released even if flushing one of them fails. The
    /// file set is only marked clean when all segments were flushed.
    pub fn close(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;

        inner.table.close_all()?;
        if self.mode.is_writable() {
            self.persist(&mut inner, true)?;
        }
        debug!(path = %self.base.display(), "closed file set");
        Ok(())
    }

    /// Returns true once [`Self::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Returns a cursor over the logical stream, starting at offset 0.
    #[must_use]
    pub fn cursor(&self) -> PagedFileCursor<'_> {
        PagedFileCursor::new(self)
    }

    /// Number of segments.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.inner.lock().table.len()
    }

    /// Logical size of each segment, in index order.
    #[must_use]
    pub fn segment_sizes(&self) -> Vec<u64> {
        self.inner
            .lock()
            .table
            .descriptors()
            .iter()
            .map(SegmentDescriptor::size)
            .collect()
    }

    /// Maximum logical bytes per segment.
    #[must_use]
    pub fn segment_capacity(&self) -> u64 {
        self.capacity
    }

    /// Compressed block size recorded for the file set.
    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Returns true if segments are compressed.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Mode the file set was opened with.
    #[must_use]
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Base path of the file set.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base
    }
}

impl Inner {
    fn ensure_open(&self) -> CoreResult<()> {
        if self.closed {
            Err(CoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn ensure_writable(&self, mode: OpenMode) -> CoreResult<()> {
        self.ensure_open()?;
        if mode.is_writable() {
            Ok(())
        } else {
            Err(CoreError::ReadOnly)
        }
    }

    /// Reads a range the caller has checked against the size.
    fn read_range(&mut self, offset: u64, len: u64) -> CoreResult<Vec<u8>> {
        let spans = self.table.spans(offset, len)?;
        let mut out = Vec::with_capacity(len as usize);
        for span in &spans {
            out.extend_from_slice(&self.table.read_span(span)?);
        }
        Ok(out)
    }
}

impl std::fmt::Debug for PagedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagedFile")
            .field("base", &self.base)
            .field("mode", &self.mode)
            .field("capacity", &self.capacity)
            .field("compressed", &self.compressed)
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

impl Drop for PagedFile {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(path = %self.base.display(), error = %e, "failed to close file set");
        }
    }
}
