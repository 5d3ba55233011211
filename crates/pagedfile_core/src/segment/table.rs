//! Ordered set of segments making up one logical file.

use crate::error::{CoreError, CoreResult};
use crate::metadata::FileSetMetadata;
use crate::naming::SegmentNaming;
use crate::segment::handle::{SegmentHandle, SegmentSettings};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A per-segment piece of a logical byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Segment index.
    pub segment: u32,
    /// Offset within the segment.
    pub local_offset: u64,
    /// Number of bytes in this segment.
    pub len: u64,
}

/// Bookkeeping for one segment. The handle is opened on first use.
#[derive(Debug)]
pub struct SegmentDescriptor {
    index: u32,
    path: PathBuf,
    size: u64,
    handle: Option<SegmentHandle>,
}

impl SegmentDescriptor {
    /// Segment index.
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Physical path of the segment.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Logical size of the segment.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns true if the segment file is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.handle.as_ref().is_some_and(SegmentHandle::is_open)
    }
}

/// Tracks which segments exist and how large each is.
///
/// Every segment except the last holds exactly `capacity` bytes, so a
/// logical offset maps to its segment by division alone.
#[derive(Debug)]
pub struct SegmentTable {
    naming: SegmentNaming,
    settings: SegmentSettings,
    writable: bool,
    segments: Vec<SegmentDescriptor>,
    total_size: u64,
}

impl SegmentTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new(naming: SegmentNaming, settings: SegmentSettings, writable: bool) -> Self {
        Self {
            naming,
            settings,
            writable,
            segments: Vec::new(),
            total_size: 0,
        }
    }

    /// Rebuilds the table from persisted metadata without touching the
    /// segment files. Each segment is checked against its recorded size when
    /// it is first opened.
    #[must_use]
    pub fn from_metadata(
        naming: SegmentNaming,
        settings: SegmentSettings,
        writable: bool,
        metadata: &FileSetMetadata,
    ) -> Self {
        let capacity = settings.capacity();
        let count = metadata.segment_count;
        let segments = (0..count)
            .map(|index| {
                let start = u64::from(index) * capacity;
                SegmentDescriptor {
                    index,
                    path: naming.segment_path(index),
                    size: metadata.total_size.saturating_sub(start).min(capacity),
                    handle: None,
                }
            })
            .collect();

        Self {
            naming,
            settings,
            writable,
            segments,
            total_size: metadata.total_size,
        }
    }

    /// Rebuilds the table by scanning the directory and opening every
    /// segment.
    ///
    /// # Errors
    ///
    /// Returns a corruption error if segment indices have gaps, a segment
    /// other than the last is not full, or a segment fails to load.
    pub fn recover(
        naming: SegmentNaming,
        settings: SegmentSettings,
        writable: bool,
    ) -> CoreResult<Self> {
        let indices = naming.scan()?;
        let capacity = settings.capacity();
        let mut table = Self::new(naming, settings, writable);

        for (position, &index) in indices.iter().enumerate() {
            if u64::from(index) != position as u64 {
                return Err(CoreError::corruption(format!(
                    "segment {position} is missing (found segment {index})"
                )));
            }
            if let Some(last) = table.segments.last_mut() {
                let rebuilt = last.handle.as_mut().filter(|h| h.was_rebuilt());
                if let (Some(handle), true) = (rebuilt, last.size < capacity) {
                    // Zero-filled ranges of a compressed segment only exist
                    // in its footer, so a scan cannot see them.
                    warn!(
                        segment = last.index,
                        scanned = last.size,
                        "padding recovered segment to capacity"
                    );
                    handle.pad_to_capacity();
                    table.total_size += capacity - last.size;
                    last.size = capacity;
                }
                if last.size != capacity {
                    return Err(CoreError::corruption(format!(
                        "segment {} holds {} bytes but is followed by segment {index}",
                        last.index, last.size
                    )));
                }
            }

            let path = table.naming.segment_path(index);
            let handle = SegmentHandle::open(index, &path, writable, &table.settings)?;
            let size = handle.size();
            table.segments.push(SegmentDescriptor {
                index,
                path,
                size,
                handle: Some(handle),
            });
            table.total_size += size;
        }

        debug!(
            segments = table.segments.len(),
            total_size = table.total_size,
            "recovered segment table"
        );
        Ok(table)
    }

    /// Deletes every segment file and the metadata of a file set.
    ///
    /// Returns the number of segment files removed.
    pub fn remove_all(naming: &SegmentNaming) -> CoreResult<usize> {
        let indices = naming.scan()?;
        for &index in &indices {
            remove_file(&naming.segment_path(index))?;
        }
        FileSetMetadata::remove(naming)?;
        if !indices.is_empty() {
            naming.sync_directory()?;
            debug!(segments = indices.len(), "removed existing file set");
        }
        Ok(indices.len())
    }

    /// Number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true if there are no segments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Maximum logical bytes per segment.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.settings.capacity()
    }

    /// Segment settings shared by every segment.
    #[must_use]
    pub fn settings(&self) -> &SegmentSettings {
        &self.settings
    }

    /// Naming scheme of the file set.
    #[must_use]
    pub fn naming(&self) -> &SegmentNaming {
        &self.naming
    }

    /// Total logical size, maintained on every mutation.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Returns the descriptor of segment `index`, if it exists.
    #[must_use]
    pub fn segment(&self, index: u32) -> Option<&SegmentDescriptor> {
        self.segments.get(index as usize)
    }

    /// All segment descriptors in index order.
    #[must_use]
    pub fn descriptors(&self) -> &[SegmentDescriptor] {
        &self.segments
    }

    /// Maps a logical offset to a segment index and local offset.
    ///
    /// # Errors
    ///
    /// Returns a range error if the segment index does not fit in `u32`.
    pub fn resolve(&self, offset: u64) -> CoreResult<(u32, u64)> {
        let capacity = self.capacity();
        let segment = u32::try_from(offset / capacity)
            .map_err(|_| CoreError::range(offset, 0, self.total_size))?;
        Ok((segment, offset % capacity))
    }

    /// Splits a logical range into per-segment spans in ascending order.
    ///
    /// # Errors
    ///
    /// Returns a range error if the range is not addressable.
    pub fn spans(&self, offset: u64, len: u64) -> CoreResult<Vec<Span>> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| CoreError::range(offset, len, self.total_size))?;
        let capacity = self.capacity();

        let mut spans = Vec::new();
        let mut pos = offset;
        while pos < end {
            let (segment, local_offset) = self.resolve(pos)?;
            let len = (capacity - local_offset).min(end - pos);
            spans.push(Span {
                segment,
                local_offset,
                len,
            });
            pos += len;
        }
        Ok(spans)
    }

    /// Returns segment `index`, creating it if it is the next one.
    ///
    /// Creating a segment first fills the current last segment to capacity.
    ///
    /// # Errors
    ///
    /// Returns a sequence error if lower segments are missing, or a
    /// read-only error if the segment would have to be created.
    pub fn ensure_segment(&mut self, index: u32) -> CoreResult<&mut SegmentDescriptor> {
        let next = self.next_index()?;
        if index > next {
            return Err(CoreError::Sequence {
                requested: index,
                next,
            });
        }
        if index == next {
            if !self.writable {
                return Err(CoreError::ReadOnly);
            }
            if let Some(last) = self.segments.last() {
                let last_index = last.index;
                self.resize_segment(last_index, self.capacity())?;
            }
            self.create_segment(next)?;
        }
        Ok(&mut self.segments[index as usize])
    }

    fn next_index(&self) -> CoreResult<u32> {
        u32::try_from(self.segments.len())
            .map_err(|_| CoreError::corruption("segment count exceeds u32"))
    }

    fn create_segment(&mut self, index: u32) -> CoreResult<()> {
        let path = self.naming.segment_path(index);
        let handle = SegmentHandle::create(index, &path, &self.settings)?;
        self.naming.sync_directory()?;

        debug!(segment = index, path = %path.display(), "created segment");
        self.segments.push(SegmentDescriptor {
            index,
            path,
            size: 0,
            handle: Some(handle),
        });
        Ok(())
    }

    /// Returns the open handle of segment `index`, opening it if needed.
    ///
    /// # Errors
    ///
    /// Returns a corruption error if the file's size disagrees with the
    /// recorded size.
    pub fn handle(&mut self, index: u32) -> CoreResult<&mut SegmentHandle> {
        let writable = self.writable;
        let settings = &self.settings;
        let descriptor = self
            .segments
            .get_mut(index as usize)
            .ok_or_else(|| CoreError::corruption(format!("segment {index} does not exist")))?;

        if descriptor.handle.is_none() {
            let mut handle = SegmentHandle::open(index, &descriptor.path, writable, settings)?;
            if handle.size() != descriptor.size {
                handle.discard();
                return Err(CoreError::corruption(format!(
                    "segment {index} holds {} bytes, expected {}",
                    handle.size(),
                    descriptor.size
                )));
            }
            descriptor.handle = Some(handle);
        }

        descriptor.handle.as_mut().ok_or(CoreError::Closed)
    }

    /// Reads one span.
    pub fn read_span(&mut self, span: &Span) -> CoreResult<Vec<u8>> {
        let len = usize::try_from(span.len)
            .map_err(|_| CoreError::range(span.local_offset, span.len, self.total_size))?;
        self.handle(span.segment)?.read_at(span.local_offset, len)
    }

    /// Writes one span, creating its segment if it is the next one.
    ///
    /// The span must not start past the end of its segment.
    pub fn write_span(&mut self, span: &Span, data: &[u8]) -> CoreResult<()> {
        if !self.writable {
            return Err(CoreError::ReadOnly);
        }
        self.ensure_segment(span.segment)?;

        let handle = self.handle(span.segment)?;
        let result = handle.write_at(span.local_offset, data);
        let new_size = handle.size();
        self.record_size(span.segment, new_size);
        result
    }

    fn record_size(&mut self, index: u32, new_size: u64) {
        let descriptor = &mut self.segments[index as usize];
        self.total_size = self.total_size - descriptor.size + new_size;
        descriptor.size = new_size;
    }

    fn resize_segment(&mut self, index: u32, new_size: u64) -> CoreResult<()> {
        let handle = self.handle(index)?;
        let result = handle.truncate(new_size);
        let size = handle.size();
        self.record_size(index, size);
        result
    }

    /// Zero-extends the logical size to `new_size`, filling the last segment
    /// before creating the next.
    pub fn extend_to(&mut self, new_size: u64) -> CoreResult<()> {
        if new_size <= self.total_size {
            return Ok(());
        }
        if !self.writable {
            return Err(CoreError::ReadOnly);
        }
        self.resolve(new_size - 1)?;
        let capacity = self.capacity();

        while self.total_size < new_size {
            let last_full = self.segments.last().map_or(true, |s| s.size == capacity);
            if last_full {
                let next = self.next_index()?;
                self.create_segment(next)?;
            }

            let index = self.next_index()? - 1;
            let start = u64::from(index) * capacity;
            let target = (new_size - start).min(capacity);
            self.resize_segment(index, target)?;
        }
        Ok(())
    }

    /// Shrinks or grows the logical size.
    ///
    /// Shrinking deletes trailing segments that are no longer needed and
    /// truncates the new last segment.
    pub fn truncate_to(&mut self, new_size: u64) -> CoreResult<()> {
        if new_size >= self.total_size {
            return self.extend_to(new_size);
        }
        if !self.writable {
            return Err(CoreError::ReadOnly);
        }

        let capacity = self.capacity();
        let keep = FileSetMetadata::expected_segments(new_size, capacity) as usize;

        while self.segments.len() > keep {
            let Some(mut descriptor) = self.segments.pop() else {
                break;
            };
            if let Some(handle) = descriptor.handle.as_mut() {
                handle.discard();
            }
            self.total_size -= descriptor.size;
            remove_file(&descriptor.path)?;
            debug!(segment = descriptor.index, "removed segment");
        }

        if let Some(last) = self.segments.last() {
            let index = last.index;
            let start = u64::from(index) * capacity;
            self.resize_segment(index, new_size - start)?;
        }

        self.naming.sync_directory()?;
        Ok(())
    }

    /// Flushes every open segment.
    ///
    /// All segments are flushed even if one fails; the first error is returned.
    pub fn flush_all(&mut self) -> CoreResult<()> {
        let mut first_error = None;
        for descriptor in &mut self.segments {
            let Some(handle) = descriptor.handle.as_mut() else {
                continue;
            };
            if let Err(e) = handle.flush() {
                warn!(segment = descriptor.index, error = %e, "failed to flush segment");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Flushes and releases every segment. Segments are reopened on next use.
    ///
    /// Every handle is released even if a flush fails; the first error is
    /// returned.
    pub fn close_all(&mut self) -> CoreResult<()> {
        let mut first_error = None;
        for descriptor in &mut self.segments {
            let Some(mut handle) = descriptor.handle.take() else {
                continue;
            };
            if let Err(e) = handle.close() {
                warn!(segment = descriptor.index, error = %e, "failed to close segment");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

fn remove_file(path: &Path) -> CoreResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
