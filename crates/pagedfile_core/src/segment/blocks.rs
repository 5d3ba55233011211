//! Compressed block layout of a segment.
//!
//! ## Segment File Layout
//!
//! ```text
//! | frame | frame | ... | entries (16 * count) | count (4) | size (8) | crc32 (4) | "PFBT" (4) |
//! ```
//!
//! Each entry is `| block (4) | offset (8) | frame_len (4) |`. The checksum
//! covers the entries, the count and the size. New frames are written at the
//! end of the frame area, over the previous footer; the footer is rewritten
//! on flush. A segment whose footer is missing or damaged is rebuilt by
//! scanning its frames from the start.

use crate::error::{CoreError, CoreResult};
use pagedfile_codec::{BlockCodec, CompressedBlock, FrameHeader, FRAME_HEADER_LEN};
use pagedfile_storage::StorageBackend;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Magic bytes closing the block index footer.
const FOOTER_MAGIC: [u8; 4] = *b"PFBT";

/// Fixed trailer: count, size, crc32, magic.
const TRAILER_LEN: u64 = 20;

/// Encoded size of one footer entry.
const ENTRY_LEN: u64 = 16;

/// Where a block's current frame lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameLocation {
    offset: u64,
    len: u32,
}

/// Block index and write-back cache for one compressed segment.
pub(crate) struct BlockStore {
    segment: u32,
    codec: Arc<dyn BlockCodec>,
    block_size: u64,
    max_dirty: usize,
    frames: BTreeMap<u32, FrameLocation>,
    dirty: BTreeMap<u32, Vec<u8>>,
    /// End of the frame area; the footer starts here.
    tail: u64,
    live_bytes: u64,
    dead_bytes: u64,
    footer_stale: bool,
    /// Set when the index was rebuilt from frames instead of the footer.
    rebuilt: bool,
}

impl BlockStore {
    /// Loads the block index of a segment. Returns the store and the
    /// segment's logical size.
    pub(crate) fn load(
        segment: u32,
        backend: &dyn StorageBackend,
        codec: Arc<dyn BlockCodec>,
        block_size: u64,
        max_dirty: usize,
    ) -> CoreResult<(Self, u64)> {
        let mut store = Self {
            segment,
            codec,
            block_size,
            max_dirty,
            frames: BTreeMap::new(),
            dirty: BTreeMap::new(),
            tail: 0,
            live_bytes: 0,
            dead_bytes: 0,
            footer_stale: false,
            rebuilt: false,
        };

        let file_size = backend.size()?;
        if file_size == 0 {
            return Ok((store, 0));
        }

        match store.read_footer(backend, file_size)? {
            Some(size) => Ok((store, size)),
            None => {
                warn!(segment, "block index footer missing or damaged, scanning frames");
                let size = store.scan_frames(backend, file_size)?;
                Ok((store, size))
            }
        }
    }

    /// Reads the footer. Returns `None` if there is no valid footer.
    fn read_footer(
        &mut self,
        backend: &dyn StorageBackend,
        file_size: u64,
    ) -> CoreResult<Option<u64>> {
        if file_size < TRAILER_LEN {
            return Ok(None);
        }

        let trailer = backend.read_at(file_size - TRAILER_LEN, TRAILER_LEN as usize)?;
        if trailer[16..20] != FOOTER_MAGIC {
            return Ok(None);
        }

        let count = u64::from(read_u32(&trailer, 0));
        let Some(footer_len) = count
            .checked_mul(ENTRY_LEN)
            .and_then(|len| len.checked_add(TRAILER_LEN))
            .filter(|&len| len <= file_size)
        else {
            return Ok(None);
        };

        let tail = file_size - footer_len;
        let footer = backend.read_at(tail, footer_len as usize)?;
        let body_len = footer.len() - 8;
        let stored_crc = read_u32(&footer, body_len);
        if crc32fast::hash(&footer[..body_len]) != stored_crc {
            return Ok(None);
        }

        let size = read_u64(&footer, body_len - 8);
        let mut frames = BTreeMap::new();
        let mut live = 0u64;
        for chunk in footer[..(count * ENTRY_LEN) as usize].chunks_exact(ENTRY_LEN as usize) {
            let block = read_u32(chunk, 0);
            let location = FrameLocation {
                offset: read_u64(chunk, 4),
                len: read_u32(chunk, 12),
            };
            let end = location.offset.checked_add(u64::from(location.len));
            if end.map_or(true, |end| end > tail) {
                return Err(CoreError::corruption(format!(
                    "segment {}: frame for block {block} lies outside the frame area",
                    self.segment
                )));
            }
            if frames.insert(block, location).is_some() {
                return Err(CoreError::corruption(format!(
                    "segment {}: block {block} listed twice",
                    self.segment
                )));
            }
            live += u64::from(location.len);
        }

        self.frames = frames;
        self.tail = tail;
        self.live_bytes = live;
        self.dead_bytes = tail.saturating_sub(live);
        Ok(Some(size))
    }

    /// Rebuilds the index from the frames. Later frames for a block replace
    /// earlier ones; scanning stops at the first invalid frame.
    fn scan_frames(&mut self, backend: &dyn StorageBackend, file_size: u64) -> CoreResult<u64> {
        let mut pos = 0u64;
        let mut size = 0u64;

        while pos + FRAME_HEADER_LEN as u64 <= file_size {
            let header_bytes = backend.read_at(pos, FRAME_HEADER_LEN)?;
            let Ok(header) = FrameHeader::decode(&header_bytes) else {
                break;
            };
            let frame_len = header.frame_len() as u64;
            if pos + frame_len > file_size {
                break;
            }

            let frame = backend.read_at(pos, frame_len as usize)?;
            let valid = CompressedBlock::decode(&frame)
                .and_then(|block| block.decompress(self.codec.as_ref()))
                .is_ok();
            if !valid {
                break;
            }

            let location = FrameLocation {
                offset: pos,
                len: frame_len as u32,
            };
            if let Some(old) = self.frames.insert(header.block, location) {
                self.live_bytes -= u64::from(old.len);
            }
            self.live_bytes += frame_len;
            size = size.max(u64::from(header.block) * self.block_size + u64::from(header.raw_len));
            pos += frame_len;
        }

        debug!(
            segment = self.segment,
            blocks = self.frames.len(),
            recovered_bytes = pos,
            "scanned segment frames"
        );

        self.tail = pos;
        self.dead_bytes = pos - self.live_bytes;
        self.footer_stale = true;
        self.rebuilt = true;
        Ok(size)
    }

    /// Returns the stored bytes of a block. Bytes past the returned length
    /// (up to the segment size) read as zeros.
    fn block_bytes(&self, backend: &dyn StorageBackend, block: u32) -> CoreResult<Vec<u8>> {
        if let Some(content) = self.dirty.get(&block) {
            return Ok(content.clone());
        }
        let Some(location) = self.frames.get(&block) else {
            return Ok(Vec::new());
        };

        let frame = backend.read_at(location.offset, location.len as usize)?;
        let decoded = CompressedBlock::decode(&frame)?;
        if decoded.block != block {
            return Err(CoreError::corruption(format!(
                "segment {}: frame at offset {} holds block {} instead of {block}",
                self.segment, location.offset, decoded.block
            )));
        }
        Ok(decoded.decompress(self.codec.as_ref())?)
    }

    fn block_start(&self, block: u32) -> u64 {
        u64::from(block) * self.block_size
    }

    fn block_of(&self, offset: u64) -> u32 {
        // Callers keep offsets below the segment capacity, and the block count
        // of a segment is checked to fit in u32 when settings are built.
        (offset / self.block_size) as u32
    }

    /// Reads `len` bytes at `offset`. The caller has checked the range.
    pub(crate) fn read(
        &self,
        backend: &dyn StorageBackend,
        offset: u64,
        len: usize,
    ) -> CoreResult<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        let end = offset + len as u64;
        let mut pos = offset;

        while pos < end {
            let block = self.block_of(pos);
            let start = self.block_start(block);
            let within = (pos - start) as usize;
            let take = ((start + self.block_size).min(end) - pos) as usize;

            let bytes = self.block_bytes(backend, block)?;
            let filled = out.len() + take;
            if within < bytes.len() {
                let avail = bytes.len().min(within + take);
                out.extend_from_slice(&bytes[within..avail]);
            }
            out.resize(filled, 0);
            pos += take as u64;
        }

        Ok(out)
    }

    /// Writes `data` at `offset` into the dirty cache, spilling the cache to
    /// disk when it grows past its limit.
    pub(crate) fn write(
        &mut self,
        backend: &mut dyn StorageBackend,
        offset: u64,
        data: &[u8],
    ) -> CoreResult<()> {
        let end = offset + data.len() as u64;
        let mut pos = offset;

        while pos < end {
            let block = self.block_of(pos);
            let start = self.block_start(block);
            let within = (pos - start) as usize;
            let take = ((start + self.block_size).min(end) - pos) as usize;
            let src = (pos - offset) as usize;

            let mut content = match self.dirty.remove(&block) {
                Some(content) => content,
                None => self.block_bytes(backend, block)?,
            };
            if content.len() < within + take {
                content.resize(within + take, 0);
            }
            content[within..within + take].copy_from_slice(&data[src..src + take]);
            self.dirty.insert(block, content);

            pos += take as u64;
        }

        if self.dirty.len() > self.max_dirty {
            self.write_dirty(backend)?;
        }
        Ok(())
    }

    /// Discards everything at or past `new_size`.
    pub(crate) fn truncate(
        &mut self,
        backend: &dyn StorageBackend,
        old_size: u64,
        new_size: u64,
    ) -> CoreResult<()> {
        if new_size < old_size {
            let first_dropped = new_size.div_ceil(self.block_size);
            let dropped: Vec<u32> = self
                .frames
                .keys()
                .copied()
                .filter(|&block| u64::from(block) >= first_dropped)
                .collect();
            for block in dropped {
                if let Some(location) = self.frames.remove(&block) {
                    self.live_bytes -= u64::from(location.len);
                    self.dead_bytes += u64::from(location.len);
                }
            }
            self.dirty
                .retain(|&block, _| u64::from(block) < first_dropped);

            if new_size % self.block_size != 0 {
                let block = self.block_of(new_size);
                let keep = (new_size - self.block_start(block)) as usize;
                if let Some(content) = self.dirty.get_mut(&block) {
                    content.truncate(keep);
                } else if self.frames.contains_key(&block) {
                    let mut content = self.block_bytes(backend, block)?;
                    if content.len() > keep {
                        content.truncate(keep);
                        self.dirty.insert(block, content);
                    }
                }
            }
        }

        self.footer_stale = true;
        Ok(())
    }

    /// Compresses every dirty block and appends it to the frame area.
    fn write_dirty(&mut self, backend: &mut dyn StorageBackend) -> CoreResult<()> {
        let blocks: Vec<u32> = self.dirty.keys().copied().collect();

        for block in blocks {
            let Some(content) = self.dirty.get(&block) else {
                continue;
            };
            let frame = CompressedBlock::compress(block, content, self.codec.as_ref())?.encode();
            let len = u32::try_from(frame.len()).map_err(|_| {
                CoreError::corruption(format!("frame for block {block} exceeds 4 GiB"))
            })?;

            backend.write_at(self.tail, &frame)?;

            let location = FrameLocation {
                offset: self.tail,
                len,
            };
            if let Some(old) = self.frames.insert(block, location) {
                self.live_bytes -= u64::from(old.len);
                self.dead_bytes += u64::from(old.len);
            }
            self.live_bytes += u64::from(len);
            self.tail += u64::from(len);
            self.footer_stale = true;
            self.dirty.remove(&block);
        }

        Ok(())
    }

    /// Rewrites the live frames contiguously from offset 0.
    fn compact(&mut self, backend: &mut dyn StorageBackend) -> CoreResult<()> {
        let mut by_offset: Vec<(u32, FrameLocation)> =
            self.frames.iter().map(|(&block, &loc)| (block, loc)).collect();
        by_offset.sort_by_key(|(_, loc)| loc.offset);

        let mut buf = Vec::with_capacity(self.live_bytes as usize);
        let mut frames = BTreeMap::new();
        for (block, location) in by_offset {
            let frame = backend.read_at(location.offset, location.len as usize)?;
            frames.insert(
                block,
                FrameLocation {
                    offset: buf.len() as u64,
                    len: location.len,
                },
            );
            buf.extend_from_slice(&frame);
        }

        debug!(
            segment = self.segment,
            reclaimed = self.dead_bytes,
            live = self.live_bytes,
            "compacting segment"
        );

        backend.write_at(0, &buf)?;
        // Old frames past the compacted area must not be picked up by a scan.
        backend.set_len(buf.len() as u64)?;
        self.frames = frames;
        self.tail = buf.len() as u64;
        self.dead_bytes = 0;
        self.footer_stale = true;
        Ok(())
    }

    fn encode_footer(&self, size: u64) -> Vec<u8> {
        let capacity = self.frames.len() * ENTRY_LEN as usize + TRAILER_LEN as usize;
        let mut buf = Vec::with_capacity(capacity);
        for (&block, location) in &self.frames {
            buf.extend_from_slice(&block.to_le_bytes());
            buf.extend_from_slice(&location.offset.to_le_bytes());
            buf.extend_from_slice(&location.len.to_le_bytes());
        }
        buf.extend_from_slice(&(self.frames.len() as u32).to_le_bytes());
        buf.extend_from_slice(&size.to_le_bytes());
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.extend_from_slice(&FOOTER_MAGIC);
        buf
    }

    /// Writes out dirty blocks, compacts when most of the file is dead, and
    /// rewrites the footer if it changed.
    pub(crate) fn flush(&mut self, backend: &mut dyn StorageBackend, size: u64) -> CoreResult<()> {
        if self.is_clean() {
            return Ok(());
        }
        self.write_dirty(backend)?;

        if self.dead_bytes > 0 && self.dead_bytes > self.live_bytes {
            self.compact(backend)?;
        }

        if self.footer_stale {
            let footer = self.encode_footer(size);
            backend.write_at(self.tail, &footer)?;
            backend.set_len(self.tail + footer.len() as u64)?;
            self.footer_stale = false;
        }
        Ok(())
    }

    /// Returns true if the size came from scanning frames. Such a size only
    /// covers blocks that were written out; zeros past them were lost with
    /// the footer.
    pub(crate) fn was_rebuilt(&self) -> bool {
        self.rebuilt
    }

    /// Returns true if nothing is waiting to be written.
    pub(crate) fn is_clean(&self) -> bool {
        self.dirty.is_empty() && !self.footer_stale
    }
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(bytes)
}
