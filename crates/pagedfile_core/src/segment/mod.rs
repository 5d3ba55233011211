//! Segment files backing a paged file.
//!
//! A logical file is split into segments of a fixed capacity. Segment `i`
//! holds logical bytes `i * capacity .. (i + 1) * capacity`; every segment
//! except the last is full.
//!
//! Plain segments store the bytes as-is, so the file length equals the
//! logical size. Compressed segments store independently compressed blocks
//! followed by a block index; see [`SegmentHandle`].

mod blocks;
mod handle;
mod table;

pub use handle::{SegmentHandle, SegmentSettings};
pub use table::{SegmentDescriptor, SegmentTable, Span};
