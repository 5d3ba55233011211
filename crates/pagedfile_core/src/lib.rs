//! # PagedFile Core
//!
//! One logical byte stream stored across a sequence of bounded segment files.
//!
//! This crate provides:
//! - Segment naming and directory scanning
//! - Per-segment I/O, optionally with independently compressed blocks
//! - A segment table resolving logical offsets to segments
//! - [`PagedFile`], the thread-safe logical file, and a `std::io` cursor
//! - Persisted file-set metadata with scan-based crash recovery
//!
//! ## Example
//!
//! ```rust,no_run
//! use pagedfile_core::{Config, OpenMode, PagedFile};
//! use std::path::Path;
//!
//! let config = Config::new().segment_capacity(1024).compression(true);
//! let file = PagedFile::open(Path::new("archive.pf"), OpenMode::ReadWrite, config)?;
//!
//! file.write(500, &[7u8; 2000])?;
//! assert_eq!(file.size(), 2500);
//! assert_eq!(file.segment_count(), 3);
//!
//! file.close()?;
//! # Ok::<(), pagedfile_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod cursor;
mod error;
mod metadata;
mod naming;
mod paged_file;
mod segment;

pub use config::{Config, OpenMode, DEFAULT_BLOCK_SIZE, DEFAULT_MAX_DIRTY_BLOCKS};
pub use cursor::PagedFileCursor;
pub use error::{CoreError, CoreResult};
pub use metadata::{FileSetMetadata, METADATA_LEN, METADATA_MAGIC, METADATA_VERSION};
pub use naming::SegmentNaming;
pub use paged_file::PagedFile;
pub use segment::{SegmentDescriptor, SegmentHandle, SegmentSettings, SegmentTable, Span};

pub use pagedfile_codec::{BlockCodec, Lz4Codec};
