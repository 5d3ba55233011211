//! # PagedFile Storage
//!
//! Storage backend trait and implementations for pagedfile segments.
//!
//! This crate provides the lowest-level storage abstraction: one backend is
//! one physical byte store (normally one segment file). Backends are **opaque
//! byte stores** - they do not know about segments, blocks or metadata.
//!
//! ## Design Principles
//!
//! - Backends are simple positioned byte stores (read, write, resize, flush)
//! - No knowledge of segment boundaries or compressed block framing
//! - Must be `Send + Sync` for concurrent access
//! - `pagedfile_core` owns all file format interpretation
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral storage
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use pagedfile_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! backend.write_at(4, b"world").unwrap();
//! backend.write_at(0, b"hey ").unwrap();
//! let data = backend.read_at(0, 9).unwrap();
//! assert_eq!(&data, b"hey world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
