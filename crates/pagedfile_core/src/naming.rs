//! Segment file naming.
//!
//! A file set lives next to its base path:
//!
//! ```text
//! <dir>/
//! ├─ data.pf           # File-set metadata
//! ├─ data.pf.000000    # Segment 0
//! ├─ data.pf.000001    # Segment 1
//! └─ ...
//! ```
//!
//! Indices are zero-padded to six digits; larger indices simply use more
//! digits. Only names that format back to themselves are recognized, which
//! keeps the mapping injective in both directions.

use crate::error::{CoreError, CoreResult};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

/// Minimum number of digits in a segment suffix.
const INDEX_WIDTH: usize = 6;

/// Suffix of the temporary file used for atomic metadata writes.
const TEMP_SUFFIX: &str = "tmp";

/// Maps a base path and a segment index to a physical path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentNaming {
    base: PathBuf,
    dir: PathBuf,
    file_name: String,
}

impl SegmentNaming {
    /// Creates a naming scheme for `base`.
    ///
    /// # Errors
    ///
    /// Returns a naming error if the base path is empty, has no usable UTF-8
    /// file name, or its parent exists but is not a directory.
    pub fn new(base: &Path) -> CoreResult<Self> {
        if base.as_os_str().is_empty() {
            return Err(CoreError::naming(base, "path is empty"));
        }

        let file_name = base
            .file_name()
            .and_then(OsStr::to_str)
            .ok_or_else(|| CoreError::naming(base, "path has no UTF-8 file name"))?;

        if file_name.contains('\0') {
            return Err(CoreError::naming(base, "file name contains NUL"));
        }
        if file_name.ends_with('.') {
            return Err(CoreError::naming(base, "file name ends with '.'"));
        }

        let dir = match base.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if dir.exists() && !dir.is_dir() {
            return Err(CoreError::naming(base, "parent is not a directory"));
        }

        Ok(Self {
            base: base.to_path_buf(),
            dir,
            file_name: file_name.to_string(),
        })
    }

    /// Verifies that the directory holding the file set can be written to.
    ///
    /// # Errors
    ///
    /// Returns a naming error if the directory is missing or read-only.
    pub fn check_writable(&self) -> CoreResult<()> {
        let meta = fs::metadata(&self.dir)
            .map_err(|e| CoreError::naming(&self.base, format!("directory unavailable: {e}")))?;
        if meta.permissions().readonly() {
            return Err(CoreError::naming(&self.base, "directory is read-only"));
        }
        Ok(())
    }

    /// Returns the base path; the metadata file lives here.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base
    }

    /// Returns the directory holding the file set.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// Returns the path of the temporary metadata file.
    #[must_use]
    pub fn temp_path(&self) -> PathBuf {
        self.dir.join(format!("{}.{TEMP_SUFFIX}", self.file_name))
    }

    /// Returns the path of segment `index` (e.g. 1 produces `<base>.000001`).
    #[must_use]
    pub fn segment_path(&self, index: u32) -> PathBuf {
        self.dir
            .join(format!("{}.{index:0width$}", self.file_name, width = INDEX_WIDTH))
    }

    /// Recovers the segment index from a path produced by [`Self::segment_path`].
    ///
    /// Returns `None` for paths that belong to another file set or whose
    /// suffix would not format back to the same name.
    #[must_use]
    pub fn parse_index(&self, path: &Path) -> Option<u32> {
        let name = path.file_name()?.to_str()?;
        let suffix = name.strip_prefix(&self.file_name)?.strip_prefix('.')?;

        if suffix.len() < INDEX_WIDTH || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let index: u32 = suffix.parse().ok()?;

        // Reject "0000001" and friends.
        if format!("{index:0width$}", width = INDEX_WIDTH) != suffix {
            return None;
        }
        Some(index)
    }

    /// Lists the segment indices present on disk in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read. A missing directory
    /// yields an empty list.
    pub fn scan(&self) -> CoreResult<Vec<u32>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut indices = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(index) = self.parse_index(&entry.path()) {
                indices.push(index);
            }
        }
        indices.sort_unstable();
        Ok(indices)
    }

    /// Syncs the directory so that created, renamed or deleted entries are durable.
    ///
    /// Directory fsync is not supported on Windows; NTFS journaling covers
    /// metadata durability there.
    #[cfg(unix)]
    pub fn sync_directory(&self) -> CoreResult<()> {
        let dir = fs::File::open(&self.dir)?;
        dir.sync_all()?;
        Ok(())
    }

    /// Syncs the directory so that created, renamed or deleted entries are durable.
    #[cfg(not(unix))]
    pub fn sync_directory(&self) -> CoreResult<()> {
        Ok(())
    }
}
