//! Benchmark utilities.

#![warn(missing_docs)]

use pagedfile_core::{Config, OpenMode, PagedFile};
use rand::Rng;
use tempfile::TempDir;

/// Generates incompressible data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generates data with short repeating runs, roughly like text or logs.
pub fn compressible_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let mut data = Vec::with_capacity(size);
    while data.len() < size {
        let byte: u8 = rng.gen_range(b'a'..=b'z');
        let run = rng.gen_range(1..16);
        data.extend(std::iter::repeat(byte).take(run));
    }
    data.truncate(size);
    data
}

/// Creates an empty file set in a fresh temporary directory.
///
/// The directory is removed when the returned guard is dropped.
pub fn temp_paged_file(capacity: u64, compression: bool) -> (TempDir, PagedFile) {
    let dir = TempDir::new().unwrap();
    let config = Config::new()
        .segment_capacity(capacity)
        .compression(compression)
        .sync_on_flush(false);
    let file = PagedFile::open(&dir.path().join("bench.pf"), OpenMode::Write, config).unwrap();
    (dir, file)
}
