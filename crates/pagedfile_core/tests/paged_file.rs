//! Integration tests for paged files on disk.

use pagedfile_core::{
    Config, CoreError, FileSetMetadata, OpenMode, PagedFile, SegmentNaming, SegmentSettings,
    SegmentTable,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tempfile::{tempdir, TempDir};

fn config(capacity: u64) -> Config {
    Config::new().segment_capacity(capacity).sync_on_flush(false)
}

fn compressed(capacity: u64, block_size: u32) -> Config {
    config(capacity).compression(true).block_size(block_size)
}

fn base(dir: &TempDir) -> PathBuf {
    dir.path().join("archive.pf")
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

fn segment_file_len(base: &Path, index: u32) -> u64 {
    let naming = SegmentNaming::new(base).unwrap();
    fs::metadata(naming.segment_path(index)).unwrap().len()
}

#[test]
fn write_across_three_segments() {
    let dir = tempdir().unwrap();
    let file = PagedFile::open(&base(&dir), OpenMode::ReadWrite, config(1024)).unwrap();
    let data = pattern(2000, 1);

    file.write(500, &data).unwrap();

    assert_eq!(file.size(), 2500);
    assert_eq!(file.segment_count(), 3);
    assert_eq!(file.segment_sizes(), vec![1024, 1024, 452]);
    assert_eq!(file.read(500, 2000).unwrap(), data);

    // Segment 0 holds bytes 500..1023 of the write, preceded by zeros.
    assert_eq!(file.read(0, 500).unwrap(), vec![0; 500]);
    assert_eq!(file.read(1024, 1024).unwrap(), &data[524..1548]);
    assert_eq!(file.read(2048, 452).unwrap(), &data[1548..]);

    file.close().unwrap();
    assert_eq!(segment_file_len(&base(&dir), 0), 1024);
    assert_eq!(segment_file_len(&base(&dir), 1), 1024);
    assert_eq!(segment_file_len(&base(&dir), 2), 452);
}

#[test]
fn compressed_single_byte() {
    let dir = tempdir().unwrap();
    let file = PagedFile::open(&base(&dir), OpenMode::Write, compressed(4096, 512)).unwrap();

    file.write(0, &[0x5a]).unwrap();
    file.flush().unwrap();
    assert_eq!(file.read(0, 1).unwrap(), vec![0x5a]);
    file.close().unwrap();

    let file = PagedFile::open(&base(&dir), OpenMode::Read, Config::new()).unwrap();
    assert!(file.is_compressed());
    assert_eq!(file.size(), 1);
    assert_eq!(file.read(0, 1).unwrap(), vec![0x5a]);
}

#[test]
fn read_at_size_is_range_error() {
    let dir = tempdir().unwrap();
    let file = PagedFile::open(&base(&dir), OpenMode::ReadWrite, config(64)).unwrap();

    assert!(matches!(file.read(0, 1), Err(CoreError::Range { .. })));

    file.write(0, &pattern(100, 0)).unwrap();
    let err = file.read(file.size(), 1).unwrap_err();
    assert!(matches!(
        err,
        CoreError::Range {
            offset: 100,
            len: 1,
            size: 100
        }
    ));
    assert!(matches!(file.read(90, 11), Err(CoreError::Range { .. })));
    assert!(matches!(file.read(u64::MAX, 2), Err(CoreError::Range { .. })));
}

#[test]
fn ensure_segment_out_of_order_is_sequence_error() {
    let dir = tempdir().unwrap();
    let naming = SegmentNaming::new(&base(&dir)).unwrap();
    let settings = SegmentSettings::new(1024, None, 256, 4, false).unwrap();
    let mut table = SegmentTable::new(naming, settings, true);

    let err = table.ensure_segment(5).unwrap_err();
    assert!(matches!(
        err,
        CoreError::Sequence {
            requested: 5,
            next: 0
        }
    ));
    assert!(table.is_empty());
}

#[test]
fn truncate_then_regrow_reads_zeros() {
    for config in [config(100), compressed(100, 32)] {
        let dir = tempdir().unwrap();
        let file = PagedFile::open(&base(&dir), OpenMode::ReadWrite, config).unwrap();
        let data = pattern(350, 9);
        file.write(0, &data).unwrap();
        file.flush().unwrap();

        file.truncate(130).unwrap();
        assert_eq!(file.size(), 130);
        assert_eq!(file.segment_count(), 2);
        let naming = SegmentNaming::new(&base(&dir)).unwrap();
        assert!(!naming.segment_path(2).exists());
        assert!(!naming.segment_path(3).exists());

        file.truncate(350).unwrap();
        assert_eq!(file.size(), 350);
        let read = file.read(0, 350).unwrap();
        assert_eq!(&read[..130], &data[..130]);
        assert!(read[130..].iter().all(|&b| b == 0));
    }
}

#[test]
fn truncate_to_zero_removes_all_segments() {
    let dir = tempdir().unwrap();
    let file = PagedFile::open(&base(&dir), OpenMode::ReadWrite, config(10)).unwrap();
    file.write(0, &pattern(35, 0)).unwrap();
    assert_eq!(file.segment_count(), 4);

    file.truncate(0).unwrap();
    assert_eq!(file.size(), 0);
    assert_eq!(file.segment_count(), 0);

    let naming = SegmentNaming::new(&base(&dir)).unwrap();
    assert!(naming.scan().unwrap().is_empty());
}

#[test]
fn reopen_after_clean_close() {
    for config in [config(256), compressed(256, 64)] {
        let dir = tempdir().unwrap();
        let data = pattern(1000, 3);
        {
            let file = PagedFile::open(&base(&dir), OpenMode::ReadWrite, config.clone()).unwrap();
            file.write(0, &data).unwrap();
            file.write(700, b"patched").unwrap();
            file.close().unwrap();
        }

        let naming = SegmentNaming::new(&base(&dir)).unwrap();
        let metadata = FileSetMetadata::load(&naming).unwrap().unwrap();
        assert!(metadata.clean);
        assert_eq!(metadata.total_size, 1000);
        assert_eq!(metadata.segment_count, 4);

        let file = PagedFile::open(&base(&dir), OpenMode::Read, Config::new()).unwrap();
        assert_eq!(file.size(), 1000);
        assert_eq!(file.segment_capacity(), 256);

        let mut expected = data.clone();
        expected[700..707].copy_from_slice(b"patched");
        assert_eq!(file.read(0, 1000).unwrap(), expected);
    }
}

#[test]
fn stored_capacity_wins_on_reopen() {
    let dir = tempdir().unwrap();
    PagedFile::open(&base(&dir), OpenMode::ReadWrite, config(128))
        .unwrap()
        .write(0, &pattern(300, 0))
        .unwrap();

    let file = PagedFile::open(&base(&dir), OpenMode::ReadWrite, config(4096)).unwrap();
    assert_eq!(file.segment_capacity(), 128);
    assert_eq!(file.size(), 300);
    assert_eq!(file.segment_count(), 3);
}

#[test]
fn recovers_without_clean_flag() {
    let dir = tempdir().unwrap();
    let data = pattern(900, 5);
    {
        let file = PagedFile::open(&base(&dir), OpenMode::ReadWrite, config(256)).unwrap();
        file.write(0, &data).unwrap();
        file.flush().unwrap();
        // Simulate a crash: the handles go away but close never runs.
        std::mem::forget(file);
    }

    let naming = SegmentNaming::new(&base(&dir)).unwrap();
    assert!(!FileSetMetadata::load(&naming).unwrap().unwrap().clean);

    let file = PagedFile::open(&base(&dir), OpenMode::ReadWrite, Config::new()).unwrap();
    assert_eq!(file.size(), 900);
    assert_eq!(file.read(0, 900).unwrap(), data);
}

#[test]
fn compressed_recovery_keeps_zero_filled_segments_full() {
    let dir = tempdir().unwrap();
    let data = pattern(600, 4);
    {
        let config = compressed(1024, 256).max_dirty_blocks(1);
        let file = PagedFile::open(&base(&dir), OpenMode::ReadWrite, config).unwrap();
        file.write(0, &[1; 10]).unwrap();
        file.flush().unwrap();
        // Growing into segment 1 zero-fills segment 0 without writing frames.
        file.write(1500, b"later").unwrap();
        // Spilling dirty blocks overwrites segment 0's footer.
        file.write(0, &data).unwrap();
        std::mem::forget(file);
    }

    let file = PagedFile::open(&base(&dir), OpenMode::ReadWrite, Config::new()).unwrap();
    assert_eq!(file.segment_count(), 2);
    assert_eq!(file.segment_sizes()[0], 1024);
    assert_eq!(file.read(0, 600).unwrap(), data);
    assert_eq!(file.read(600, 424).unwrap(), vec![0; 424]);
    let size = file.size();
    file.close().unwrap();

    let file = PagedFile::open(&base(&dir), OpenMode::Read, Config::new()).unwrap();
    assert_eq!(file.size(), size);
    assert_eq!(file.read(0, 600).unwrap(), data);
}

#[test]
fn failed_segment_creation_reports_bytes_written() {
    let dir = tempdir().unwrap();
    let file = PagedFile::open(&base(&dir), OpenMode::ReadWrite, config(1024)).unwrap();
    let naming = SegmentNaming::new(&base(&dir)).unwrap();
    fs::create_dir(naming.segment_path(1)).unwrap();

    let data = pattern(2000, 8);
    let err = file.write(500, &data).unwrap_err();
    assert!(matches!(err, CoreError::PartialWrite { .. }));
    assert_eq!(err.bytes_written(), 524);

    assert_eq!(file.size(), 1024);
    assert_eq!(file.segment_count(), 1);
    assert_eq!(file.read(500, 524).unwrap(), &data[..524]);
}

#[test]
fn recovers_without_metadata() {
    let dir = tempdir().unwrap();
    let data = pattern(600, 2);
    {
        let file = PagedFile::open(&base(&dir), OpenMode::ReadWrite, config(256)).unwrap();
        file.write(0, &data).unwrap();
        file.close().unwrap();
    }
    fs::remove_file(base(&dir)).unwrap();

    let err = PagedFile::open(&base(&dir), OpenMode::Read, Config::new()).unwrap_err();
    assert!(matches!(err, CoreError::Config { .. }));

    let file = PagedFile::open(&base(&dir), OpenMode::ReadWrite, config(256)).unwrap();
    assert_eq!(file.size(), 600);
    assert_eq!(file.read(0, 600).unwrap(), data);
    file.close().unwrap();

    let naming = SegmentNaming::new(&base(&dir)).unwrap();
    assert!(FileSetMetadata::load(&naming).unwrap().unwrap().clean);
}

#[test]
fn recovery_detects_missing_segment() {
    let dir = tempdir().unwrap();
    {
        let file = PagedFile::open(&base(&dir), OpenMode::ReadWrite, config(100)).unwrap();
        file.write(0, &pattern(350, 0)).unwrap();
        file.close().unwrap();
    }
    let naming = SegmentNaming::new(&base(&dir)).unwrap();
    fs::remove_file(naming.segment_path(1)).unwrap();
    fs::remove_file(base(&dir)).unwrap();

    let err = PagedFile::open(&base(&dir), OpenMode::Read, config(100)).unwrap_err();
    assert!(err.is_corruption());
}

#[test]
fn corrupted_metadata_detected() {
    let dir = tempdir().unwrap();
    PagedFile::open(&base(&dir), OpenMode::ReadWrite, config(100))
        .unwrap()
        .close()
        .unwrap();

    let mut bytes = fs::read(base(&dir)).unwrap();
    bytes[10] ^= 0xff;
    fs::write(base(&dir), bytes).unwrap();

    let err = PagedFile::open(&base(&dir), OpenMode::ReadWrite, config(100)).unwrap_err();
    assert!(err.is_corruption());
}

#[test]
fn segment_size_mismatch_detected() {
    let dir = tempdir().unwrap();
    {
        let file = PagedFile::open(&base(&dir), OpenMode::ReadWrite, config(100)).unwrap();
        file.write(0, &pattern(250, 0)).unwrap();
        file.close().unwrap();
    }
    let naming = SegmentNaming::new(&base(&dir)).unwrap();
    fs::write(naming.segment_path(2), b"short").unwrap();

    let file = PagedFile::open(&base(&dir), OpenMode::Read, Config::new()).unwrap();
    assert_eq!(file.size(), 250);
    assert!(file.read(0, 100).is_ok());
    let err = file.read(200, 10).unwrap_err();
    assert!(err.is_corruption());
}

#[test]
fn corrupted_compressed_block_detected() {
    let dir = tempdir().unwrap();
    {
        let file = PagedFile::open(&base(&dir), OpenMode::ReadWrite, compressed(4096, 4096))
            .unwrap();
        file.write(0, &pattern(3000, 7)).unwrap();
        file.close().unwrap();
    }

    // Flip a byte inside the first frame's payload.
    let naming = SegmentNaming::new(&base(&dir)).unwrap();
    let path = naming.segment_path(0);
    let mut bytes = fs::read(&path).unwrap();
    bytes[pagedfile_codec::FRAME_HEADER_LEN + 2] ^= 0x55;
    fs::write(&path, bytes).unwrap();

    let file = PagedFile::open(&base(&dir), OpenMode::Read, Config::new()).unwrap();
    let err = file.read(0, 10).unwrap_err();
    assert!(err.is_corruption());
}

#[test]
fn read_mode_requires_existing_file_set() {
    let dir = tempdir().unwrap();
    let err = PagedFile::open(&base(&dir), OpenMode::Read, config(100)).unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));

    let err = PagedFile::open(
        &base(&dir),
        OpenMode::ReadWrite,
        config(100).create_if_missing(false),
    )
    .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));
    assert!(!base(&dir).exists());
}

#[test]
fn read_mode_rejects_modification() {
    let dir = tempdir().unwrap();
    {
        let file = PagedFile::open(&base(&dir), OpenMode::ReadWrite, config(100)).unwrap();
        file.write(0, b"frozen").unwrap();
    }

    let file = PagedFile::open(&base(&dir), OpenMode::Read, Config::new()).unwrap();
    assert!(matches!(file.write(0, b"x"), Err(CoreError::ReadOnly)));
    assert!(matches!(file.truncate(0), Err(CoreError::ReadOnly)));
    assert!(file.flush().is_ok());
    assert_eq!(file.read(0, 6).unwrap(), b"frozen");
}

#[test]
fn write_mode_discards_existing_file_set() {
    let dir = tempdir().unwrap();
    {
        let file = PagedFile::open(&base(&dir), OpenMode::ReadWrite, config(100)).unwrap();
        file.write(0, &pattern(450, 0)).unwrap();
    }

    let file = PagedFile::open(&base(&dir), OpenMode::Write, compressed(64, 16)).unwrap();
    assert_eq!(file.size(), 0);
    assert_eq!(file.segment_capacity(), 64);
    assert!(file.is_compressed());

    let naming = SegmentNaming::new(&base(&dir)).unwrap();
    assert!(naming.scan().unwrap().is_empty());
}

#[test]
fn invalid_options_are_config_errors() {
    let dir = tempdir().unwrap();
    for config in [
        Config::new().segment_capacity(0),
        Config::new().block_size(0),
        Config::new(),
    ] {
        let err = PagedFile::open(&base(&dir), OpenMode::ReadWrite, config).unwrap_err();
        assert!(matches!(err, CoreError::Config { .. }), "{err}");
    }
}

#[test]
fn unusable_base_path_is_naming_error() {
    let dir = tempdir().unwrap();
    let err = PagedFile::open(
        &dir.path().join("missing").join("archive.pf"),
        OpenMode::ReadWrite,
        config(100),
    )
    .unwrap_err();
    assert!(matches!(err, CoreError::Naming { .. }));
}

#[test]
fn appends_at_size_grow_the_file() {
    let dir = tempdir().unwrap();
    let file = PagedFile::open(&base(&dir), OpenMode::ReadWrite, config(8)).unwrap();

    let mut expected = Vec::new();
    for round in 0..10u8 {
        let chunk = vec![round; usize::from(round) + 1];
        file.write(file.size(), &chunk).unwrap();
        expected.extend_from_slice(&chunk);
    }

    assert_eq!(file.size(), expected.len() as u64);
    assert_eq!(file.read(0, expected.len()).unwrap(), expected);
}

#[test]
fn concurrent_writers_see_serialized_operations() {
    let dir = tempdir().unwrap();
    let file = Arc::new(PagedFile::open(&base(&dir), OpenMode::ReadWrite, config(100)).unwrap());

    let handles: Vec<_> = (0..4u8)
        .map(|t| {
            let file = Arc::clone(&file);
            thread::spawn(move || {
                for i in 0..10u64 {
                    let offset = (u64::from(t) * 10 + i) * 37;
                    file.write(offset, &[t + 1; 37]).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(file.size(), 40 * 37);
    for t in 0..4u8 {
        for i in 0..10u64 {
            let offset = (u64::from(t) * 10 + i) * 37;
            assert_eq!(file.read(offset, 37).unwrap(), vec![t + 1; 37]);
        }
    }
    file.close().unwrap();
}

#[test]
fn drop_closes_file_set() {
    let dir = tempdir().unwrap();
    {
        let file = PagedFile::open(&base(&dir), OpenMode::ReadWrite, compressed(512, 128)).unwrap();
        file.write(0, &pattern(700, 4)).unwrap();
    }

    let naming = SegmentNaming::new(&base(&dir)).unwrap();
    assert!(FileSetMetadata::load(&naming).unwrap().unwrap().clean);

    let file = PagedFile::open(&base(&dir), OpenMode::Read, Config::new()).unwrap();
    assert_eq!(file.read(0, 700).unwrap(), pattern(700, 4));
}
