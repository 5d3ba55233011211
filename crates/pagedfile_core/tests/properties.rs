//! Property tests for logical reads and writes.

use pagedfile_core::{Config, OpenMode, PagedFile};
use proptest::prelude::*;
use tempfile::tempdir;

fn open(capacity: u64, compression: bool) -> (tempfile::TempDir, PagedFile) {
    let dir = tempdir().unwrap();
    let config = Config::new()
        .segment_capacity(capacity)
        .compression(compression)
        .block_size(16)
        .max_dirty_blocks(2)
        .sync_on_flush(false);
    let file = PagedFile::open(&dir.path().join("data"), OpenMode::Write, config).unwrap();
    (dir, file)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn writes_read_back(
        capacity in 8u64..200,
        compression in any::<bool>(),
        writes in prop::collection::vec(
            (0u64..600, prop::collection::vec(any::<u8>(), 0..150)),
            1..8,
        ),
    ) {
        let (_dir, file) = open(capacity, compression);
        let mut model: Vec<u8> = Vec::new();

        for (offset, data) in &writes {
            file.write(*offset, data).unwrap();
            if !data.is_empty() {
                let end = *offset as usize + data.len();
                if model.len() < end {
                    model.resize(end, 0);
                }
                model[*offset as usize..end].copy_from_slice(data);
            }
        }

        prop_assert_eq!(file.size(), model.len() as u64);
        prop_assert_eq!(file.read(0, model.len()).unwrap(), model.clone());

        if let Some((offset, data)) = writes.last() {
            prop_assert_eq!(&file.read(*offset, data.len()).unwrap(), data);
        }
    }

    #[test]
    fn straddling_writes_match_single_segment_writes(
        capacity in 3u64..64,
        offset in 0u64..300,
        data in prop::collection::vec(any::<u8>(), 1..300),
    ) {
        let (_split_dir, split) = open(capacity, false);
        let (_whole_dir, whole) = open(4096, false);

        split.write(offset, &data).unwrap();
        whole.write(offset, &data).unwrap();

        let len = (offset as usize) + data.len();
        prop_assert_eq!(split.size(), whole.size());
        prop_assert_eq!(split.read(0, len).unwrap(), whole.read(0, len).unwrap());
    }

    #[test]
    fn truncate_preserves_prefix(
        capacity in 4u64..100,
        compression in any::<bool>(),
        data in prop::collection::vec(any::<u8>(), 1..400),
        cut in 0usize..400,
    ) {
        let cut = cut.min(data.len());
        let (_dir, file) = open(capacity, compression);
        file.write(0, &data).unwrap();

        file.truncate(cut as u64).unwrap();
        file.truncate(data.len() as u64).unwrap();

        let read = file.read(0, data.len()).unwrap();
        prop_assert_eq!(&read[..cut], &data[..cut]);
        prop_assert!(read[cut..].iter().all(|&b| b == 0));
    }
}
