use std::{io::Write, sync::Arc};

use cfile_storage::{FileReader, MemoryReader, PosixReader};
use pretty_assertions::assert_eq;
use rand::{thread_rng, Rng};
use tempfile::NamedTempFile;

use crate::{
    format::{BlockPointer, POSITIONAL_INDEX},
    index::IndexTreeIterator,
    reader::{CFileReader, CorruptionError, Error, FormatError, Section},
    test::init_test_logger,
    writer::{write_file, Parameters, WrittenFile},
    ReaderOptions,
};

fn open(file: &WrittenFile) -> CFileReader {
    CFileReader::open(ReaderOptions::default(), file.reader()).unwrap()
}

fn open_bytes(bytes: Vec<u8>) -> Result<CFileReader, Error> {
    CFileReader::open(ReaderOptions::default(), Arc::new(MemoryReader::new(bytes)))
}

fn random_values(n: usize) -> Vec<u32> {
    let mut rng = thread_rng();
    (0..n)
        .map(|_| match rng.gen_range(0..3) {
            0 => rng.gen_range(0..256),
            1 => rng.gen_range(0..65536),
            _ => rng.gen(),
        })
        .collect()
}

#[test]
fn seek_and_read_across_blocks() {
    init_test_logger();
    let values: Vec<u32> = (0..130).collect();
    let file = write_file(&values, &Parameters::default());
    assert_eq!(file.data_blocks.len(), 9);
    let reader = open(&file);
    assert_eq!(reader.n_rows(), 130);

    let mut iter = reader.new_iterator_by_pos().unwrap();
    assert!(!iter.is_seeked());
    iter.seek_to_ordinal(99).unwrap();
    assert!(iter.is_seeked());
    assert_eq!(iter.current_ordinal(), 99);
    assert_eq!(iter.get_next_values(5).unwrap(), vec![99, 100, 101, 102, 103]);
    assert_eq!(iter.current_ordinal(), 104);

    // Crosses from the block holding 112..128 into the last block.
    iter.seek_to_ordinal(126).unwrap();
    assert_eq!(iter.get_next_values(10).unwrap(), vec![126, 127, 128, 129]);
    assert_eq!(iter.current_ordinal(), 130);
    assert_eq!(iter.get_next_values(10).unwrap(), Vec::<u32>::new());
}

#[test]
fn two_blocks() {
    let values: Vec<u32> = (0..130).collect();
    let file = write_file(&values, &Parameters::default().with_values_per_block(100));
    assert_eq!(file.data_blocks.len(), 2);
    let reader = open(&file);
    assert_eq!(reader.search_position(99).unwrap(), (file.data_blocks[0], 0));
    assert_eq!(reader.search_position(100).unwrap(), (file.data_blocks[1], 100));

    let mut iter = reader.new_iterator_by_pos().unwrap();
    iter.seek_to_ordinal(99).unwrap();
    assert_eq!(iter.get_next_values(5).unwrap(), vec![99, 100, 101, 102, 103]);

    let root = reader.index_root_block(POSITIONAL_INDEX).unwrap();
    let mut index = IndexTreeIterator::<u32>::new(&reader, root, 130);
    index.seek_at_or_after(120).unwrap();
    assert_eq!(index.current_range(), Some(100..130));
}

#[test]
fn search_position() {
    init_test_logger();
    let values: Vec<u32> = (0..130).map(|i| i * 7).collect();
    let file = write_file(&values, &Parameters::default());
    let reader = open(&file);
    for ordinal in 0..130 {
        let (pointer, first) = reader.search_position(ordinal).unwrap();
        let block = ordinal as usize / 16;
        assert_eq!(pointer, file.data_blocks[block]);
        assert_eq!(first as usize, block * 16);
    }
    assert!(matches!(
        reader.search_position(130),
        Err(Error::OutOfRange {
            key: 130,
            limit: 130
        })
    ));
}

#[test]
fn every_ordinal_matches_linear_scan() {
    init_test_logger();
    for (values_per_block, max_children) in [(1, 2), (3, 3), (16, 4), (50, 10), (1000, 2)] {
        let values = random_values(317);
        let parameters = Parameters::default()
            .with_values_per_block(values_per_block)
            .with_max_children(max_children);
        let file = write_file(&values, &parameters);
        let reader = open(&file);

        let mut all = reader.new_iterator_by_pos().unwrap();
        all.seek_to_ordinal(0).unwrap();
        assert_eq!(all.get_next_values(1000).unwrap(), values);

        let mut iter = reader.new_iterator_by_pos().unwrap();
        for ordinal in 0..values.len() {
            iter.seek_to_ordinal(ordinal as u32).unwrap();
            assert_eq!(iter.current_ordinal() as usize, ordinal);
            let expected = &values[ordinal..(ordinal + 7).min(values.len())];
            assert_eq!(iter.get_next_values(7).unwrap(), expected);
        }

        // Random seeks, backward as well as forward.
        let mut rng = thread_rng();
        for _ in 0..200 {
            let ordinal = rng.gen_range(0..values.len());
            let n = rng.gen_range(0..40);
            iter.seek_to_ordinal(ordinal as u32).unwrap();
            let expected = &values[ordinal..(ordinal + n).min(values.len())];
            assert_eq!(iter.get_next_values(n).unwrap(), expected);
        }
    }
}

#[test]
fn index_iterator_visits_every_data_block() {
    init_test_logger();
    let values = random_values(200);
    let file = write_file(
        &values,
        &Parameters::default()
            .with_values_per_block(7)
            .with_max_children(3),
    );
    let reader = open(&file);
    let root = reader.index_root_block(POSITIONAL_INDEX).unwrap();
    assert_eq!(Some(root), file.root());

    let mut iter = IndexTreeIterator::<u32>::new(&reader, root, 200);
    assert!(!iter.is_positioned());
    let entry = iter.seek_at_or_after(0).unwrap();
    assert_eq!(entry.range(), 0..7);
    let mut pointers = vec![iter.current_block_pointer().unwrap()];
    while iter.next().unwrap() {
        let entry = iter.current_entry().unwrap();
        assert_eq!(entry.first_key as usize, pointers.len() * 7);
        pointers.push(entry.pointer);
    }
    assert_eq!(pointers, file.data_blocks);

    // At the end, the iterator stays on the last entry.
    assert_eq!(iter.current_block_pointer(), file.data_blocks.last().copied());
    assert_eq!(iter.current_key(), Some(196));

    // Clones are independent.
    let mut clone = iter.clone();
    clone.seek_at_or_after(50).unwrap();
    assert_eq!(clone.current_key(), Some(49));
    assert_eq!(iter.current_key(), Some(196));

    assert!(matches!(
        iter.seek_at_or_after(200),
        Err(Error::OutOfRange { key: 200, .. })
    ));
    assert!(!iter.is_positioned());
}

#[test]
fn out_of_range_seek_leaves_position_unchanged() {
    init_test_logger();
    let values: Vec<u32> = (0..130).collect();
    let file = write_file(&values, &Parameters::default());
    let reader = open(&file);

    let mut iter = reader.new_iterator_by_pos().unwrap();
    assert!(matches!(
        iter.seek_to_ordinal(130),
        Err(Error::OutOfRange { .. })
    ));
    assert!(!iter.is_seeked());

    iter.seek_to_ordinal(10).unwrap();
    assert!(matches!(
        iter.seek_to_ordinal(1000),
        Err(Error::OutOfRange {
            key: 1000,
            limit: 130
        })
    ));
    assert!(iter.is_seeked());
    assert_eq!(iter.current_ordinal(), 10);
    assert_eq!(iter.get_next_values(3).unwrap(), vec![10, 11, 12]);
}

#[test]
fn read_before_seek() {
    let file = write_file(&[1, 2, 3], &Parameters::default());
    let reader = open(&file);
    let mut iter = reader.new_iterator_by_pos().unwrap();
    assert!(matches!(iter.get_next_values(1), Err(Error::NotSeeked)));
}

#[test]
#[should_panic(expected = "unpositioned")]
fn current_ordinal_before_seek() {
    let file = write_file(&[1, 2, 3], &Parameters::default());
    let reader = open(&file);
    let iter = reader.new_iterator_by_pos().unwrap();
    iter.current_ordinal();
}

#[test]
fn missing_positional_index() {
    init_test_logger();
    let parameters = Parameters {
        positional_index: false,
        ..Parameters::default()
    };
    let file = write_file(&[5, 6, 7], &parameters);
    let reader = open(&file);
    assert!(matches!(
        reader.new_iterator_by_pos(),
        Err(Error::NotFound(name)) if name == POSITIONAL_INDEX
    ));
    assert!(matches!(reader.search_position(1), Err(Error::NotFound(_))));
    assert!(matches!(
        reader.index_root_block("valueidx"),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn empty_column() {
    let file = write_file(&[], &Parameters::default());
    assert!(file.root().is_none());
    let reader = open(&file);
    assert_eq!(reader.n_rows(), 0);
    assert!(matches!(
        reader.search_position(0),
        Err(Error::OutOfRange { key: 0, limit: 0 })
    ));
    assert!(matches!(
        reader.new_iterator_by_pos(),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn header_and_footer() {
    let parameters = Parameters {
        metadata: vec![("compression".into(), "none".into())],
        ..Parameters::default()
    };
    let file = write_file(&[10, 20, 30], &parameters);
    let reader = open(&file);
    assert!(reader.is_initialized());
    assert_eq!(reader.file_size(), file.bytes.len() as u64);
    assert_eq!(reader.header().metadata.len(), 1);
    assert_eq!(reader.header().metadata[0].key, "compression");
    assert_eq!(reader.header().metadata[0].value, "none");
    assert_eq!(reader.footer().index_roots.len(), 1);
    assert_eq!(reader.options(), &ReaderOptions::default());
}

#[test]
fn truncated_files() {
    init_test_logger();
    let file = write_file(&(0..50).collect::<Vec<_>>(), &Parameters::default());

    assert!(matches!(
        open_bytes(file.bytes[..file.bytes.len() - 1].to_vec()),
        Err(Error::Format(FormatError::BadMagic {
            section: Section::Footer,
            ..
        }))
    ));
    assert!(matches!(
        open_bytes(file.bytes[..20].to_vec()),
        Err(Error::Format(FormatError::FileTooSmall { file_size: 20, .. }))
    ));
    assert!(matches!(
        open_bytes(Vec::new()),
        Err(Error::Format(FormatError::FileTooSmall { .. }))
    ));

    // Cutting off the front leaves a good footer but a bad header.
    assert!(matches!(
        open_bytes(file.bytes[1..].to_vec()),
        Err(Error::Format(FormatError::BadMagic {
            section: Section::Header,
            ..
        }))
    ));
}

#[test]
fn bad_framing_lengths() {
    let file = write_file(&[1, 2, 3], &Parameters::default());
    let n = file.bytes.len();

    let mut bytes = file.bytes.clone();
    bytes[n - 4..].copy_from_slice(&u32::MAX.to_le_bytes());
    assert!(matches!(
        open_bytes(bytes),
        Err(Error::Format(FormatError::BadLength {
            section: Section::Footer,
            ..
        }))
    ));

    let mut bytes = file.bytes.clone();
    bytes[8..12].copy_from_slice(&(n as u32).to_le_bytes());
    assert!(matches!(
        open_bytes(bytes),
        Err(Error::Format(FormatError::BadLength {
            section: Section::Header,
            ..
        }))
    ));
}

#[test]
fn unsupported_version() {
    let parameters = Parameters {
        major_version: 2,
        ..Parameters::default()
    };
    let file = write_file(&[1, 2, 3], &parameters);
    assert!(matches!(
        open_bytes(file.bytes),
        Err(Error::Format(FormatError::UnsupportedVersion {
            major: 2,
            expected_major: 1,
            ..
        }))
    ));
}

#[test]
fn checksum_mismatch() {
    init_test_logger();
    let values: Vec<u32> = (0..64).collect();
    let mut file = write_file(&values, &Parameters::default());
    let block = file.data_blocks[1];
    // Flip a bit in the value for ordinal 16, without fixing the checksum.
    file.bytes[block.offset as usize + 24] ^= 1;

    let reader = open(&file);
    let mut iter = reader.new_iterator_by_pos().unwrap();
    iter.seek_to_ordinal(0).unwrap();
    assert!(matches!(
        iter.get_next_values(20),
        Err(Error::Corruption(CorruptionError::InvalidChecksum { pointer, .. })) if pointer == block
    ));
    // The failed read did not move the iterator.
    assert_eq!(iter.current_ordinal(), 0);
    assert!(matches!(
        reader.read_block(block),
        Err(Error::Corruption(CorruptionError::InvalidChecksum { .. }))
    ));

    let options = ReaderOptions {
        verify_checksums: false,
        ..ReaderOptions::default()
    };
    let reader = CFileReader::open(options, file.reader()).unwrap();
    let mut iter = reader.new_iterator_by_pos().unwrap();
    iter.seek_to_ordinal(15).unwrap();
    assert_eq!(iter.get_next_values(3).unwrap(), vec![15, 17, 17]);
}

#[test]
fn corrupt_blocks() {
    init_test_logger();
    let values: Vec<u32> = (0..64).collect();
    let file = write_file(&values, &Parameters::default());

    // A data block that claims to start at the wrong ordinal.
    let mut bad_ordinal = write_file(&values, &Parameters::default());
    let block = bad_ordinal.data_blocks[2];
    bad_ordinal.patch_block(block, 8, &99u32.to_le_bytes());
    let reader = open(&bad_ordinal);
    let mut iter = reader.new_iterator_by_pos().unwrap();
    assert!(matches!(
        iter.seek_to_ordinal(33),
        Err(Error::Corruption(CorruptionError::DataBlockMismatch { first: 99, expected_first: 32, .. }))
    ));
    iter.seek_to_ordinal(3).unwrap();
    assert_eq!(iter.get_next_values(2).unwrap(), vec![3, 4]);

    // An index block with the wrong magic.
    let mut bad_magic = write_file(&values, &Parameters::default());
    let root = bad_magic.root().unwrap();
    bad_magic.patch_block(root, 4, b"XXXX");
    let reader = open(&bad_magic);
    assert!(matches!(
        reader.search_position(0),
        Err(Error::Corruption(CorruptionError::Binrw { pointer, .. })) if pointer == root
    ));

    // Pointers outside the file are rejected without reading.
    let reader = open(&file);
    let past_end = BlockPointer::new(file.bytes.len() as u64 - 4, 16);
    assert!(matches!(
        reader.read_block(past_end),
        Err(Error::Corruption(CorruptionError::BlockOutOfBounds { .. }))
    ));
    assert!(matches!(
        reader.read_block(BlockPointer::new(0, 0)),
        Err(Error::Corruption(CorruptionError::InvalidBlockPointer(_)))
    ));
    assert!(matches!(
        reader.read_block(BlockPointer::new(0, 4)),
        Err(Error::Corruption(CorruptionError::BlockTooSmall(_)))
    ));
}

#[test]
fn root_must_start_at_zero() {
    init_test_logger();
    let values: Vec<u32> = (0..64).collect();
    let mut file = write_file(&values, &Parameters::default());
    let root = file.root().unwrap();
    // The root's first key claims that the column starts at ordinal 5.
    file.patch_block(root, 32, &[5]);
    // Make the first data block agree with it.
    let first = file.data_blocks[0];
    file.patch_block(first, 8, &5u32.to_le_bytes());
    file.patch_block(first, 12, &11u32.to_le_bytes());

    let reader = open(&file);
    assert!(matches!(
        reader.search_position(2),
        Err(Error::Corruption(CorruptionError::KeyOutOfRange {
            pointer,
            key: 5,
            start: 0,
            end: 64,
        })) if pointer == root
    ));
    let mut iter = reader.new_iterator_by_pos().unwrap();
    assert!(matches!(
        iter.seek_to_ordinal(2),
        Err(Error::Corruption(CorruptionError::KeyOutOfRange { .. }))
    ));
    assert!(!iter.is_seeked());
}

#[test]
fn too_deep() {
    init_test_logger();
    let values = random_values(130);
    let parameters = Parameters::default()
        .with_values_per_block(1)
        .with_max_children(2);
    let file = write_file(&values, &parameters);

    let reader = open(&file);
    let mut iter = reader.new_iterator_by_pos().unwrap();
    iter.seek_to_ordinal(129).unwrap();
    assert_eq!(iter.get_next_values(1).unwrap(), vec![values[129]]);

    let options = ReaderOptions {
        max_index_depth: 3,
        ..ReaderOptions::default()
    };
    let reader = CFileReader::open(options, file.reader()).unwrap();
    assert!(matches!(
        reader.search_position(5),
        Err(Error::Corruption(CorruptionError::TooDeep {
            depth: 4,
            max_depth: 3
        }))
    ));
}

#[test]
fn concurrent_iterators() {
    init_test_logger();
    let values = random_values(1000);
    let file = write_file(
        &values,
        &Parameters::default()
            .with_values_per_block(13)
            .with_max_children(5),
    );
    let reader = open(&file);
    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                let mut rng = thread_rng();
                let mut iter = reader.new_iterator_by_pos().unwrap();
                for _ in 0..500 {
                    let ordinal = rng.gen_range(0..values.len());
                    let n = rng.gen_range(1..50);
                    iter.seek_to_ordinal(ordinal as u32).unwrap();
                    let expected = &values[ordinal..(ordinal + n).min(values.len())];
                    assert_eq!(iter.get_next_values(n).unwrap(), expected);
                }
            });
        }
    });
}

#[test]
fn posix_file() {
    init_test_logger();
    let values = random_values(500);
    let written = write_file(&values, &Parameters::default());
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&written.bytes).unwrap();
    file.flush().unwrap();

    let posix = PosixReader::open(file.path()).unwrap();
    assert_eq!(posix.get_size().unwrap(), written.bytes.len() as u64);
    let reader = CFileReader::open(ReaderOptions::default(), posix).unwrap();
    let mut iter = reader.new_iterator_by_pos().unwrap();
    iter.seek_to_ordinal(123).unwrap();
    assert_eq!(iter.get_next_values(100).unwrap(), &values[123..223]);
}

#[test]
fn explicit_init() {
    let file = write_file(&[1, 2, 3], &Parameters::default());
    let mut reader = CFileReader::new(
        ReaderOptions::default(),
        file.reader(),
        file.bytes.len() as u64,
    );
    assert!(!reader.is_initialized());
    reader.init().unwrap();
    assert_eq!(reader.n_rows(), 3);
}

#[test]
#[should_panic(expected = "initialized reader")]
fn init_twice() {
    let file = write_file(&[1, 2, 3], &Parameters::default());
    let mut reader = open(&file);
    let _ = reader.init();
}

#[test]
#[should_panic(expected = "before successful init")]
fn use_before_init() {
    let file = write_file(&[1, 2, 3], &Parameters::default());
    let reader = CFileReader::new(
        ReaderOptions::default(),
        file.reader(),
        file.bytes.len() as u64,
    );
    reader.n_rows();
}
