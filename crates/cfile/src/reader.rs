//! CFile reader.
//!
//! [`CFileReader`] is the entry point for reading a CFile.  It validates and
//! parses the file's framing, header, and footer, then serves checksummed
//! block reads to [`IndexTreeIterator`] and [`CFileIterator`].
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    io::Cursor,
    sync::Arc,
};

use binrw::{BinRead, Error as BinError};
use cfile_storage::{block::BlockLocation, error::StorageError, FileReader};
use crc32c::crc32c;
use metrics::counter;
use thiserror::Error as ThisError;
use tracing::{debug, info, warn};

use crate::{
    block::BlockData,
    format::{
        BlockHeader, BlockPointer, FileFooter, FileHeader, FixedLen, MagicAndLength, Varint,
        FILE_MAGIC, MAJOR_VERSION, POSITIONAL_INDEX,
    },
    index::IndexTreeIterator,
    iterator::CFileIterator,
    options::ReaderOptions,
};
use cfile_storage::metrics::CHECKSUM_FAILURES;

#[cfg(test)]
mod test;

/// Any kind of error encountered reading a CFile.
#[derive(ThisError, Debug)]
pub enum Error {
    /// The file's framing, header, or footer is invalid.
    #[error("Invalid CFile: {0}")]
    Format(#[from] FormatError),

    /// A block within the file is invalid.
    #[error("Corrupt CFile: {0}")]
    Corruption(#[from] CorruptionError),

    /// Errors reading the file.
    #[error("Error accessing storage: {0}")]
    Storage(#[from] StorageError),

    /// A seek targeted a key at or beyond the end of the indexed range.
    #[error("Key {key} is out of range for an index covering keys less than {limit}.")]
    OutOfRange {
        /// Requested key.
        key: u64,
        /// Exclusive upper bound of the indexed keys.
        limit: u64,
    },

    /// The file does not have the requested index.
    #[error("File has no index named {0:?}.")]
    NotFound(String),

    /// Values were requested from an iterator that has not been positioned.
    #[error("Iterator must be positioned with seek_to_ordinal() before reading values.")]
    NotSeeked,
}

/// The part of a CFile that a [`FormatError`] concerns.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Section {
    /// The header at the start of the file.
    Header,
    /// The footer at the end of the file.
    Footer,
}

impl Display for Section {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Section::Header => write!(f, "header"),
            Section::Footer => write!(f, "footer"),
        }
    }
}

/// Errors that indicate a problem with the framing, header, or footer of a
/// CFile.
#[derive(ThisError, Debug)]
pub enum FormatError {
    /// File is too small to contain a header and a footer.
    #[error("{file_size}-byte file is too small to be a CFile (at least {min_size} bytes are needed).")]
    FileTooSmall {
        /// Actual file size.
        file_size: u64,
        /// Smallest possible CFile.
        min_size: u64,
    },

    /// The magic number that frames the header or footer is wrong.
    #[error("The {section} of the file has bad magic {magic:?}.")]
    BadMagic {
        /// Header or footer.
        section: Section,
        /// Magic number found.
        magic: [u8; 8],
    },

    /// The length of the header or footer does not fit in the file.
    #[error("The {section} claims to be {length} bytes long but at most {available} bytes are available.")]
    BadLength {
        /// Header or footer.
        section: Section,
        /// Claimed length.
        length: u32,
        /// Bytes available for the section.
        available: u64,
    },

    /// The header or footer parsed but did not use all of its bytes.
    #[error("The {section} is {length} bytes long but only {parsed} bytes were parsed.")]
    TrailingBytes {
        /// Header or footer.
        section: Section,
        /// Length of the section.
        length: usize,
        /// Bytes consumed by parsing.
        parsed: usize,
    },

    /// The file has a major version that this reader does not understand.
    #[error("File has unsupported version {major}.{minor} (expected major version {expected_major}).")]
    UnsupportedVersion {
        /// Major version in file.
        major: u32,
        /// Minor version in file.
        minor: u32,
        /// Supported major version ([`MAJOR_VERSION`]).
        expected_major: u32,
    },

    /// [`mod@binrw`] could not parse the header or footer.
    #[error("Failed to parse {section}: {error}")]
    Binrw {
        /// Header or footer.
        section: Section,
        /// Underlying error.
        error: BinError,
    },
}

/// Errors that indicate a problem with a block inside a CFile.
#[derive(ThisError, Debug)]
pub enum CorruptionError {
    /// Block pointer is empty or its end overflows.
    #[error("Block pointer ({0}) is invalid.")]
    InvalidBlockPointer(BlockPointer),

    /// Block extends past the end of the file.
    #[error("Block ({pointer}) extends past the end of the {file_size}-byte file.")]
    BlockOutOfBounds {
        /// Block pointer.
        pointer: BlockPointer,
        /// File size.
        file_size: u64,
    },

    /// Block is too small to hold a block header.
    #[error("Block ({0}) is too small to contain a block header.")]
    BlockTooSmall(BlockPointer),

    /// Block has invalid checksum.
    #[error(
        "Block ({pointer}) with magic {magic:?} has invalid checksum {checksum:#x} (expected {computed_checksum:#x})"
    )]
    InvalidChecksum {
        /// Block pointer.
        pointer: BlockPointer,
        /// Block magic,
        magic: [u8; 4],
        /// Checksum in block.
        checksum: u32,
        /// Checksum that block should have.
        computed_checksum: u32,
    },

    /// [`mod@binrw`] reported a format violation inside a block.
    #[error("Block ({pointer}) could not be parsed: {error}")]
    Binrw {
        /// Block pointer.
        pointer: BlockPointer,
        /// Underlying error.
        error: BinError,
    },

    /// Array overflows block bounds.
    #[error("{count}-element array of {each}-byte elements starting at offset {offset} within block overflows {block_size}-byte block")]
    InvalidArray {
        /// Block size.
        block_size: usize,
        /// Starting byte offset in block.
        offset: usize,
        /// Number of array elements.
        count: usize,
        /// Array element size.
        each: usize,
    },

    /// Index is too deep.
    #[error("Index nesting depth {depth} exceeds maximum ({max_depth}).")]
    TooDeep {
        /// Depth.
        depth: usize,
        /// Maximum depth.
        max_depth: usize,
    },

    /// Index block has no children.
    #[error("Index block ({0}) is empty")]
    EmptyIndex(BlockPointer),

    /// Index keys aren't strictly increasing.
    #[error("Index block ({pointer}) has nonmonotonic keys ({prev} then {next}).")]
    NonmonotonicIndex {
        /// Block pointer.
        pointer: BlockPointer,
        /// Previous key.
        prev: u64,
        /// Next key (which should be bigger than `prev`).
        next: u64,
    },

    /// Index key lies outside the range that the block's parent assigns it.
    #[error("Index block ({pointer}) has key {key} outside its range {start}..{end}.")]
    KeyOutOfRange {
        /// Block pointer.
        pointer: BlockPointer,
        /// Offending key.
        key: u64,
        /// First key that the parent assigns to the block.
        start: u64,
        /// Exclusive end of the range that the parent assigns to the block.
        end: u64,
    },

    /// Invalid child in index block.  At least one of `child_offset` or
    /// `child_size` is invalid.
    #[error("Index block ({pointer}) has child {index} with invalid offset {child_offset} or size {child_size}.")]
    InvalidChild {
        /// Block pointer.
        pointer: BlockPointer,
        /// Index of child within block.
        index: usize,
        /// Child offset.
        child_offset: u64,
        /// Child size.
        child_size: u64,
    },

    /// Data block does not cover the rows that the index says it does.
    #[error("Data block ({pointer}) contains rows {first}..{end} but the index expects rows {expected_first}..{expected_end}.")]
    DataBlockMismatch {
        /// Block pointer.
        pointer: BlockPointer,
        /// First ordinal in the block.
        first: u64,
        /// Exclusive end of the ordinals in the block.
        end: u64,
        /// First ordinal according to the index.
        expected_first: u64,
        /// Exclusive end of the ordinals according to the index.
        expected_end: u64,
    },

    /// Data block values are too wide for the column's data type.
    #[error("Data block ({pointer}) stores values in {width} bytes, which is too wide.")]
    InvalidValueWidth {
        /// Block pointer.
        pointer: BlockPointer,
        /// Width of each value in bytes.
        width: usize,
    },
}

/// An array of [`Varint`]s within a block, validated to lie inside it.
#[derive(Clone, Debug)]
pub(crate) struct VarintReader {
    varint: Varint,
    start: usize,
    count: usize,
}

impl VarintReader {
    pub(crate) fn new(
        raw: &[u8],
        varint: Varint,
        start: usize,
        count: usize,
    ) -> Result<Self, Error> {
        let block_size = raw.len();
        match varint
            .len()
            .checked_mul(count)
            .and_then(|len| len.checked_add(start))
        {
            Some(end) if end <= block_size => Ok(Self {
                varint,
                start,
                count,
            }),
            _ => Err(CorruptionError::InvalidArray {
                block_size,
                offset: start,
                count,
                each: varint.len(),
            }
            .into()),
        }
    }

    pub(crate) fn get(&self, src: &[u8], index: usize) -> u64 {
        debug_assert!(index < self.count);
        self.varint.get(src, self.start + self.varint.len() * index)
    }

    pub(crate) fn len(&self) -> usize {
        self.count
    }
}

enum State {
    Uninitialized,
    Initialized {
        header: FileHeader,
        footer: FileFooter,
    },
}

/// Reader for a single-column CFile.
///
/// Construct a reader with [`CFileReader::new`] and then call
/// [`CFileReader::init`], or do both at once with [`CFileReader::open`].
/// Everything else requires a successfully initialized reader, and panics
/// otherwise.
///
/// An initialized reader is immutable, so it may be shared among threads.
/// Each thread should create its own iterators.
pub struct CFileReader {
    options: ReaderOptions,
    file: Arc<dyn FileReader>,
    file_size: u64,
    state: State,
}

impl CFileReader {
    /// Returns a new reader for `file`, which is `file_size` bytes long.  The
    /// reader must be initialized with [`init`](Self::init) before use.
    pub fn new(options: ReaderOptions, file: Arc<dyn FileReader>, file_size: u64) -> Self {
        Self {
            options,
            file,
            file_size,
            state: State::Uninitialized,
        }
    }

    /// Creates and initializes a reader for `file`.
    pub fn open(options: ReaderOptions, file: Arc<dyn FileReader>) -> Result<Self, Error> {
        let file_size = file.get_size()?;
        let mut reader = Self::new(options, file, file_size);
        reader.init()?;
        Ok(reader)
    }

    /// Reads and validates the header and footer.
    ///
    /// # Panic
    ///
    /// Panics if the reader has already been initialized.
    pub fn init(&mut self) -> Result<(), Error> {
        assert!(
            matches!(self.state, State::Uninitialized),
            "CFileReader::init() called on an initialized reader"
        );

        let framing_len = MagicAndLength::LEN as u64;
        let min_size = 2 * framing_len;
        if self.file_size < min_size {
            return Err(FormatError::FileTooSmall {
                file_size: self.file_size,
                min_size,
            }
            .into());
        }

        let footer_len = self.read_framing(Section::Footer, self.file_size - framing_len)?;
        let footer_available = self.file_size - min_size;
        if footer_len as u64 > footer_available {
            return Err(FormatError::BadLength {
                section: Section::Footer,
                length: footer_len,
                available: footer_available,
            }
            .into());
        }
        let footer_offset = self.file_size - framing_len - footer_len as u64;

        let header_len = self.read_framing(Section::Header, 0)?;
        let header_available = footer_available - footer_len as u64;
        if header_len as u64 > header_available {
            return Err(FormatError::BadLength {
                section: Section::Header,
                length: header_len,
                available: header_available,
            }
            .into());
        }

        let header: FileHeader = self.read_section(Section::Header, framing_len, header_len)?;
        if header.major_version != MAJOR_VERSION {
            return Err(FormatError::UnsupportedVersion {
                major: header.major_version,
                minor: header.minor_version,
                expected_major: MAJOR_VERSION,
            }
            .into());
        }
        let footer: FileFooter = self.read_section(Section::Footer, footer_offset, footer_len)?;

        info!(
            "opened {}-byte CFile version {}.{} with {} rows",
            self.file_size, header.major_version, header.minor_version, footer.n_rows
        );
        self.state = State::Initialized { header, footer };
        Ok(())
    }

    /// Reads the magic and length at `offset` and returns the length.
    fn read_framing(&self, section: Section, offset: u64) -> Result<u32, Error> {
        let raw = self.read_raw(offset, MagicAndLength::LEN as u32)?;
        let framing = MagicAndLength::read_le(&mut Cursor::new(&raw[..]))
            .map_err(|error| FormatError::Binrw { section, error })?;
        if framing.magic != FILE_MAGIC {
            return Err(FormatError::BadMagic {
                section,
                magic: framing.magic,
            }
            .into());
        }
        Ok(framing.length)
    }

    fn read_section<T>(&self, section: Section, offset: u64, length: u32) -> Result<T, Error>
    where
        T: for<'a> BinRead<Args<'a> = ()>,
    {
        let raw = self.read_raw(offset, length)?;
        let mut cursor = Cursor::new(&raw[..]);
        let value =
            T::read_le(&mut cursor).map_err(|error| FormatError::Binrw { section, error })?;
        let parsed = cursor.position() as usize;
        if parsed != raw.len() {
            return Err(FormatError::TrailingBytes {
                section,
                length: raw.len(),
                parsed,
            }
            .into());
        }
        Ok(value)
    }

    fn read_raw(&self, offset: u64, length: u32) -> Result<Arc<[u8]>, Error> {
        if length == 0 {
            return Ok(Arc::from(&[][..]));
        }
        let location = BlockLocation {
            offset,
            size: length as usize,
        };
        Ok(self.file.read_block(location)?)
    }

    fn state(&self) -> (&FileHeader, &FileFooter) {
        match &self.state {
            State::Initialized { header, footer } => (header, footer),
            State::Uninitialized => panic!("CFileReader used before successful init()"),
        }
    }

    /// Returns the file header.
    pub fn header(&self) -> &FileHeader {
        self.state().0
    }

    /// Returns the file footer.
    pub fn footer(&self) -> &FileFooter {
        self.state().1
    }

    /// Returns true if [`init`](Self::init) has succeeded.
    pub fn is_initialized(&self) -> bool {
        matches!(self.state, State::Initialized { .. })
    }

    /// Returns the number of rows in the column.
    pub fn n_rows(&self) -> u32 {
        self.footer().n_rows
    }

    /// Returns the size of the file in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Returns the reader's options.
    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    /// Returns the root block of the index named `identifier`.
    pub fn index_root_block(&self, identifier: &str) -> Result<BlockPointer, Error> {
        self.footer()
            .index_root(identifier)
            .ok_or_else(|| Error::NotFound(identifier.into()))
    }

    /// Reads the block at `pointer`.
    ///
    /// A pointer that does not lie within the file is reported as corruption
    /// without reading anything.  If checksum verification is enabled, the
    /// block's checksum is verified before it is returned.
    pub fn read_block(&self, pointer: BlockPointer) -> Result<BlockData, Error> {
        let location = pointer
            .location()
            .map_err(|_| CorruptionError::InvalidBlockPointer(pointer))?;
        if !location.fits_within(self.file_size) {
            return Err(CorruptionError::BlockOutOfBounds {
                pointer,
                file_size: self.file_size,
            }
            .into());
        }
        if location.size < BlockHeader::LEN {
            return Err(CorruptionError::BlockTooSmall(pointer).into());
        }

        debug!("reading block ({pointer})");
        let raw = self.file.read_block(location)?;
        if self.options.verify_checksums {
            let checksum = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
            let computed_checksum = crc32c(&raw[4..]);
            if checksum != computed_checksum {
                counter!(CHECKSUM_FAILURES).increment(1);
                warn!("block ({pointer}) failed checksum verification");
                return Err(CorruptionError::InvalidChecksum {
                    pointer,
                    magic: [raw[4], raw[5], raw[6], raw[7]],
                    checksum,
                    computed_checksum,
                }
                .into());
            }
        }
        Ok(BlockData::new(raw))
    }

    /// Returns a new, unpositioned iterator over the column's values by
    /// ordinal position.
    pub fn new_iterator_by_pos(&self) -> Result<CFileIterator<'_>, Error> {
        let root = self.index_root_block(POSITIONAL_INDEX)?;
        Ok(CFileIterator::new(self, root))
    }

    /// Returns the data block that contains `ordinal` and the ordinal of the
    /// first value in that block.
    pub fn search_position(&self, ordinal: u32) -> Result<(BlockPointer, u32), Error> {
        let n_rows = self.n_rows();
        if ordinal >= n_rows {
            return Err(Error::OutOfRange {
                key: ordinal as u64,
                limit: n_rows as u64,
            });
        }
        let root = self.index_root_block(POSITIONAL_INDEX)?;
        let mut iter = IndexTreeIterator::<u32>::new(self, root, n_rows as u64);
        let entry = iter.seek_at_or_after(ordinal)?;
        Ok((entry.pointer, entry.first_key))
    }
}
