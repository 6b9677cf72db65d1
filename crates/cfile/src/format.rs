//! # CFile format
//!
//! A CFile is a header, a sequence of variable-sized binary blocks in no
//! particular order, and a footer.  The implementation uses [`mod@binrw`] for
//! serializing and deserializing everything, configured for little-endian
//! input and output.
//!
//! ```text
//! 0                  FILE_MAGIC | header_len: u32 | FileHeader
//!                    data and index blocks
//! size - 12 - F      FileFooter (F bytes)
//! size - 12          FILE_MAGIC | footer_len: u32 (= F)
//! ```
//!
//! The header and footer are located purely by their framing, so the reader
//! validates the magic and the length of each before parsing the structure
//! inside.
//!
//! Each block begins with an 8-byte [`BlockHeader`] whose checksum covers the
//! rest of the block.  A block does not identify its own size, so any
//! reference to a block is a [`BlockPointer`] that includes the size.
//!
//! # Data blocks
//!
//! A data block consists of a [`DataBlockHeader`] followed, at
//! [`DataBlockHeader::values_offset`], by an array of
//! [`DataBlockHeader::n_values`] integers each
//! [`DataBlockHeader::value_varint`] bytes long.
//!
//! # Index blocks
//!
//! The positional index is a tree of index blocks.  An index block consists
//! of an [`IndexBlockHeader`] followed by three arrays, each with
//! [`IndexBlockHeader::n_children`] entries:
//!
//! * The first key of each child.  Keys are strictly increasing.  A child
//!   covers the keys from its first key up to, but not including, the next
//!   child's first key (or the end of the parent's range, for the last
//!   child).
//!
//! * The byte offset of each child block.
//!
//! * The size in bytes of each child block.
//!
//! All of the children of an index block have the same type, given by
//! [`IndexBlockHeader::child_type`].  The root of the tree is always an index
//! block, even when the column fits in a single data block.

use std::fmt::{Display, Formatter, Result as FmtResult};

use binrw::binrw;
use cfile_storage::block::{BlockLocation, InvalidBlockLocation};

/// Major version.  Increment this on each incompatible change.
pub const MAJOR_VERSION: u32 = 1;

/// Minor version.  Increment this on each compatible change.
pub const MINOR_VERSION: u32 = 0;

/// Magic number at the beginning and the end of every CFile.
pub const FILE_MAGIC: [u8; 8] = *b"cfile\0v1";

/// Magic number for data blocks.
pub const DATA_BLOCK_MAGIC: [u8; 4] = *b"CFDB";

/// Magic number for index blocks.
pub const INDEX_BLOCK_MAGIC: [u8; 4] = *b"CFIB";

/// Identifier of the positional (ordinal) index in the footer.
pub const POSITIONAL_INDEX: &str = "posidx";

pub(crate) trait FixedLen {
    const LEN: usize;
}

/// Location of a block within a CFile.
#[binrw]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct BlockPointer {
    /// Byte offset of the block from the start of the file.
    pub offset: u64,

    /// Size of the block in bytes.
    pub size: u32,
}

impl BlockPointer {
    /// Returns a pointer to `size` bytes at `offset`.
    pub const fn new(offset: u64, size: u32) -> Self {
        Self { offset, size }
    }

    /// Converts this pointer into a location that the storage layer can read.
    pub fn location(&self) -> Result<BlockLocation, InvalidBlockLocation> {
        BlockLocation::new(self.offset, self.size as usize)
    }
}

impl Display for BlockPointer {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{} bytes at offset {}", self.size, self.offset)
    }
}

/// Framing that precedes the header and follows the footer.
#[binrw]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MagicAndLength {
    /// Must be [`FILE_MAGIC`].
    pub magic: [u8; 8],

    /// Length in bytes of the structure that this framing delimits.
    pub length: u32,
}

impl FixedLen for MagicAndLength {
    const LEN: usize = 12;
}

/// A length-prefixed string.
#[binrw]
#[derive(Clone, Debug, PartialEq, Eq)]
struct Blob {
    #[bw(calc(data.len() as u16))]
    len: u16,

    #[br(count = len)]
    data: Vec<u8>,
}

impl From<&String> for Blob {
    fn from(value: &String) -> Self {
        Self {
            data: value.as_bytes().to_vec(),
        }
    }
}

/// A key-value metadata pair stored in the header or the footer.
#[binrw]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetadataEntry {
    /// Key.
    #[br(try_map = |blob: Blob| String::from_utf8(blob.data))]
    #[bw(map = Blob::from)]
    pub key: String,

    /// Value.
    #[br(try_map = |blob: Blob| String::from_utf8(blob.data))]
    #[bw(map = Blob::from)]
    pub value: String,
}

/// File header, which follows the leading [`MagicAndLength`].
#[binrw]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileHeader {
    /// Must be [`MAJOR_VERSION`].
    pub major_version: u32,

    /// Any minor version is readable.
    pub minor_version: u32,

    #[bw(calc(metadata.len() as u16))]
    n_metadata: u16,

    /// Free-form metadata.
    #[br(count = n_metadata)]
    pub metadata: Vec<MetadataEntry>,
}

/// Type of the values stored in a column.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[binrw]
#[brw(repr(u8))]
pub enum DataType {
    /// Unsigned 32-bit integers.
    UInt32 = 1,
}

/// How values are represented inside data blocks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[binrw]
#[brw(repr(u8))]
pub enum Encoding {
    /// Fixed-width little-endian integers, with the width chosen per block.
    Plain = 1,
}

/// A named index root.
#[binrw]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexRoot {
    /// Identifier, e.g. [`POSITIONAL_INDEX`].
    #[br(try_map = |blob: Blob| String::from_utf8(blob.data))]
    #[bw(map = Blob::from)]
    pub identifier: String,

    /// Root index block.
    pub root: BlockPointer,
}

/// File footer, which precedes the trailing [`MagicAndLength`].
#[binrw]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileFooter {
    /// Number of rows (values) in the column.
    pub n_rows: u32,

    /// Type of the column's values.
    pub data_type: DataType,

    /// Encoding of the column's data blocks.
    pub encoding: Encoding,

    #[bw(calc(index_roots.len() as u16))]
    n_index_roots: u16,

    /// Root blocks of the file's indexes.
    #[br(count = n_index_roots)]
    pub index_roots: Vec<IndexRoot>,

    #[bw(calc(metadata.len() as u16))]
    n_metadata: u16,

    /// Free-form metadata.
    #[br(count = n_metadata)]
    pub metadata: Vec<MetadataEntry>,
}

impl FileFooter {
    /// Returns the root of the index named `identifier`, if there is one.
    pub fn index_root(&self, identifier: &str) -> Option<BlockPointer> {
        self.index_roots
            .iter()
            .find(|root| root.identifier == identifier)
            .map(|root| root.root)
    }
}

/// 8-byte header at the beginning of each block.
#[binrw]
#[derive(Debug)]
pub struct BlockHeader {
    /// 32-bit [`crc32c`] checksum of the remainder of the block.
    pub checksum: u32,

    /// Magic number.
    pub magic: [u8; 4],
}

impl BlockHeader {
    #[cfg(test)]
    pub(crate) fn new(magic: &[u8; 4]) -> Self {
        Self {
            checksum: 0,
            magic: *magic,
        }
    }
}

impl FixedLen for BlockHeader {
    const LEN: usize = 8;
}

/// Type of a node in the index tree.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[binrw]
#[brw(repr(u8))]
pub enum NodeType {
    /// A data node that begins with a [`DataBlockHeader`].
    Data = 0,

    /// An index node that begins with a [`IndexBlockHeader`].
    Index = 1,
}

/// Header for each data block.
#[binrw]
pub struct DataBlockHeader {
    /// Block header with `CFDB` magic.
    #[brw(assert(header.magic == DATA_BLOCK_MAGIC, "data block has bad magic"))]
    pub header: BlockHeader,

    /// Ordinal of the first value in the block.
    pub first_ordinal: u32,

    /// Number of values in the block.
    pub n_values: u32,

    /// Offset, in bytes from the beginning of the block, to the values.
    pub values_offset: u32,

    /// Width of each value.
    #[brw(pad_after = 3)]
    pub value_varint: Varint,
}

impl FixedLen for DataBlockHeader {
    const LEN: usize = 24;
}

/// Index block header.
#[binrw]
pub struct IndexBlockHeader {
    /// Block header with `CFIB` magic.
    #[brw(assert(header.magic == INDEX_BLOCK_MAGIC, "index block has bad magic"))]
    pub header: BlockHeader,

    /// Offset, in bytes from the beginning of the block, to the child keys.
    pub keys_offset: u32,

    /// Offset, in bytes from the beginning of the block, to the child
    /// offsets.
    pub offsets_offset: u32,

    /// Offset, in bytes from the beginning of the block, to the child sizes.
    pub sizes_offset: u32,

    /// Number of child nodes.
    pub n_children: u16,

    /// Child node type.  All of the child nodes have the same type.
    pub child_type: NodeType,

    /// The representation of the child keys.
    pub key_varint: Varint,

    /// The representation of the child offsets.
    pub offset_varint: Varint,

    /// The representation of the child sizes.
    #[brw(pad_after = 6)]
    pub size_varint: Varint,
}

impl FixedLen for IndexBlockHeader {
    const LEN: usize = 32;
}

/// Variable-length integer identifier.
///
/// A `Varint` identifies the size of integers in arrays.  This saves space when
/// the integers are small, which is common in practice.
///
/// Arrays of `Varint`s values aren't aligned.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[binrw]
#[brw(repr(u8))]
pub enum Varint {
    /// 8-bit integer.
    B8 = 1,
    /// 16-bit integer.
    B16 = 2,
    /// 24-bit integer.
    B24 = 3,
    /// 32-bit integer.
    B32 = 4,
    /// 48-bit integer.
    B48 = 6,
    /// 64-bit integer.
    B64 = 8,
}

impl Varint {
    #[cfg(test)]
    pub(crate) fn from_max_value(max_value: u64) -> Varint {
        #[allow(clippy::unusual_byte_groupings, clippy::match_overlapping_arm)]
        match max_value {
            ..=0xff => Varint::B8,
            ..=0xffff => Varint::B16,
            ..=0xffff_ff => Varint::B24,
            ..=0xffff_ffff => Varint::B32,
            ..=0xffff_ffff_ffff => Varint::B48,
            _ => Varint::B64,
        }
    }

    /// Returns the number of bytes in each integer.
    pub fn len(&self) -> usize {
        *self as usize
    }

    #[cfg(test)]
    pub(crate) fn put(&self, dst: &mut Vec<u8>, value: u64) {
        dst.extend_from_slice(&value.to_le_bytes()[..self.len()]);
    }

    pub(crate) fn get(&self, src: &[u8], offset: usize) -> u64 {
        let mut raw = [0u8; 8];
        raw[..self.len()].copy_from_slice(&src[offset..offset + self.len()]);
        u64::from_le_bytes(raw)
    }
}
