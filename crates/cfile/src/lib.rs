//! Read path for CFile columnar storage.
//!
//! A CFile stores a single column of values.  The values are divided into
//! data blocks, and a positional index maps each ordinal (row number) to the
//! data block that holds it.  Files are written once in their entirety and
//! immutable thereafter; this crate only reads them.
//!
//! # Design
//!
//! A CFile is stored as an on-disk tree, with data blocks as leaf nodes and
//! index blocks as interior nodes.  The file begins with a header and ends
//! with a footer, each framed by a magic number and a length, and the footer
//! names the root block of each index.  See [`format`] for the details.
//!
//! [`CFileReader`] opens a file, validates its framing, and serves block
//! reads.  Blocks carry [`crc32c`] checksums, which the reader verifies by
//! default.  Reads return [`BlockData`], a reference-counted view of the
//! block's bytes.
//!
//! [`IndexTreeIterator`] navigates an index tree and [`CFileIterator`] reads
//! values by ordinal on top of it.  An initialized reader may be shared by
//! any number of threads, each with its own iterators.
//!
//! The [`columnar`] module holds the copy primitives used to serialize
//! batches of column cells: compacting null bitmaps, gathering selected
//! cells, and zeroing null cells.
//!
//! # Example
//!
//! ```no_run
//! use cfile::{CFileReader, ReaderOptions};
//! use cfile_storage::PosixReader;
//!
//! let file = PosixReader::open("column.cfile")?;
//! let reader = CFileReader::open(ReaderOptions::default(), file)?;
//! let mut iter = reader.new_iterator_by_pos()?;
//! iter.seek_to_ordinal(99)?;
//! let values = iter.get_next_values(5)?;
//! # Ok::<(), cfile::Error>(())
//! ```

pub mod block;
pub mod columnar;
pub mod format;
pub mod index;
pub mod iterator;
pub mod options;
pub mod reader;

#[cfg(test)]
pub(crate) mod writer;

pub use block::BlockData;
pub use format::BlockPointer;
pub use index::{IndexEntry, IndexKey, IndexTreeIterator};
pub use iterator::CFileIterator;
pub use options::ReaderOptions;
pub use reader::{CFileReader, CorruptionError, Error, FormatError};
