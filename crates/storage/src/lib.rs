//! File abstraction for the CFile reader.
//!
//! The reader never touches the filesystem directly.  Instead it issues
//! positional reads through a [`FileReader`], which is assumed to be safe to
//! call from many threads at once without external locking.  Two
//! implementations are provided: [`MemoryReader`] for files that are already
//! in memory and [`PosixReader`] for files on a local filesystem.

use std::sync::Arc;

use crate::block::BlockLocation;
use crate::error::StorageError;

pub mod block;
pub mod error;
pub mod memory;
pub mod metrics;
#[cfg(unix)]
pub mod posixio;

pub use memory::MemoryReader;
#[cfg(unix)]
pub use posixio::PosixReader;

/// A readable file.
pub trait FileReader: Send + Sync {
    /// Reads data at `location` from the file.  If successful, the result will
    /// be exactly the requested length; that is, this API treats read past EOF
    /// as an error.
    fn read_block(&self, location: BlockLocation) -> Result<Arc<[u8]>, StorageError>;

    /// Returns the file's size in bytes.
    fn get_size(&self) -> Result<u64, StorageError>;
}

impl<R> FileReader for Arc<R>
where
    R: FileReader + ?Sized,
{
    fn read_block(&self, location: BlockLocation) -> Result<Arc<[u8]>, StorageError> {
        (**self).read_block(location)
    }

    fn get_size(&self) -> Result<u64, StorageError> {
        (**self).get_size()
    }
}
