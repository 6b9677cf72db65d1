//! [FileReader] implementation over bytes held in memory.
//!
//! Useful for tests and for files that arrive already materialized, e.g. from
//! a network fetch.

use metrics::counter;
use std::sync::Arc;

use crate::{
    block::BlockLocation,
    error::StorageError,
    metrics::{describe_read_metrics, READS_FAILED, READS_SUCCESS, TOTAL_BYTES_READ},
    FileReader,
};

/// A file whose contents are an in-memory byte buffer.
#[derive(Clone, Debug)]
pub struct MemoryReader {
    data: Arc<[u8]>,
}

impl MemoryReader {
    /// Returns a reader for `data`.
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        describe_read_metrics();
        Self { data: data.into() }
    }

    /// Returns the file's contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl FileReader for MemoryReader {
    fn read_block(&self, location: BlockLocation) -> Result<Arc<[u8]>, StorageError> {
        let file_size = self.data.len() as u64;
        if !location.fits_within(file_size) {
            counter!(READS_FAILED).increment(1);
            return Err(StorageError::ShortRead {
                location,
                file_size,
            });
        }
        let start = location.offset as usize;
        let block: Arc<[u8]> = Arc::from(&self.data[start..start + location.size]);
        counter!(TOTAL_BYTES_READ).increment(block.len() as u64);
        counter!(READS_SUCCESS).increment(1);
        Ok(block)
    }

    fn get_size(&self) -> Result<u64, StorageError> {
        Ok(self.data.len() as u64)
    }
}
