//! [FileReader] implementation using POSIX positional reads.

use metrics::{counter, histogram};
use std::{
    fs::File,
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Instant,
};
use tracing::debug;

use crate::{
    block::BlockLocation,
    error::StorageError,
    metrics::{describe_read_metrics, READS_FAILED, READS_SUCCESS, READ_LATENCY, TOTAL_BYTES_READ},
    FileReader,
};

/// A file on a local filesystem.
///
/// `pread` does not move a shared file cursor, so one `PosixReader` may be
/// used from any number of threads.
#[derive(Debug)]
pub struct PosixReader {
    file: File,
    path: PathBuf,
    /// File size.
    ///
    /// -1 if the file size is unknown.
    size: AtomicI64,
}

impl PosixReader {
    /// Opens `path` for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>, StorageError> {
        describe_read_metrics();
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|error| StorageError::Open {
            path: path.clone(),
            kind: error.kind(),
        })?;
        debug!("opened {}", path.display());
        Ok(Arc::new(Self {
            file,
            path,
            size: AtomicI64::new(-1),
        }))
    }

    /// Returns the path this reader was opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileReader for PosixReader {
    fn read_block(&self, location: BlockLocation) -> Result<Arc<[u8]>, StorageError> {
        let start = Instant::now();
        let mut buffer = vec![0u8; location.size];
        match self.file.read_exact_at(&mut buffer, location.offset) {
            Ok(()) => {
                counter!(TOTAL_BYTES_READ).increment(location.size as u64);
                counter!(READS_SUCCESS).increment(1);
                histogram!(READ_LATENCY).record(start.elapsed().as_secs_f64());
                Ok(buffer.into())
            }
            Err(e) => {
                counter!(READS_FAILED).increment(1);
                Err(e.into())
            }
        }
    }

    fn get_size(&self) -> Result<u64, StorageError> {
        let sz = self.size.load(Ordering::Relaxed);
        if sz >= 0 {
            Ok(sz as u64)
        } else {
            let sz = self.file.metadata()?.len();
            self.size.store(sz as i64, Ordering::Relaxed);
            Ok(sz)
        }
    }
}
