use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::io::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;

use crate::block::BlockLocation;

/// An error that can occur when reading from a file.
#[derive(Clone, Error, Debug, Serialize, PartialEq, Eq)]
pub enum StorageError {
    /// I/O error.
    #[error("{0}")]
    #[serde(serialize_with = "serialize_io_error")]
    StdIo(ErrorKind),

    /// Read ended before the full request length.
    #[error("Reading {location} would extend past the end of a {file_size}-byte file.")]
    ShortRead {
        /// Requested block.
        location: BlockLocation,
        /// Size of the file.
        file_size: u64,
    },

    /// The file could not be opened.
    #[error("Unable to open {}: {kind}", .path.display())]
    Open {
        /// Path that was being opened.
        path: PathBuf,
        /// Underlying error.
        #[serde(serialize_with = "serialize_io_error")]
        kind: ErrorKind,
    },
}

impl From<std::io::Error> for StorageError {
    fn from(value: std::io::Error) -> Self {
        Self::StdIo(value.kind())
    }
}

fn serialize_io_error<S>(kind: &ErrorKind, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut ser = serializer.serialize_struct("IOError", 1)?;
    ser.serialize_field("kind", &kind.to_string())?;
    ser.end()
}

impl StorageError {
    /// Returns the closest [`ErrorKind`] for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::StdIo(kind) => *kind,
            StorageError::ShortRead { .. } => ErrorKind::UnexpectedEof,
            StorageError::Open { kind, .. } => *kind,
        }
    }
}
