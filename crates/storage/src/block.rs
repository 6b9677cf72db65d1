//! Byte ranges within a file.

use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A block that can be read from a [`FileReader`](crate::FileReader).
///
/// Blocks have no alignment requirement.  Any nonempty range whose end fits
/// in a `u64` is a valid location.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockLocation {
    /// Byte offset of the start of the block.
    pub offset: u64,

    /// Size of the block in bytes.
    pub size: usize,
}

/// A [`BlockLocation`] that could not be constructed.
#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
#[error("Invalid block location: {size} bytes at offset {offset}")]
pub struct InvalidBlockLocation {
    /// Requested offset.
    pub offset: u64,

    /// Requested size.
    pub size: usize,
}

impl BlockLocation {
    /// Returns a new location for `size` bytes at `offset`, or an error if the
    /// block would be empty or its end would overflow.
    pub fn new(offset: u64, size: usize) -> Result<Self, InvalidBlockLocation> {
        if size == 0 || offset.checked_add(size as u64).is_none() {
            Err(InvalidBlockLocation { offset, size })
        } else {
            Ok(Self { offset, size })
        }
    }

    /// Returns the byte offset just past the end of the block.
    pub fn after(&self) -> u64 {
        self.offset + self.size as u64
    }

    /// Returns true if the block lies entirely within a file of `file_size`
    /// bytes.
    pub fn fits_within(&self, file_size: u64) -> bool {
        self.after() <= file_size
    }
}

impl Display for BlockLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{} bytes at offset {}", self.size, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::{BlockLocation, InvalidBlockLocation};

    #[test]
    fn rejects_empty_and_overflowing_blocks() {
        assert_eq!(
            BlockLocation::new(10, 0),
            Err(InvalidBlockLocation {
                offset: 10,
                size: 0
            })
        );
        assert!(BlockLocation::new(u64::MAX, 1).is_err());
        let location = BlockLocation::new(100, 28).unwrap();
        assert_eq!(location.after(), 128);
        assert!(location.fits_within(128));
        assert!(!location.fits_within(127));
        assert_eq!(location.to_string(), "28 bytes at offset 100");
    }
}
