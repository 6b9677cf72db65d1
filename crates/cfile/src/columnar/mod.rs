//! Columnar copy primitives.
//!
//! These routines convert between the in-memory representation of a batch of
//! column cells and a compact, serialized one.  A batch is a buffer of
//! fixed-width cells, a "non-null" bitmap with one bit per cell, and a
//! selection bitmap or list that identifies which cells to keep.  Bitmaps
//! are little-endian: cell `i` corresponds to bit `i % 8` of byte `i / 8`.
use thiserror::Error;

mod bit_writer;
mod bitmap;
mod gather;
pub mod pext;
mod zero;

pub use bitmap::{copy_non_null_bitmap, copy_non_null_bitmap_with};
pub use gather::copy_selected_rows;
pub use pext::{available_pext_methods, selected_pext_method, PextMethod};
pub use zero::zero_null_values;

/// The width of a column cell in bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CellWidth {
    /// 1 byte, e.g. `i8` or `bool`.
    W1 = 1,
    /// 2 bytes.
    W2 = 2,
    /// 4 bytes, e.g. `i32` or `f32`.
    W4 = 4,
    /// 8 bytes, e.g. `i64` or `f64`.
    W8 = 8,
    /// 16 bytes, e.g. `i128` or a string slice.
    W16 = 16,
}

impl CellWidth {
    /// Every supported width.
    pub const ALL: [CellWidth; 5] = [
        CellWidth::W1,
        CellWidth::W2,
        CellWidth::W4,
        CellWidth::W8,
        CellWidth::W16,
    ];

    /// Returns the width in bytes.
    pub const fn bytes(self) -> usize {
        self as usize
    }
}

impl TryFrom<usize> for CellWidth {
    type Error = ConfigurationError;

    fn try_from(bytes: usize) -> Result<Self, Self::Error> {
        match bytes {
            1 => Ok(CellWidth::W1),
            2 => Ok(CellWidth::W2),
            4 => Ok(CellWidth::W4),
            8 => Ok(CellWidth::W8),
            16 => Ok(CellWidth::W16),
            _ => Err(ConfigurationError::UnsupportedCellWidth(bytes)),
        }
    }
}

/// Invalid parameters for a columnar operation.
#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Cell width other than 1, 2, 4, 8, or 16 bytes.
    #[error("Unsupported cell width {0} (must be 1, 2, 4, 8, or 16 bytes).")]
    UnsupportedCellWidth(usize),
}

#[cfg(test)]
fn get_bit(bitmap: &[u8], index: usize) -> bool {
    bitmap[index / 8] & (1 << (index % 8)) != 0
}

#[cfg(test)]
fn set_bit(bitmap: &mut [u8], index: usize, value: bool) {
    if value {
        bitmap[index / 8] |= 1 << (index % 8);
    } else {
        bitmap[index / 8] &= !(1 << (index % 8));
    }
}
