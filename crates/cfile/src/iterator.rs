//! Positional iteration over a column's values.
use std::{io::Cursor, ops::Range};

use binrw::BinRead;

use crate::{
    block::BlockData,
    format::{BlockPointer, DataBlockHeader},
    index::{IndexEntry, IndexTreeIterator},
    reader::{CFileReader, CorruptionError, Error, VarintReader},
};

/// A decoded and validated data block.
#[derive(Clone, Debug)]
struct DataBlock {
    pointer: BlockPointer,
    /// The block's value array.
    raw: BlockData,
    first_ordinal: u32,
    values: VarintReader,
}

impl DataBlock {
    /// Reads the data block that `entry` points to and checks that it holds
    /// exactly the ordinals that `entry` says it does.
    fn read(reader: &CFileReader, entry: &IndexEntry<u32>) -> Result<Self, Error> {
        let pointer = entry.pointer;
        let raw = reader.read_block(pointer)?;
        let header = DataBlockHeader::read_le(&mut Cursor::new(raw.as_slice()))
            .map_err(|error| CorruptionError::Binrw { pointer, error })?;

        let first = header.first_ordinal as u64;
        let end = first + header.n_values as u64;
        let expected = entry.range();
        if first != expected.start || end != expected.end {
            return Err(CorruptionError::DataBlockMismatch {
                pointer,
                first,
                end,
                expected_first: expected.start,
                expected_end: expected.end,
            }
            .into());
        }
        if header.value_varint.len() > size_of::<u32>() {
            return Err(CorruptionError::InvalidValueWidth {
                pointer,
                width: header.value_varint.len(),
            }
            .into());
        }

        // Keep only the value array, sharing the block's allocation.
        let n_values = header.n_values as usize;
        let values_offset = header.values_offset as usize;
        let values_raw = header
            .value_varint
            .len()
            .checked_mul(n_values)
            .and_then(|len| len.checked_add(values_offset))
            .and_then(|end| raw.sub_block(values_offset..end))
            .ok_or(CorruptionError::InvalidArray {
                block_size: raw.len(),
                offset: values_offset,
                count: n_values,
                each: header.value_varint.len(),
            })?;
        let values = VarintReader::new(&values_raw, header.value_varint, 0, n_values)?;
        Ok(Self {
            pointer,
            raw: values_raw,
            first_ordinal: header.first_ordinal,
            values,
        })
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn extend_values(&self, range: Range<usize>, dst: &mut Vec<u32>) {
        // Values are at most 4 bytes wide, so they always fit.
        dst.extend(range.map(|index| self.values.get(&self.raw, index) as u32));
    }
}

#[derive(Clone)]
struct Position<'a> {
    idx_iter: IndexTreeIterator<'a, u32>,
    block: DataBlock,
    /// Index within `block` of the next value to return.  Equal to
    /// `block.len()` once the block is used up.
    offset: usize,
}

/// Iterator over the values of a column by ordinal position.
///
/// A new iterator is unpositioned.  Position it with
/// [`seek_to_ordinal`](Self::seek_to_ordinal), then read values with
/// [`get_next_values`](Self::get_next_values).  If either operation fails,
/// the iterator's position does not change.
pub struct CFileIterator<'a> {
    reader: &'a CFileReader,
    root: BlockPointer,
    position: Option<Position<'a>>,
}

impl<'a> CFileIterator<'a> {
    pub(crate) fn new(reader: &'a CFileReader, root: BlockPointer) -> Self {
        Self {
            reader,
            root,
            position: None,
        }
    }

    /// Positions the iterator so that the next value read is the one at
    /// `ordinal`.
    pub fn seek_to_ordinal(&mut self, ordinal: u32) -> Result<(), Error> {
        let mut idx_iter = match &self.position {
            Some(position) => position.idx_iter.clone(),
            None => IndexTreeIterator::new(self.reader, self.root, self.reader.n_rows() as u64),
        };
        let entry = idx_iter.seek_at_or_after(ordinal)?;
        let block = match &self.position {
            Some(position) if position.block.pointer == entry.pointer => position.block.clone(),
            _ => self.read_current_data_block(&idx_iter)?,
        };
        self.position = Some(Position {
            idx_iter,
            offset: (ordinal - block.first_ordinal) as usize,
            block,
        });
        Ok(())
    }

    fn read_current_data_block(
        &self,
        idx_iter: &IndexTreeIterator<'a, u32>,
    ) -> Result<DataBlock, Error> {
        match idx_iter.current_entry() {
            Some(entry) => DataBlock::read(self.reader, &entry),
            None => Err(Error::NotSeeked),
        }
    }

    /// Returns true if the iterator has been positioned.
    pub fn is_seeked(&self) -> bool {
        self.position.is_some()
    }

    /// Returns the ordinal of the next value that
    /// [`get_next_values`](Self::get_next_values) will return.  This is the
    /// number of rows in the column once every value has been read.
    ///
    /// # Panic
    ///
    /// Panics if the iterator is not positioned.
    pub fn current_ordinal(&self) -> u32 {
        let position = self
            .position
            .as_ref()
            .expect("CFileIterator::current_ordinal() called on unpositioned iterator");
        position.block.first_ordinal + position.offset as u32
    }

    /// Reads up to `n` values starting at the current position, crossing
    /// data block boundaries as needed, and advances past them.  Fewer than
    /// `n` values are returned only at the end of the column.
    pub fn get_next_values(&mut self, n: usize) -> Result<Vec<u32>, Error> {
        let Some(position) = &self.position else {
            return Err(Error::NotSeeked);
        };
        let mut position = position.clone();
        let remaining = self.reader.n_rows() - self.current_ordinal();
        let mut values = Vec::with_capacity(n.min(remaining as usize));
        while values.len() < n {
            if position.offset == position.block.len() {
                if !position.idx_iter.next()? {
                    break;
                }
                position.block = self.read_current_data_block(&position.idx_iter)?;
                position.offset = 0;
                continue;
            }
            let take = (n - values.len()).min(position.block.len() - position.offset);
            position
                .block
                .extend_values(position.offset..position.offset + take, &mut values);
            position.offset += take;
        }
        self.position = Some(position);
        Ok(values)
    }
}
