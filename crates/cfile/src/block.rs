//! Reference-counted block contents.

use std::{fmt::Debug, ops::Deref, ops::Range, sync::Arc};

/// The raw bytes of a block read from a CFile.
///
/// Cloning a `BlockData` is cheap: clones share the same allocation, which is
/// released when the last clone is dropped.  A `BlockData` may also be a view
/// of part of another block, via [`BlockData::sub_block`].
#[derive(Clone)]
pub struct BlockData {
    owner: Arc<[u8]>,
    range: Range<usize>,
}

impl BlockData {
    /// Wraps all of `owner`.
    pub fn new(owner: Arc<[u8]>) -> Self {
        let range = 0..owner.len();
        Self { owner, range }
    }

    /// Returns the bytes of the block.
    pub fn as_slice(&self) -> &[u8] {
        &self.owner[self.range.clone()]
    }

    /// Returns a view of `range` within this block, sharing its allocation,
    /// or `None` if `range` extends past the end of the block.
    pub fn sub_block(&self, range: Range<usize>) -> Option<BlockData> {
        if range.start > range.end || range.end > self.len() {
            return None;
        }
        Some(Self {
            owner: self.owner.clone(),
            range: self.range.start + range.start..self.range.start + range.end,
        })
    }

    /// Returns true if `self` and `other` share the same allocation.
    #[cfg(test)]
    pub(crate) fn shares_allocation(&self, other: &BlockData) -> bool {
        Arc::ptr_eq(&self.owner, &other.owner)
    }
}

impl Deref for BlockData {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl Debug for BlockData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockData")
            .field("len", &self.len())
            .field("range", &self.range)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::BlockData;

    #[test]
    fn clones_share_allocation() {
        let owner: Arc<[u8]> = Arc::from(&b"0123456789"[..]);
        let block = BlockData::new(owner.clone());
        assert_eq!(Arc::strong_count(&owner), 2);

        let clone = block.clone();
        assert_eq!(Arc::strong_count(&owner), 3);
        assert!(clone.shares_allocation(&block));
        assert_eq!(clone.as_slice(), b"0123456789");

        drop(block);
        drop(clone);
        assert_eq!(Arc::strong_count(&owner), 1);
    }

    #[test]
    fn sub_blocks() {
        let block = BlockData::new(Arc::from(&b"0123456789"[..]));
        let middle = block.sub_block(2..8).unwrap();
        assert_eq!(&*middle, b"234567");
        assert!(middle.shares_allocation(&block));

        let inner = middle.sub_block(1..3).unwrap();
        assert_eq!(&*inner, b"34");
        assert_eq!(middle.sub_block(0..6).unwrap().len(), 6);
        assert!(middle.sub_block(0..7).is_none());
        assert!(middle.sub_block(6..6).unwrap().is_empty());
    }
}
