//! Index tree navigation.
//!
//! An index is a tree of index blocks whose leaves point to data blocks.
//! [`IndexTreeIterator`] finds the leaf entry that covers a key and walks the
//! leaf entries in key order.
use std::{fmt::Debug, io::Cursor, ops::Range, sync::Arc};

use binrw::BinRead;

use crate::{
    block::BlockData,
    format::{BlockPointer, IndexBlockHeader, NodeType},
    reader::{CFileReader, CorruptionError, Error, VarintReader},
};

/// A key type that an index can be searched by.
///
/// Keys are stored on disk as unsigned integers, so a key type must convert
/// to `u64` and, fallibly, back.
pub trait IndexKey: Copy + Ord + Debug + Into<u64> + TryFrom<u64> + Send + Sync {}

impl<K> IndexKey for K where K: Copy + Ord + Debug + Into<u64> + TryFrom<u64> + Send + Sync {}

/// A leaf-level index entry: a data block and the keys it covers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry<K> {
    /// The data block.
    pub pointer: BlockPointer,
    /// The first key in the data block.
    pub first_key: K,
    /// One past the last key in the data block.
    pub end: u64,
}

impl<K: IndexKey> IndexEntry<K> {
    /// Returns the keys covered by this entry.
    pub fn range(&self) -> Range<u64> {
        self.first_key.into()..self.end
    }
}

/// A decoded and validated index block.
struct IndexBlock<K> {
    pointer: BlockPointer,
    raw: BlockData,
    child_type: NodeType,
    keys: Vec<K>,
    child_offsets: VarintReader,
    child_sizes: VarintReader,
    /// One past the last key covered by the block.
    end: u64,
}

impl<K: IndexKey> IndexBlock<K> {
    /// Reads the index block at `pointer`, which is at `depth` in the tree
    /// (the root has depth 0).  The block covers keys `start..end`, so its
    /// first key must be `start`.
    fn read(
        reader: &CFileReader,
        pointer: BlockPointer,
        start: u64,
        end: u64,
        depth: usize,
    ) -> Result<Self, Error> {
        let max_depth = reader.options().max_index_depth;
        if depth > max_depth {
            return Err(CorruptionError::TooDeep { depth, max_depth }.into());
        }

        let raw = reader.read_block(pointer)?;
        let header = IndexBlockHeader::read_le(&mut Cursor::new(raw.as_slice()))
            .map_err(|error| CorruptionError::Binrw { pointer, error })?;
        let n_children = header.n_children as usize;
        if n_children == 0 {
            return Err(CorruptionError::EmptyIndex(pointer).into());
        }

        let key_reader = VarintReader::new(
            &raw,
            header.key_varint,
            header.keys_offset as usize,
            n_children,
        )?;
        let child_offsets = VarintReader::new(
            &raw,
            header.offset_varint,
            header.offsets_offset as usize,
            n_children,
        )?;
        let child_sizes = VarintReader::new(
            &raw,
            header.size_varint,
            header.sizes_offset as usize,
            n_children,
        )?;

        let mut keys = Vec::with_capacity(n_children);
        let mut prev = None;
        for index in 0..n_children {
            let key = key_reader.get(&raw, index);
            if (index == 0 && key != start) || key >= end {
                return Err(CorruptionError::KeyOutOfRange {
                    pointer,
                    key,
                    start,
                    end,
                }
                .into());
            }
            if let Some(prev) = prev {
                if key <= prev {
                    return Err(CorruptionError::NonmonotonicIndex {
                        pointer,
                        prev,
                        next: key,
                    }
                    .into());
                }
            }
            prev = Some(key);
            // `key < end`, so the conversion fails only if `end` is bigger
            // than any `K`.
            keys.push(K::try_from(key).map_err(|_| CorruptionError::KeyOutOfRange {
                pointer,
                key,
                start,
                end,
            })?);
        }

        Ok(Self {
            pointer,
            raw,
            child_type: header.child_type,
            keys,
            child_offsets,
            child_sizes,
            end,
        })
    }

    fn n_children(&self) -> usize {
        self.keys.len()
    }

    fn contains(&self, key: u64) -> bool {
        (self.keys[0].into()..self.end).contains(&key)
    }

    /// Returns the index of the last child whose first key is less than or
    /// equal to `key`, or 0 if there is none.
    fn find_child(&self, key: K) -> usize {
        self.keys.partition_point(|k| *k <= key).saturating_sub(1)
    }

    fn child_range(&self, index: usize) -> Range<u64> {
        let start = self.keys[index].into();
        let end = self
            .keys
            .get(index + 1)
            .map_or(self.end, |&next| next.into());
        start..end
    }

    fn child_pointer(&self, index: usize, file_size: u64) -> Result<BlockPointer, Error> {
        let child_offset = self.child_offsets.get(&self.raw, index);
        let child_size = self.child_sizes.get(&self.raw, index);
        match u32::try_from(child_size) {
            Ok(size) if size > 0 => {
                let pointer = BlockPointer::new(child_offset, size);
                if pointer
                    .location()
                    .is_ok_and(|location| location.fits_within(file_size))
                {
                    return Ok(pointer);
                }
            }
            _ => (),
        }
        Err(CorruptionError::InvalidChild {
            pointer: self.pointer,
            index,
            child_offset,
            child_size,
        }
        .into())
    }

    fn entry(&self, index: usize, file_size: u64) -> Result<IndexEntry<K>, Error> {
        Ok(IndexEntry {
            pointer: self.child_pointer(index, file_size)?,
            first_key: self.keys[index],
            end: self.child_range(index).end,
        })
    }
}

/// One level of the path from the root to the current leaf entry.
struct Level<K> {
    block: Arc<IndexBlock<K>>,
    child: usize,
}

impl<K> Clone for Level<K> {
    fn clone(&self) -> Self {
        Self {
            block: self.block.clone(),
            child: self.child,
        }
    }
}

/// Iterator over the leaf entries of an index tree.
///
/// The iterator caches the blocks on its path from the root, so nearby seeks
/// and sequential iteration read few blocks.  Cloning an iterator is cheap
/// and the clone shares the cached blocks.
pub struct IndexTreeIterator<'a, K> {
    reader: &'a CFileReader,
    root: BlockPointer,
    limit: u64,
    path: Vec<Level<K>>,
    current: Option<IndexEntry<K>>,
}

impl<K: Copy> Clone for IndexTreeIterator<'_, K> {
    fn clone(&self) -> Self {
        Self {
            reader: self.reader,
            root: self.root,
            limit: self.limit,
            path: self.path.clone(),
            current: self.current,
        }
    }
}

impl<'a, K> IndexTreeIterator<'a, K>
where
    K: IndexKey,
{
    /// Returns a new, unpositioned iterator for the index rooted at `root`.
    /// The index covers keys less than `limit`.
    pub fn new(reader: &'a CFileReader, root: BlockPointer, limit: u64) -> Self {
        Self {
            reader,
            root,
            limit,
            path: Vec::new(),
            current: None,
        }
    }

    /// Positions the iterator on the entry that covers `key`, that is, the
    /// last entry whose first key is less than or equal to `key`, and
    /// returns it.
    ///
    /// On error, the iterator is left unpositioned.
    pub fn seek_at_or_after(&mut self, key: K) -> Result<IndexEntry<K>, Error> {
        let result = self.seek_inner(key);
        if result.is_err() {
            self.path.clear();
            self.current = None;
        }
        result
    }

    fn seek_inner(&mut self, key: K) -> Result<IndexEntry<K>, Error> {
        let key_u64: u64 = key.into();
        if key_u64 >= self.limit {
            return Err(Error::OutOfRange {
                key: key_u64,
                limit: self.limit,
            });
        }

        // Reuse the deepest cached block that covers `key`.
        match self
            .path
            .iter()
            .rposition(|level| level.block.contains(key_u64))
        {
            Some(depth) => self.path.truncate(depth + 1),
            None => {
                self.path.clear();
                let root = IndexBlock::read(self.reader, self.root, 0, self.limit, 0)?;
                self.path.push(Level {
                    block: Arc::new(root),
                    child: 0,
                });
            }
        }

        let file_size = self.reader.file_size();
        loop {
            let depth = self.path.len() - 1;
            let level = &mut self.path[depth];
            let child = level.block.find_child(key);
            level.child = child;
            let block = level.block.clone();
            match block.child_type {
                NodeType::Data => {
                    let entry = block.entry(child, file_size)?;
                    if !entry.range().contains(&key_u64) {
                        return Err(CorruptionError::KeyOutOfRange {
                            pointer: block.pointer,
                            key: key_u64,
                            start: entry.range().start,
                            end: entry.range().end,
                        }
                        .into());
                    }
                    self.current = Some(entry);
                    return Ok(entry);
                }
                NodeType::Index => self.descend(&block, child, depth + 1)?,
            }
        }
    }

    /// Reads child `index` of `block`, which is at `depth`, and pushes it
    /// onto the path.
    fn descend(
        &mut self,
        block: &IndexBlock<K>,
        index: usize,
        depth: usize,
    ) -> Result<(), Error> {
        let pointer = block.child_pointer(index, self.reader.file_size())?;
        let range = block.child_range(index);
        let child = IndexBlock::read(self.reader, pointer, range.start, range.end, depth)?;
        self.path.push(Level {
            block: Arc::new(child),
            child: 0,
        });
        Ok(())
    }

    /// Advances to the next leaf entry.  Returns `Ok(false)`, leaving the
    /// iterator where it was, if the current entry is the last one.
    ///
    /// # Panic
    ///
    /// Panics if the iterator is not positioned.
    pub fn next(&mut self) -> Result<bool, Error> {
        assert!(
            self.current.is_some(),
            "IndexTreeIterator::next() called on unpositioned iterator"
        );
        let Some(depth) = self
            .path
            .iter()
            .rposition(|level| level.child + 1 < level.block.n_children())
        else {
            return Ok(false);
        };

        let result = self.advance_at(depth);
        if result.is_err() {
            self.path.clear();
            self.current = None;
        }
        result.map(|()| true)
    }

    fn advance_at(&mut self, depth: usize) -> Result<(), Error> {
        self.path.truncate(depth + 1);
        self.path[depth].child += 1;

        let file_size = self.reader.file_size();
        loop {
            let depth = self.path.len() - 1;
            let level = &self.path[depth];
            let (block, child) = (level.block.clone(), level.child);
            match block.child_type {
                NodeType::Data => {
                    self.current = Some(block.entry(child, file_size)?);
                    return Ok(());
                }
                NodeType::Index => self.descend(&block, child, depth + 1)?,
            }
        }
    }

    /// Returns the current leaf entry, or `None` if the iterator is not
    /// positioned.
    pub fn current_entry(&self) -> Option<IndexEntry<K>> {
        self.current
    }

    /// Returns the data block that the current entry points to.
    pub fn current_block_pointer(&self) -> Option<BlockPointer> {
        self.current.map(|entry| entry.pointer)
    }

    /// Returns the first key of the current entry.
    pub fn current_key(&self) -> Option<K> {
        self.current.map(|entry| entry.first_key)
    }

    /// Returns the keys covered by the current entry.
    pub fn current_range(&self) -> Option<Range<u64>> {
        self.current.map(|entry| entry.range())
    }

    /// Returns true if the iterator is positioned on an entry.
    pub fn is_positioned(&self) -> bool {
        self.current.is_some()
    }
}
