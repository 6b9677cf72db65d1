//! Writes CFiles, for tests.
use std::{io::Cursor, sync::Arc};

use binrw::BinWrite;
use cfile_storage::{FileReader, MemoryReader};
use crc32c::crc32c;

use crate::format::{
    BlockHeader, BlockPointer, DataBlockHeader, DataType, Encoding, FileFooter, FileHeader,
    FixedLen, IndexBlockHeader, IndexRoot, MagicAndLength, MetadataEntry, NodeType, Varint,
    DATA_BLOCK_MAGIC, FILE_MAGIC, INDEX_BLOCK_MAGIC, MAJOR_VERSION, MINOR_VERSION,
    POSITIONAL_INDEX,
};

/// Parameters for [`write_file`].
#[derive(Clone, Debug)]
pub(crate) struct Parameters {
    /// Maximum number of values in a data block.
    pub values_per_block: usize,
    /// Maximum number of children of an index block.
    pub max_children: usize,
    /// Whether to record the positional index in the footer.
    pub positional_index: bool,
    /// Major version to write in the header.
    pub major_version: u32,
    /// Metadata for the header.
    pub metadata: Vec<(String, String)>,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            values_per_block: 16,
            max_children: 4,
            positional_index: true,
            major_version: MAJOR_VERSION,
            metadata: Vec::new(),
        }
    }
}

impl Parameters {
    pub fn with_values_per_block(self, values_per_block: usize) -> Self {
        Self {
            values_per_block,
            ..self
        }
    }

    pub fn with_max_children(self, max_children: usize) -> Self {
        Self {
            max_children,
            ..self
        }
    }
}

/// A CFile written by [`write_file`], with the locations of its blocks.
pub(crate) struct WrittenFile {
    pub bytes: Vec<u8>,
    /// Data blocks in ordinal order.
    pub data_blocks: Vec<BlockPointer>,
    /// Index blocks, leaf level first.  The root is last.
    pub index_blocks: Vec<BlockPointer>,
}

impl WrittenFile {
    pub fn reader(&self) -> Arc<dyn FileReader> {
        Arc::new(MemoryReader::new(self.bytes.clone()))
    }

    pub fn root(&self) -> Option<BlockPointer> {
        self.index_blocks.last().copied()
    }

    /// Overwrites the bytes at `offset` within `block` with `data`, then
    /// recomputes the block's checksum so that only the contents are wrong.
    pub fn patch_block(&mut self, block: BlockPointer, offset: usize, data: &[u8]) {
        let start = block.offset as usize;
        self.bytes[start + offset..start + offset + data.len()].copy_from_slice(data);
        seal_block(&mut self.bytes[start..start + block.size as usize]);
    }
}

fn serialize<T>(value: &T) -> Vec<u8>
where
    T: for<'a> BinWrite<Args<'a> = ()>,
{
    let mut cursor = Cursor::new(Vec::new());
    value.write_le(&mut cursor).unwrap();
    cursor.into_inner()
}

fn seal_block(block: &mut [u8]) {
    let checksum = crc32c(&block[4..]).to_le_bytes();
    block[..4].copy_from_slice(checksum.as_slice());
}

fn append_block(file: &mut Vec<u8>, mut block: Vec<u8>) -> BlockPointer {
    seal_block(&mut block);
    let pointer = BlockPointer::new(file.len() as u64, block.len() as u32);
    file.extend_from_slice(&block);
    pointer
}

fn append_framed(file: &mut Vec<u8>, contents: Vec<u8>, framing_first: bool) {
    let framing = serialize(&MagicAndLength {
        magic: FILE_MAGIC,
        length: contents.len() as u32,
    });
    if framing_first {
        file.extend_from_slice(&framing);
        file.extend_from_slice(&contents);
    } else {
        file.extend_from_slice(&contents);
        file.extend_from_slice(&framing);
    }
}

fn data_block(first_ordinal: usize, values: &[u32]) -> Vec<u8> {
    let max_value = values.iter().copied().max().unwrap_or(0);
    let value_varint = Varint::from_max_value(max_value as u64);
    let mut block = serialize(&DataBlockHeader {
        header: BlockHeader::new(&DATA_BLOCK_MAGIC),
        first_ordinal: first_ordinal as u32,
        n_values: values.len() as u32,
        values_offset: DataBlockHeader::LEN as u32,
        value_varint,
    });
    block.resize(DataBlockHeader::LEN, 0);
    for &value in values {
        value_varint.put(&mut block, value as u64);
    }
    block
}

fn index_block(children: &[(u64, BlockPointer)], child_type: NodeType) -> Vec<u8> {
    let n = children.len();
    let max_of = |f: fn(&(u64, BlockPointer)) -> u64| {
        Varint::from_max_value(children.iter().map(f).max().unwrap_or(0))
    };
    let key_varint = max_of(|(key, _)| *key);
    let offset_varint = max_of(|(_, pointer)| pointer.offset);
    let size_varint = max_of(|(_, pointer)| pointer.size as u64);

    let keys_offset = IndexBlockHeader::LEN;
    let offsets_offset = keys_offset + n * key_varint.len();
    let sizes_offset = offsets_offset + n * offset_varint.len();
    let mut block = serialize(&IndexBlockHeader {
        header: BlockHeader::new(&INDEX_BLOCK_MAGIC),
        keys_offset: keys_offset as u32,
        offsets_offset: offsets_offset as u32,
        sizes_offset: sizes_offset as u32,
        n_children: n as u16,
        child_type,
        key_varint,
        offset_varint,
        size_varint,
    });
    block.resize(IndexBlockHeader::LEN, 0);
    for (key, _) in children {
        key_varint.put(&mut block, *key);
    }
    for (_, pointer) in children {
        offset_varint.put(&mut block, pointer.offset);
    }
    for (_, pointer) in children {
        size_varint.put(&mut block, pointer.size as u64);
    }
    block
}

/// Writes `values` as a CFile.
pub(crate) fn write_file(values: &[u32], parameters: &Parameters) -> WrittenFile {
    assert!(parameters.values_per_block > 0);
    assert!(parameters.max_children > 1);

    let mut bytes = Vec::new();
    let header = FileHeader {
        major_version: parameters.major_version,
        minor_version: MINOR_VERSION,
        metadata: parameters
            .metadata
            .iter()
            .map(|(key, value)| MetadataEntry {
                key: key.clone(),
                value: value.clone(),
            })
            .collect(),
    };
    append_framed(&mut bytes, serialize(&header), true);

    let mut data_blocks = Vec::new();
    let mut level = Vec::new();
    for (index, chunk) in values.chunks(parameters.values_per_block).enumerate() {
        let first_ordinal = index * parameters.values_per_block;
        let pointer = append_block(&mut bytes, data_block(first_ordinal, chunk));
        data_blocks.push(pointer);
        level.push((first_ordinal as u64, pointer));
    }

    let mut index_blocks = Vec::new();
    let mut child_type = NodeType::Data;
    while !level.is_empty() {
        let mut next_level = Vec::new();
        for children in level.chunks(parameters.max_children) {
            let pointer = append_block(&mut bytes, index_block(children, child_type));
            index_blocks.push(pointer);
            next_level.push((children[0].0, pointer));
        }
        if next_level.len() == 1 {
            break;
        }
        level = next_level;
        child_type = NodeType::Index;
    }

    let mut index_roots = Vec::new();
    if parameters.positional_index {
        if let Some(&root) = index_blocks.last() {
            index_roots.push(IndexRoot {
                identifier: POSITIONAL_INDEX.into(),
                root,
            });
        }
    }
    let footer = FileFooter {
        n_rows: values.len() as u32,
        data_type: DataType::UInt32,
        encoding: Encoding::Plain,
        index_roots,
        metadata: Vec::new(),
    };
    append_framed(&mut bytes, serialize(&footer), false);

    WrittenFile {
        bytes,
        data_blocks,
        index_blocks,
    }
}
