//! Index levels of the sparse fanout tree.
//!
//! Level 0 has one entry per compressed block. Level N > 0 has one entry per
//! group of `fanout` level-(N-1) entries, pointing at the group's first key
//! inside level N-1's heap file. Every level's heap is the concatenation of
//! the first keys it indexes; key lengths live in the paired index file.
//!
//! ```text
//! level 0 entry (24 bytes): [heap_offset: u64][compressed_offset: u64][key_length: u32][compressed_length: u32]
//! level N entry (12 bytes): [data_offset: u64][key_length: u32]
//! ```

use crate::error::{Error, Result};
use crate::table::file::{AppendFile, RandomAccessFile};
use crate::table::search::EntrySource;
use crate::table::{heap_file_name, index_file_name};
use bytes::{Buf, BufMut};
use std::borrow::Cow;
use std::path::Path;

/// Size of a level 0 index record
pub const LEVEL0_ENTRY_SIZE: usize = 24;

/// Size of an index record above level 0
pub const UPPER_ENTRY_SIZE: usize = 12;

/// Index entry for one compressed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntry {
    /// Offset of the block's first key in the level 0 heap
    pub heap_offset: u64,
    /// Offset of the block in the compressed data file
    pub compressed_offset: u64,
    /// Length of the block's first key
    pub key_length: u32,
    /// Length of the block's compressed bytes
    pub compressed_length: u32,
}

impl BlockEntry {
    /// Encode to the fixed 24-byte layout.
    pub fn encode(&self) -> [u8; LEVEL0_ENTRY_SIZE] {
        let mut buf = [0u8; LEVEL0_ENTRY_SIZE];
        let mut out = &mut buf[..];
        out.put_u64_le(self.heap_offset);
        out.put_u64_le(self.compressed_offset);
        out.put_u32_le(self.key_length);
        out.put_u32_le(self.compressed_length);
        buf
    }

    /// Decode from the fixed 24-byte layout.
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < LEVEL0_ENTRY_SIZE {
            return Err(Error::truncated("level 0 index entry too short"));
        }
        Ok(Self {
            heap_offset: data.get_u64_le(),
            compressed_offset: data.get_u64_le(),
            key_length: data.get_u32_le(),
            compressed_length: data.get_u32_le(),
        })
    }
}

/// Index entry for one group of child entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupEntry {
    /// Offset of the group's first key in the child level's heap
    pub data_offset: u64,
    /// Length of the group's first key
    pub key_length: u32,
}

impl GroupEntry {
    /// Encode to the fixed 12-byte layout.
    pub fn encode(&self) -> [u8; UPPER_ENTRY_SIZE] {
        let mut buf = [0u8; UPPER_ENTRY_SIZE];
        let mut out = &mut buf[..];
        out.put_u64_le(self.data_offset);
        out.put_u32_le(self.key_length);
        buf
    }

    /// Decode from the fixed 12-byte layout.
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < UPPER_ENTRY_SIZE {
            return Err(Error::truncated("index entry too short"));
        }
        Ok(Self { data_offset: data.get_u64_le(), key_length: data.get_u32_le() })
    }
}

/// Fixed entry size for `level`.
pub fn entry_size(level: usize) -> usize {
    if level == 0 {
        LEVEL0_ENTRY_SIZE
    } else {
        UPPER_ENTRY_SIZE
    }
}

fn key_len_u32(key: &[u8]) -> Result<u32> {
    u32::try_from(key.len())
        .map_err(|_| Error::invalid_argument(format!("key too large: {} bytes", key.len())))
}

/// Level 0 entry whose compressed length is not known yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenBlock {
    heap_offset: u64,
    compressed_offset: u64,
    key_length: u32,
}

/// Two-step write state of level 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    Empty,
    BlockOpen(OpenBlock),
}

/// Writer side of one index level.
pub struct LevelWriter {
    level: usize,
    index: AppendFile,
    heap: AppendFile,
    entries: u64,
    block: BlockState,
}

impl LevelWriter {
    /// Create the index/heap pair for `level` of table `base` in `dir`.
    pub fn create(dir: &Path, base: &str, level: usize) -> Result<Self> {
        let index = AppendFile::create(dir.join(index_file_name(base, level)))?;
        let heap = AppendFile::create(dir.join(heap_file_name(base, level)))?;
        Ok(Self { level, index, heap, entries: 0, block: BlockState::Empty })
    }

    /// Level number
    pub fn level(&self) -> usize {
        self.level
    }

    /// Entries written, counting an open block.
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Whether a level 0 block is waiting for its compressed length.
    pub fn has_open_block(&self) -> bool {
        matches!(self.block, BlockState::BlockOpen(_))
    }

    /// Start a level 0 entry for a block beginning at `compressed_offset`.
    ///
    /// Appends `key` to the heap and returns its heap offset. The entry
    /// itself is written by [`LevelWriter::close_block`].
    pub fn open_block(&mut self, key: &[u8], compressed_offset: u64) -> Result<u64> {
        debug_assert_eq!(self.level, 0);
        if let BlockState::BlockOpen(_) = self.block {
            return Err(Error::invalid_state("previous block still open"));
        }

        let key_length = key_len_u32(key)?;
        let heap_offset = self.heap.append(key)?;
        self.block = BlockState::BlockOpen(OpenBlock { heap_offset, compressed_offset, key_length });
        self.entries += 1;
        Ok(heap_offset)
    }

    /// Complete the open block now that its compressed bytes end at
    /// `compressed_end`.
    pub fn close_block(&mut self, compressed_end: u64) -> Result<()> {
        let open = match self.block {
            BlockState::BlockOpen(open) => open,
            BlockState::Empty => return Err(Error::invalid_state("no open block")),
        };

        let length = compressed_end.checked_sub(open.compressed_offset).ok_or_else(|| {
            Error::corruption(format!(
                "block ends at {} before its start {}",
                compressed_end, open.compressed_offset
            ))
        })?;
        let compressed_length = u32::try_from(length).map_err(|_| {
            Error::invalid_argument(format!("compressed block too large: {} bytes", length))
        })?;

        let entry = BlockEntry {
            heap_offset: open.heap_offset,
            compressed_offset: open.compressed_offset,
            key_length: open.key_length,
            compressed_length,
        };
        self.index.append(&entry.encode())?;
        self.block = BlockState::Empty;
        Ok(())
    }

    /// Append a group entry whose key sits at `child_offset` in the child
    /// level's heap. Returns the key's offset in this level's heap.
    pub fn push_group(&mut self, key: &[u8], child_offset: u64) -> Result<u64> {
        debug_assert!(self.level > 0);
        let entry = GroupEntry { data_offset: child_offset, key_length: key_len_u32(key)? };
        self.index.append(&entry.encode())?;
        let heap_offset = self.heap.append(key)?;
        self.entries += 1;
        Ok(heap_offset)
    }

    /// Flush both files.
    pub fn finish(&mut self, sync: bool) -> Result<()> {
        if self.has_open_block() {
            return Err(Error::invalid_state("level 0 block left open"));
        }
        self.index.finish(sync)?;
        self.heap.finish(sync)
    }
}

/// Reader side of one index level.
#[derive(Debug)]
pub struct LevelReader {
    level: usize,
    index: RandomAccessFile,
    entries: u64,
}

impl LevelReader {
    /// Open the index file of `level`.
    pub fn open(dir: &Path, base: &str, level: usize) -> Result<Self> {
        let index = RandomAccessFile::open(dir.join(index_file_name(base, level)))?;
        let size = entry_size(level) as u64;
        if index.len() % size != 0 {
            return Err(Error::truncated(format!(
                "level {} index is {} bytes, not a multiple of {}",
                level,
                index.len(),
                size
            )));
        }
        let entries = index.len() / size;
        Ok(Self { level, index, entries })
    }

    /// Level number
    pub fn level(&self) -> usize {
        self.level
    }

    /// Number of entries in this level
    pub fn len(&self) -> u64 {
        self.entries
    }

    /// Check if the level has no entries
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    fn read_entry(&mut self, index: u64) -> Result<Vec<u8>> {
        if index >= self.entries {
            return Err(Error::corruption(format!(
                "entry {} out of range for level {} ({} entries)",
                index, self.level, self.entries
            )));
        }
        let size = entry_size(self.level);
        self.index.read_vec_at(index * size as u64, size)
    }

    /// Read a level 0 entry.
    pub fn block_entry(&mut self, index: u64) -> Result<BlockEntry> {
        debug_assert_eq!(self.level, 0);
        BlockEntry::decode(&self.read_entry(index)?)
    }

    /// Read an upper level entry.
    pub fn group_entry(&mut self, index: u64) -> Result<GroupEntry> {
        debug_assert!(self.level > 0);
        GroupEntry::decode(&self.read_entry(index)?)
    }

    /// Heap location of the key of entry `index`.
    pub fn key_location(&mut self, index: u64) -> Result<(u64, u32)> {
        if self.level == 0 {
            let entry = self.block_entry(index)?;
            Ok((entry.heap_offset, entry.key_length))
        } else {
            let entry = self.group_entry(index)?;
            Ok((entry.data_offset, entry.key_length))
        }
    }
}

/// A level's index paired with the heap holding its keys.
///
/// Level 0 keys live in level 0's heap; level N keys live in level N-1's.
pub struct LevelView<'a> {
    /// Index being searched
    pub index: &'a mut LevelReader,
    /// Heap its key offsets point into
    pub heap: &'a mut RandomAccessFile,
}

impl EntrySource for LevelView<'_> {
    fn entry_count(&self) -> u64 {
        self.index.len()
    }

    fn key_at(&mut self, index: u64) -> Result<Cow<'_, [u8]>> {
        let (offset, len) = self.index.key_location(index)?;
        Ok(Cow::Owned(self.heap.read_vec_at(offset, len as usize)?))
    }
}
