//! Random-access table seeker.
//!
//! Descends the index tree from the top level, binary searching each level
//! with positional reads, then inflates (or fetches from its LRU cache) the
//! one block that can hold the answer.

use crate::cache::{BlockCache, CacheStats};
use crate::config::Options;
use crate::error::{Error, Result};
use crate::table::codec::inflate_block;
use crate::table::file::RandomAccessFile;
use crate::table::frame;
use crate::table::index::{BlockEntry, LevelReader, LevelView};
use crate::table::search::{self, first_satisfying, lower_bound};
use crate::table::{heap_file_name, info_file_name, Metadata};
use bytes::Bytes;
use std::ops::Range;
use std::path::Path;

/// An owned key-value record.
pub type Entry = (Vec<u8>, Vec<u8>);

/// A decompressed block with its record boundaries.
#[derive(Debug)]
struct DecodedBlock {
    data: Bytes,
    records: Vec<(Range<usize>, Range<usize>)>,
}

impl DecodedBlock {
    fn parse(data: Vec<u8>, expected: usize) -> Result<Self> {
        let data = Bytes::from(data);
        let mut records = Vec::with_capacity(expected);
        let mut pos = 0;

        while pos < data.len() {
            let (key, value, used) = frame::decode(&data[pos..])?;
            let key_start = pos + frame::FRAME_HEADER_SIZE;
            let value_start = key_start + key.len();
            records.push((key_start..value_start, value_start..value_start + value.len()));
            pos += used;
        }

        if records.len() != expected {
            return Err(Error::corruption(format!(
                "block holds {} records, expected {}",
                records.len(),
                expected
            )));
        }
        Ok(Self { data, records })
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn key(&self, i: usize) -> &[u8] {
        &self.data[self.records[i].0.clone()]
    }

    fn entry(&self, i: usize) -> Entry {
        let (key, value) = &self.records[i];
        (self.data[key.clone()].to_vec(), self.data[value.clone()].to_vec())
    }
}

/// TableSeeker finds records in a closed table by monotonic predicate.
///
/// Usage:
/// ```no_run
/// use blocktable::{Options, TableSeeker};
///
/// let mut seeker = TableSeeker::open("./tables".as_ref(), "t", &Options::default()).unwrap();
/// if let Some((key, value)) = seeker.find(|k| k >= b"key1".as_slice()).unwrap() {
///     println!("Found: {:?} => {:?}", key, value);
/// }
/// ```
pub struct TableSeeker {
    meta: Metadata,
    data: RandomAccessFile,
    /// Index levels, level 0 first
    levels: Vec<LevelReader>,
    /// Heap files, level 0 first
    heaps: Vec<RandomAccessFile>,
    cache: BlockCache<u64, DecodedBlock>,
}

impl TableSeeker {
    /// Open table `base` in `dir` read-only.
    pub fn open(dir: &Path, base: &str, options: &Options) -> Result<Self> {
        options.validate()?;
        let meta = Metadata::read_from(&dir.join(info_file_name(base)))?;
        let data = RandomAccessFile::open(dir.join(base))?;

        let level_count = meta.index_levels as usize;
        let mut levels = Vec::with_capacity(level_count);
        let mut heaps = Vec::with_capacity(level_count);
        for level in 0..level_count {
            levels.push(LevelReader::open(dir, base, level)?);
            heaps.push(RandomAccessFile::open(dir.join(heap_file_name(base, level)))?);
        }

        let seeker = Self { meta, data, levels, heaps, cache: BlockCache::new(options.block_cache_blocks) };
        seeker.check_shape()?;

        log::debug!(
            "Opened table {}: {} entries in {} blocks, {} index levels",
            base,
            seeker.meta.entries,
            seeker.block_count(),
            level_count
        );
        Ok(seeker)
    }

    /// Entry counts of every level must match the fanout tree the metadata
    /// describes.
    fn check_shape(&self) -> Result<()> {
        let fanout = self.meta.fanout as u64;
        let blocks = self.levels[0].len();
        if blocks != self.meta.block_count() {
            return Err(Error::corruption(format!(
                "level 0 has {} entries, metadata implies {}",
                blocks,
                self.meta.block_count()
            )));
        }

        for level in 1..self.levels.len() {
            let expected = self.levels[level - 1].len().div_ceil(fanout);
            if self.levels[level].len() != expected {
                return Err(Error::corruption(format!(
                    "level {} has {} entries, expected {}",
                    level,
                    self.levels[level].len(),
                    expected
                )));
            }
        }

        let top = self.levels.len() - 1;
        if self.levels[top].len() > fanout {
            return Err(Error::corruption(format!(
                "top level {} has {} entries, more than fanout {}",
                top,
                self.levels[top].len(),
                fanout
            )));
        }
        Ok(())
    }

    /// Find the first record whose key satisfies `test`.
    ///
    /// `test` must be monotonic over the table's key order: false for every
    /// key below some threshold and true for every key at or above it.
    /// Returns `Ok(None)` when no record satisfies it.
    pub fn find<F>(&mut self, mut test: F) -> Result<Option<Entry>>
    where
        F: FnMut(&[u8]) -> bool,
    {
        let blocks = self.levels[0].len();
        if blocks == 0 {
            return Ok(None);
        }

        let fanout = self.meta.fanout as u64;
        let top = self.levels.len() - 1;
        let mut range = 0..self.levels[top].len();

        for level in (1..=top).rev() {
            let found = {
                let mut view = LevelView { index: &mut self.levels[level], heap: &mut self.heaps[level - 1] };
                first_satisfying(&mut view, range.clone(), &mut test)?
            };
            let group = search::candidate(&range, found);

            let start = group * fanout;
            let end = (start + fanout).min(self.levels[level - 1].len());
            if start >= end {
                return Err(Error::corruption(format!(
                    "level {} entry {} has no children",
                    level, group
                )));
            }
            range = start..end;
        }

        let found = {
            let mut view = LevelView { index: &mut self.levels[0], heap: &mut self.heaps[0] };
            first_satisfying(&mut view, range.clone(), &mut test)?
        };
        let block = search::candidate(&range, found);

        if let Some(entry) = self.search_block(block, &mut test)? {
            return Ok(Some(entry));
        }
        // The block's keys all fail the test, so only the next block's first
        // record can be the answer. The candidate block is searched even when
        // the next block's first key already passes: duplicates of that key
        // may end the candidate block, and the first of them is the answer.
        if block + 1 < blocks {
            return self.search_block(block + 1, &mut test);
        }
        Ok(None)
    }

    /// Find the first record with key `>= key` (bytewise).
    pub fn seek(&mut self, key: &[u8]) -> Result<Option<Entry>> {
        self.find(|k| k >= key)
    }

    /// Get the value of the first record with exactly `key`.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.seek(key)?.and_then(|(k, v)| if k == key { Some(v) } else { None }))
    }

    fn search_block<F>(&mut self, index: u64, test: &mut F) -> Result<Option<Entry>>
    where
        F: FnMut(&[u8]) -> bool,
    {
        let entry = self.levels[0].block_entry(index)?;
        let expected = self.records_in_block(index);
        let last = index + 1 == self.levels[0].len();
        let data = &mut self.data;

        let block = self
            .cache
            .get_or_try_insert_with(entry.compressed_offset, || load_block(data, &entry, last, expected))?;

        let pos = lower_bound(0..block.len() as u64, |i| Ok(test(block.key(i as usize))))? as usize;
        Ok(if pos < block.len() { Some(block.entry(pos)) } else { None })
    }

    fn records_in_block(&self, index: u64) -> usize {
        let fanout = self.meta.fanout as u64;
        let before = index * fanout;
        self.meta.entries.saturating_sub(before).min(fanout) as usize
    }

    /// Inflate block `index` on its own, bypassing the cache.
    pub fn read_block(&mut self, index: u64) -> Result<Bytes> {
        let blocks = self.levels[0].len();
        if index >= blocks {
            return Err(Error::invalid_argument(format!(
                "block {} out of range ({} blocks)",
                index, blocks
            )));
        }

        let entry = self.levels[0].block_entry(index)?;
        let compressed = self.data.read_vec_at(entry.compressed_offset, entry.compressed_length as usize)?;
        Ok(Bytes::from(inflate_block(&compressed, index + 1 == blocks)?))
    }

    /// Walk every index entry and check offsets against the files and the
    /// metadata.
    pub fn verify(&mut self) -> Result<()> {
        let blocks = self.levels[0].len();
        let mut heap_offset = 0u64;
        let mut compressed_offset = 0u64;

        for i in 0..blocks {
            let entry = self.levels[0].block_entry(i)?;
            if entry.heap_offset != heap_offset {
                return Err(Error::corruption(format!(
                    "block {} heap offset {} does not follow previous key (expected {})",
                    i, entry.heap_offset, heap_offset
                )));
            }
            if entry.compressed_offset != compressed_offset {
                return Err(Error::corruption(format!(
                    "block {} starts at {} but previous block ends at {}",
                    i, entry.compressed_offset, compressed_offset
                )));
            }
            heap_offset = heap_offset.checked_add(entry.key_length as u64).ok_or_else(|| {
                Error::corruption(format!("block {} key length overflows the heap offset", i))
            })?;
            compressed_offset =
                compressed_offset.checked_add(entry.compressed_length as u64).ok_or_else(|| {
                    Error::corruption(format!("block {} length overflows the data offset", i))
                })?;
        }

        if heap_offset != self.heaps[0].len() {
            return Err(Error::corruption(format!(
                "level 0 heap is {} bytes, index accounts for {}",
                self.heaps[0].len(),
                heap_offset
            )));
        }
        if blocks > 0 && compressed_offset != self.meta.compressed_size {
            return Err(Error::corruption(format!(
                "blocks end at {}, metadata says {}",
                compressed_offset, self.meta.compressed_size
            )));
        }
        if self.data.len() < self.meta.compressed_size {
            return Err(Error::truncated(format!(
                "data file is {} bytes, metadata says {}",
                self.data.len(),
                self.meta.compressed_size
            )));
        }

        for level in 1..self.levels.len() {
            let child_heap = self.heaps[level - 1].len();
            for i in 0..self.levels[level].len() {
                let entry = self.levels[level].group_entry(i)?;
                if i == 0 && entry.data_offset != 0 {
                    return Err(Error::corruption(format!(
                        "level {} does not start at the table's first key",
                        level
                    )));
                }
                let end = entry.data_offset.checked_add(entry.key_length as u64).ok_or_else(|| {
                    Error::corruption(format!("level {} entry {} key range overflows", level, i))
                })?;
                if end > child_heap {
                    return Err(Error::truncated(format!(
                        "level {} entry {} points past the end of level {} heap",
                        level,
                        i,
                        level - 1
                    )));
                }
            }
        }
        Ok(())
    }

    /// Get the table metadata
    pub fn metadata(&self) -> &Metadata {
        &self.meta
    }

    /// Number of compressed blocks
    pub fn block_count(&self) -> u64 {
        self.levels[0].len()
    }

    /// Number of index levels
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Number of entries in index `level`
    pub fn level_len(&self, level: usize) -> Option<u64> {
        self.levels.get(level).map(LevelReader::len)
    }

    /// Get block cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

fn load_block(
    data: &mut RandomAccessFile,
    entry: &BlockEntry,
    last: bool,
    expected: usize,
) -> Result<DecodedBlock> {
    let compressed = data.read_vec_at(entry.compressed_offset, entry.compressed_length as usize)?;
    DecodedBlock::parse(inflate_block(&compressed, last)?, expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{index_file_name, TableReader, TableWriter};
    use tempfile::TempDir;

    fn create_table(dir: &Path, options: &Options, entries: &[(Vec<u8>, Vec<u8>)]) {
        let mut writer = TableWriter::create(dir, "t", options.clone()).unwrap();
        for (key, value) in entries {
            writer.write(key, value).unwrap();
        }
        writer.close().unwrap();
    }

    fn numbered(n: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
        (0..n)
            .map(|i| (format!("key{:06}", i).into_bytes(), format!("value{:06}", i).into_bytes()))
            .collect()
    }

    #[test]
    fn test_seeker_three_records() {
        let dir = TempDir::new().unwrap();
        let options = Options::new().fanout(3);
        let entries = vec![
            (b"a".to_vec(), b"A".to_vec()),
            (b"b".to_vec(), b"B".to_vec()),
            (b"c".to_vec(), b"C".to_vec()),
        ];
        create_table(dir.path(), &options, &entries);

        let mut seeker = TableSeeker::open(dir.path(), "t", &options).unwrap();
        let found = seeker.find(|k| k >= b"b".as_slice()).unwrap();
        assert_eq!(found, Some((b"b".to_vec(), b"B".to_vec())));
        assert_eq!(seeker.get(b"c").unwrap(), Some(b"C".to_vec()));
        assert_eq!(seeker.get(b"bb").unwrap(), None);
    }

    #[test]
    fn test_seeker_every_key() {
        for fanout in [2, 3, 4, 7] {
            for n in [1, 2, 5, 16, 17, 50, 130] {
                let dir = TempDir::new().unwrap();
                let options = Options::new().fanout(fanout).block_cache_blocks(2);
                let entries = numbered(n);
                create_table(dir.path(), &options, &entries);

                let mut seeker = TableSeeker::open(dir.path(), "t", &options).unwrap();
                seeker.verify().unwrap();
                for (key, value) in &entries {
                    let found = seeker.seek(key).unwrap();
                    assert_eq!(found, Some((key.clone(), value.clone())), "fanout {} n {}", fanout, n);
                }

                // between keys: the next key up
                for i in 0..n - 1 {
                    let target = format!("key{:06}x", i).into_bytes();
                    let found = seeker.seek(&target).unwrap().unwrap();
                    assert_eq!(found.0, entries[i + 1].0);
                }

                // before every key, after every key
                assert_eq!(seeker.seek(b"a").unwrap().unwrap().0, entries[0].0);
                assert_eq!(seeker.seek(b"z").unwrap(), None);
                assert_eq!(seeker.find(|_| false).unwrap(), None);
            }
        }
    }

    #[test]
    fn test_seeker_duplicates_return_first() {
        let dir = TempDir::new().unwrap();
        let options = Options::new().fanout(2);
        let mut entries = Vec::new();
        for (i, key) in ["a", "b", "b", "b", "b", "b", "c", "d", "d"].iter().enumerate() {
            entries.push((key.as_bytes().to_vec(), i.to_string().into_bytes()));
        }
        create_table(dir.path(), &options, &entries);

        let mut seeker = TableSeeker::open(dir.path(), "t", &options).unwrap();
        assert_eq!(seeker.seek(b"b").unwrap().unwrap().1, b"1");
        assert_eq!(seeker.seek(b"c").unwrap().unwrap().1, b"6");
        assert_eq!(seeker.seek(b"d").unwrap().unwrap().1, b"7");
        assert_eq!(seeker.seek(b"bb").unwrap().unwrap().1, b"6");
    }

    #[test]
    fn test_seeker_empty_table() {
        let dir = TempDir::new().unwrap();
        let options = Options::default();
        create_table(dir.path(), &options, &[]);

        let mut seeker = TableSeeker::open(dir.path(), "t", &options).unwrap();
        assert_eq!(seeker.block_count(), 0);
        assert_eq!(seeker.find(|_| true).unwrap(), None);
        seeker.verify().unwrap();
    }

    #[test]
    fn test_seeker_level_shape() {
        let dir = TempDir::new().unwrap();
        let options = Options::new().fanout(4);
        create_table(dir.path(), &options, &numbered(65));

        let seeker = TableSeeker::open(dir.path(), "t", &options).unwrap();
        assert_eq!(seeker.block_count(), 17);
        assert_eq!(seeker.level_count(), 3);
        assert_eq!(seeker.level_len(1), Some(5));
        assert_eq!(seeker.level_len(2), Some(2));
        assert_eq!(seeker.level_len(3), None);
    }

    #[test]
    fn test_seeker_cache_reuse() {
        let dir = TempDir::new().unwrap();
        let options = Options::new().fanout(4).block_cache_blocks(2);
        create_table(dir.path(), &options, &numbered(40));

        let mut seeker = TableSeeker::open(dir.path(), "t", &options).unwrap();
        for _ in 0..5 {
            seeker.seek(b"key000001").unwrap();
        }
        let stats = seeker.cache_stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 4);

        // Blocks hold four keys each. key000010 sits inside block 2.
        seeker.seek(b"key000010").unwrap();
        assert_eq!(seeker.cache_stats().misses, 2);

        // key000020 opens block 5, so block 4 is inflated first in case
        // it ends with equal keys: two misses for one seek.
        seeker.seek(b"key000020").unwrap();
        assert_eq!(seeker.cache_stats().misses, 4);

        // block 0 was evicted by blocks 4 and 5
        seeker.seek(b"key000001").unwrap();
        let stats = seeker.cache_stats();
        assert_eq!(stats.misses, 5);
        assert_eq!(stats.hits, 4);
        assert_eq!(stats.evictions, 3);

        // a key inside block 5 only touches block 5
        seeker.seek(b"key000021").unwrap();
        let stats = seeker.cache_stats();
        assert_eq!(stats.misses, 5);
        assert_eq!(stats.hits, 5);
    }

    #[test]
    fn test_read_block_matches_sequential_stream() {
        let dir = TempDir::new().unwrap();
        let options = Options::new().fanout(5);
        let entries = numbered(23);
        create_table(dir.path(), &options, &entries);

        let mut sequential = Vec::new();
        let mut reader = TableReader::open(dir.path(), "t", &options).unwrap();
        while let Some((key, value)) = reader.current() {
            frame::encode_into(&mut sequential, key, value).unwrap();
            reader.advance().unwrap();
        }

        let mut seeker = TableSeeker::open(dir.path(), "t", &options).unwrap();
        let mut joined = Vec::new();
        for i in 0..seeker.block_count() {
            joined.extend_from_slice(&seeker.read_block(i).unwrap());
        }
        assert_eq!(joined, sequential);
        assert!(seeker.read_block(seeker.block_count()).is_err());
    }

    #[test]
    fn test_seeker_truncated_data_file() {
        let dir = TempDir::new().unwrap();
        let options = Options::new().fanout(4);
        let entries = numbered(30);
        create_table(dir.path(), &options, &entries);

        let path = dir.path().join("t");
        let len = std::fs::metadata(&path).unwrap().len();
        std::fs::OpenOptions::new().write(true).open(&path).unwrap().set_len(len - 1).unwrap();

        let mut seeker = TableSeeker::open(dir.path(), "t", &options).unwrap();
        let err = seeker.seek(&entries[29].0).unwrap_err();
        assert!(matches!(err, Error::Truncated(_)));
        assert!(seeker.verify().is_err());

        // untouched blocks still answer correctly
        assert_eq!(seeker.seek(&entries[0].0).unwrap(), Some(entries[0].clone()));
    }

    #[test]
    fn test_seeker_rejects_wrong_shape() {
        let dir = TempDir::new().unwrap();
        let options = Options::new().fanout(4);
        create_table(dir.path(), &options, &numbered(30));

        let path = dir.path().join(index_file_name("t", 0));
        let index = std::fs::read(&path).unwrap();
        std::fs::write(&path, &index[..index.len() - 24]).unwrap();

        let result = TableSeeker::open(dir.path(), "t", &options);
        assert!(matches!(result, Err(Error::Corruption(_))));
    }

    #[test]
    fn test_verify_detects_bad_heap_offset() {
        let dir = TempDir::new().unwrap();
        let options = Options::new().fanout(4);
        create_table(dir.path(), &options, &numbered(30));

        let path = dir.path().join(index_file_name("t", 0));
        let mut index = std::fs::read(&path).unwrap();
        // second entry's heap_offset
        index[24..32].copy_from_slice(&99u64.to_le_bytes());
        std::fs::write(&path, &index).unwrap();

        let mut seeker = TableSeeker::open(dir.path(), "t", &options).unwrap();
        assert!(matches!(seeker.verify(), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_verify_detects_overflowing_upper_entry() {
        let dir = TempDir::new().unwrap();
        let options = Options::new().fanout(4);
        create_table(dir.path(), &options, &numbered(40));

        let path = dir.path().join(index_file_name("t", 1));
        let mut index = std::fs::read(&path).unwrap();
        // second entry's data_offset
        index[12..20].copy_from_slice(&u64::MAX.to_le_bytes());
        std::fs::write(&path, &index).unwrap();

        let mut seeker = TableSeeker::open(dir.path(), "t", &options).unwrap();
        assert!(matches!(seeker.verify(), Err(Error::Corruption(_))));
    }
}
