//! Table writer implementation.
//!
//! Accepts records in key order, frames them into one DEFLATE stream with a
//! restart point every `fanout` records, and grows the index tree as blocks
//! and groups fill up.

use crate::config::Options;
use crate::error::{Error, Result};
use crate::table::codec::BlockCompressor;
use crate::table::file::{remove_if_exists, AppendFile};
use crate::table::frame;
use crate::table::index::LevelWriter;
use crate::table::{heap_file_name, index_file_name, info_file_name, Metadata};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Open,
    Failed,
    Closed,
    Destroyed,
}

/// TableWriter builds a table from records supplied in key order.
///
/// Usage:
/// ```no_run
/// use blocktable::{Options, TableWriter};
///
/// let mut writer = TableWriter::create("./tables".as_ref(), "t", Options::default()).unwrap();
/// writer.write(b"key1", b"value1").unwrap();
/// writer.write(b"key2", b"value2").unwrap();
/// writer.close().unwrap();
/// ```
pub struct TableWriter {
    dir: PathBuf,
    base: String,
    options: Options,
    state: WriterState,
    data: AppendFile,
    compressor: BlockCompressor,
    /// Index levels, child before parent
    levels: Vec<LevelWriter>,
    frame_buf: Vec<u8>,
    first_key: Vec<u8>,
    last_key: Vec<u8>,
    /// Records in the current block
    block_fill: usize,
    entries: u64,
    key_bytes: u64,
    data_bytes: u64,
}

impl TableWriter {
    /// Create a new table `base` inside `dir`, truncating any previous files.
    pub fn create(dir: &Path, base: &str, options: Options) -> Result<Self> {
        options.validate()?;
        if base.is_empty() {
            return Err(Error::invalid_argument("table base name cannot be empty"));
        }

        let data = AppendFile::create(dir.join(base))?;
        let level0 = match LevelWriter::create(dir, base, 0) {
            Ok(level) => level,
            Err(e) => {
                let _ = remove_if_exists(data.path());
                return Err(e);
            }
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            base: base.to_string(),
            compressor: BlockCompressor::new(options.compression_level),
            options,
            state: WriterState::Open,
            data,
            levels: vec![level0],
            frame_buf: Vec::new(),
            first_key: Vec::new(),
            last_key: Vec::new(),
            block_fill: 0,
            entries: 0,
            key_bytes: 0,
            data_bytes: 0,
        })
    }

    /// Append a record.
    ///
    /// Keys must not sort before the previous key. This is only checked
    /// (bytewise) when `verify_key_order` is set.
    pub fn write(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.ensure_open()?;

        if self.options.verify_key_order && self.entries > 0 && key < self.last_key.as_slice() {
            return Err(Error::invalid_argument("Keys must be added in sorted order"));
        }

        self.frame_buf.clear();
        frame::encode_into(&mut self.frame_buf, key, value)?;

        if let Err(e) = self.append_frame(key) {
            self.state = WriterState::Failed;
            return Err(e);
        }

        if self.options.verify_key_order {
            self.last_key.clear();
            self.last_key.extend_from_slice(key);
        }
        self.entries += 1;
        self.key_bytes += key.len() as u64;
        self.data_bytes += value.len() as u64;
        Ok(())
    }

    fn append_frame(&mut self, key: &[u8]) -> Result<()> {
        if self.block_fill == 0 {
            self.start_block(key)?;
        }

        self.compressor.write(&self.frame_buf, &mut self.data)?;

        self.block_fill += 1;
        if self.block_fill == self.options.fanout {
            self.block_fill = 0;
        }
        Ok(())
    }

    /// Close the previous block at a restart point and open a new one
    /// starting with `key`.
    fn start_block(&mut self, key: &[u8]) -> Result<()> {
        if self.entries == 0 {
            self.first_key = key.to_vec();
        } else {
            self.compressor.flush_restart_point(&mut self.data)?;
            self.levels[0].close_block(self.data.current_offset())?;
        }

        let heap_offset = self.levels[0].open_block(key, self.data.current_offset())?;
        self.propagate(key, heap_offset)
    }

    /// Carry a new group boundary up the tree.
    ///
    /// `heap_offset` locates `key` in level 0's heap. Whenever the entry just
    /// added to a level starts a new fanout group, its parent gets an entry
    /// for the same key.
    fn propagate(&mut self, key: &[u8], heap_offset: u64) -> Result<()> {
        let fanout = self.options.fanout as u64;
        let mut level = 0;
        let mut child_offset = heap_offset;

        loop {
            let entries = self.levels[level].entries();
            if entries <= 1 || (entries - 1) % fanout != 0 {
                return Ok(());
            }

            if level + 1 == self.levels.len() {
                let mut parent = LevelWriter::create(&self.dir, &self.base, level + 1)?;
                // Every level starts its coverage at the table's first key,
                // which sits at offset 0 of every heap.
                parent.push_group(&self.first_key, 0)?;
                log::debug!("Allocated index level {} for table {}", level + 1, self.base);
                self.levels.push(parent);
            }

            child_offset = self.levels[level + 1].push_group(key, child_offset)?;
            level += 1;
        }
    }

    /// Finish the table and write its metadata.
    ///
    /// Calling `close` on a closed writer is a no-op.
    pub fn close(&mut self) -> Result<()> {
        match self.state {
            WriterState::Closed => return Ok(()),
            WriterState::Open => {}
            WriterState::Failed | WriterState::Destroyed => {
                return Err(Error::invalid_state("cannot close a failed or destroyed writer"));
            }
        }

        let result = self.finish();
        self.state = if result.is_ok() { WriterState::Closed } else { WriterState::Failed };
        result
    }

    fn finish(&mut self) -> Result<()> {
        self.compressor.finish(&mut self.data)?;
        if self.levels[0].has_open_block() {
            self.levels[0].close_block(self.data.current_offset())?;
        }

        let sync = self.options.sync_on_close;
        self.data.finish(sync)?;
        for level in &mut self.levels {
            level.finish(sync)?;
        }

        let meta = self.metadata();
        meta.write_to(&self.dir.join(info_file_name(&self.base)), sync)?;

        log::info!(
            "Closed table {}: {} entries, {} compressed bytes, {} index levels",
            self.base,
            meta.entries,
            meta.compressed_size,
            meta.index_levels
        );
        Ok(())
    }

    /// Abandon the table.
    ///
    /// Before a successful close this deletes every file created so far;
    /// afterwards it only releases in-memory state. Always safe to call,
    /// any number of times.
    pub fn destroy(&mut self) {
        match self.state {
            WriterState::Closed => {
                self.levels.clear();
                self.frame_buf = Vec::new();
            }
            WriterState::Destroyed => {}
            WriterState::Open | WriterState::Failed => {
                let mut paths = vec![self.data.path().to_path_buf(), self.dir.join(info_file_name(&self.base))];
                for level in self.levels.drain(..) {
                    paths.push(self.dir.join(index_file_name(&self.base, level.level())));
                    paths.push(self.dir.join(heap_file_name(&self.base, level.level())));
                }
                for path in &paths {
                    if let Err(e) = remove_if_exists(path) {
                        log::warn!("Failed to remove {:?}: {}", path, e);
                    }
                }
                self.state = WriterState::Destroyed;
                log::debug!("Destroyed partial table {}", self.base);
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            WriterState::Open => Ok(()),
            WriterState::Failed => Err(Error::invalid_state("writer failed; destroy it")),
            WriterState::Closed => Err(Error::invalid_state("writer already closed")),
            WriterState::Destroyed => Err(Error::invalid_state("writer destroyed")),
        }
    }

    fn metadata(&self) -> Metadata {
        Metadata {
            entries: self.entries,
            key_bytes: self.key_bytes,
            data_bytes: self.data_bytes,
            compressed_size: self.data.current_offset(),
            index_levels: self.levels.len() as u32,
            fanout: self.options.fanout as u32,
        }
    }

    /// Get the number of records written
    pub fn num_entries(&self) -> u64 {
        self.entries
    }

    /// Compressed bytes written so far
    pub fn compressed_size(&self) -> u64 {
        self.data.current_offset()
    }

    /// Number of index levels allocated so far
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Whether `close` has completed
    pub fn is_closed(&self) -> bool {
        self.state == WriterState::Closed
    }
}

impl Drop for TableWriter {
    fn drop(&mut self) {
        if matches!(self.state, WriterState::Open | WriterState::Failed) {
            log::warn!("Table {} dropped without close; removing partial files", self.base);
            self.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_table(dir: &Path, fanout: usize, n: usize) -> TableWriter {
        let mut writer = TableWriter::create(dir, "t", Options::new().fanout(fanout)).unwrap();
        for i in 0..n {
            let key = format!("key{:08}", i);
            writer.write(key.as_bytes(), b"v").unwrap();
        }
        writer.close().unwrap();
        writer
    }

    fn index_len(dir: &Path, level: usize) -> u64 {
        std::fs::metadata(dir.join(index_file_name("t", level))).unwrap().len()
    }

    #[test]
    fn test_writer_empty() {
        let dir = TempDir::new().unwrap();
        let writer = write_table(dir.path(), 4, 0);

        assert_eq!(writer.num_entries(), 0);
        assert_eq!(writer.level_count(), 1);
        assert_eq!(index_len(dir.path(), 0), 0);

        let meta = Metadata::read_from(&dir.path().join("t.info")).unwrap();
        assert_eq!(meta.entries, 0);
        assert_eq!(meta.compressed_size, std::fs::metadata(dir.path().join("t")).unwrap().len());
    }

    #[test]
    fn test_writer_single_block() {
        let dir = TempDir::new().unwrap();
        let writer = write_table(dir.path(), 4, 4);

        assert_eq!(writer.level_count(), 1);
        assert_eq!(index_len(dir.path(), 0), 24);
        assert!(!dir.path().join(index_file_name("t", 1)).exists());
    }

    #[test]
    fn test_writer_level_growth() {
        let dir = TempDir::new().unwrap();

        // 5 blocks of 4: level 1 seeded with block 0, then block 4
        let writer = write_table(dir.path(), 4, 17);
        assert_eq!(writer.level_count(), 2);
        assert_eq!(index_len(dir.path(), 0), 5 * 24);
        assert_eq!(index_len(dir.path(), 1), 2 * 12);

        // 17 blocks: level 1 has 5 entries, level 2 has 2
        let dir = TempDir::new().unwrap();
        let writer = write_table(dir.path(), 4, 65);
        assert_eq!(writer.level_count(), 3);
        assert_eq!(index_len(dir.path(), 0), 17 * 24);
        assert_eq!(index_len(dir.path(), 1), 5 * 12);
        assert_eq!(index_len(dir.path(), 2), 2 * 12);
    }

    #[test]
    fn test_upper_levels_start_at_first_key() {
        let dir = TempDir::new().unwrap();
        write_table(dir.path(), 2, 9);

        let first = b"key00000000".as_slice();
        for level in 0..3 {
            let heap = std::fs::read(dir.path().join(heap_file_name("t", level))).unwrap();
            assert!(heap.starts_with(first), "level {} heap", level);
        }
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut writer = write_table(dir.path(), 4, 10);
        let before = std::fs::read(dir.path().join("t")).unwrap();

        writer.close().unwrap();
        writer.destroy();
        writer.destroy();
        writer.close().unwrap();
        drop(writer);

        assert_eq!(std::fs::read(dir.path().join("t")).unwrap(), before);
        assert!(dir.path().join("t.info").exists());
    }

    #[test]
    fn test_destroy_removes_files() {
        let dir = TempDir::new().unwrap();
        let mut writer = TableWriter::create(dir.path(), "t", Options::new().fanout(2)).unwrap();
        for i in 0..20 {
            writer.write(format!("k{:04}", i).as_bytes(), b"v").unwrap();
        }
        assert!(writer.level_count() > 1);

        writer.destroy();
        writer.destroy();
        assert!(writer.write(b"k", b"v").is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_drop_without_close_cleans_up() {
        let dir = TempDir::new().unwrap();
        {
            let mut writer = TableWriter::create(dir.path(), "t", Options::default()).unwrap();
            writer.write(b"a", b"1").unwrap();
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_write_after_close() {
        let dir = TempDir::new().unwrap();
        let mut writer = write_table(dir.path(), 4, 1);
        assert!(matches!(writer.write(b"z", b"z"), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_verify_key_order() {
        let dir = TempDir::new().unwrap();
        let options = Options::new().verify_key_order(true);
        let mut writer = TableWriter::create(dir.path(), "t", options).unwrap();

        writer.write(b"a", b"1").unwrap();
        writer.write(b"b", b"2").unwrap();
        writer.write(b"b", b"3").unwrap();
        assert!(matches!(writer.write(b"a", b"4"), Err(Error::InvalidArgument(_))));

        // rejected keys leave the writer usable
        writer.write(b"c", b"5").unwrap();
        writer.close().unwrap();
        assert_eq!(writer.num_entries(), 4);
    }

    #[test]
    fn test_invalid_options() {
        let dir = TempDir::new().unwrap();
        let result = TableWriter::create(dir.path(), "t", Options::new().fanout(1));
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
