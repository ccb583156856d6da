//! Uncompressed table format.
//!
//! Every record gets one fixed-width index entry; keys and values sit
//! back to back in a single heap file. There are no blocks and no index
//! hierarchy, so a seek is one binary search over the index file.
//!
//! ```text
//! <base>.pi  // 16-byte entries: [heap_offset: u64][key_length: u32][value_length: u32]
//! <base>.ph  // key bytes immediately followed by value bytes, per record
//! ```

use super::{check_base, TableDir, TableFormat, TableRead, TableSeek, TableWrite};
use crate::config::Options;
use crate::error::{Error, Result};
use crate::table::file::{remove_if_exists, AppendFile, RandomAccessFile};
use crate::table::search::{first_satisfying, EntrySource};
use crate::table::Entry;
use bytes::{Buf, BufMut};
use std::borrow::Cow;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

/// Size of a plain index entry
pub const PLAIN_ENTRY_SIZE: usize = 16;

fn index_name(base: &str) -> String {
    format!("{}.pi", base)
}

fn heap_name(base: &str) -> String {
    format!("{}.ph", base)
}

/// Index entry for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PlainEntry {
    heap_offset: u64,
    key_length: u32,
    value_length: u32,
}

impl PlainEntry {
    fn encode(&self) -> [u8; PLAIN_ENTRY_SIZE] {
        let mut buf = [0u8; PLAIN_ENTRY_SIZE];
        let mut out = &mut buf[..];
        out.put_u64_le(self.heap_offset);
        out.put_u32_le(self.key_length);
        out.put_u32_le(self.value_length);
        buf
    }

    fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < PLAIN_ENTRY_SIZE {
            return Err(Error::truncated("plain index entry too short"));
        }
        Ok(Self { heap_offset: data.get_u64_le(), key_length: data.get_u32_le(), value_length: data.get_u32_le() })
    }

    fn record_len(&self) -> usize {
        self.key_length as usize + self.value_length as usize
    }
}

fn len_u32(what: &str, data: &[u8]) -> Result<u32> {
    u32::try_from(data.len())
        .map_err(|_| Error::invalid_argument(format!("{} too large: {} bytes", what, data.len())))
}

/// The uncompressed table format.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainFormat;

impl TableFormat for PlainFormat {
    fn create_writer(&self, dir: &TableDir, base: &str, options: &Options) -> Result<Box<dyn TableWrite>> {
        check_base(base)?;
        Ok(Box::new(PlainWriter::create(dir.path(), base, options.clone())?))
    }

    fn open_reader(&self, dir: &TableDir, base: &str, _options: &Options) -> Result<Box<dyn TableRead>> {
        check_base(base)?;
        Ok(Box::new(PlainReader::open(dir.path(), base)?))
    }

    fn open_seeker(&self, dir: &TableDir, base: &str, _options: &Options) -> Result<Box<dyn TableSeek>> {
        check_base(base)?;
        Ok(Box::new(PlainSeeker::open(dir.path(), base)?))
    }

    fn remove(&self, dir: &TableDir, base: &str) -> Result<()> {
        check_base(base)?;
        remove_if_exists(&dir.path_of(&index_name(base)))?;
        remove_if_exists(&dir.path_of(&heap_name(base)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Failed,
    Closed,
    Destroyed,
}

/// Writer for the plain format.
pub struct PlainWriter {
    base: String,
    options: Options,
    state: State,
    index: AppendFile,
    heap: AppendFile,
    last_key: Vec<u8>,
    entries: u64,
}

impl PlainWriter {
    /// Create table `base` in `dir`, truncating any previous files.
    pub fn create(dir: &Path, base: &str, options: Options) -> Result<Self> {
        options.validate()?;
        let index = AppendFile::create(dir.join(index_name(base)))?;
        let heap = match AppendFile::create(dir.join(heap_name(base))) {
            Ok(heap) => heap,
            Err(e) => {
                let _ = remove_if_exists(index.path());
                return Err(e);
            }
        };

        Ok(Self {
            base: base.to_string(),
            options,
            state: State::Open,
            index,
            heap,
            last_key: Vec::new(),
            entries: 0,
        })
    }

    /// Append a record.
    pub fn write(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        match self.state {
            State::Open => {}
            State::Failed => return Err(Error::invalid_state("writer failed; destroy it")),
            State::Closed => return Err(Error::invalid_state("writer already closed")),
            State::Destroyed => return Err(Error::invalid_state("writer destroyed")),
        }
        if self.options.verify_key_order && self.entries > 0 && key < self.last_key.as_slice() {
            return Err(Error::invalid_argument("Keys must be added in sorted order"));
        }

        let entry = PlainEntry {
            heap_offset: self.heap.current_offset(),
            key_length: len_u32("key", key)?,
            value_length: len_u32("value", value)?,
        };

        let result = self
            .heap
            .append(key)
            .and_then(|_| self.heap.append(value))
            .and_then(|_| self.index.append(&entry.encode()));
        if let Err(e) = result {
            self.state = State::Failed;
            return Err(e);
        }

        if self.options.verify_key_order {
            self.last_key.clear();
            self.last_key.extend_from_slice(key);
        }
        self.entries += 1;
        Ok(())
    }

    /// Flush both files. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        match self.state {
            State::Closed => return Ok(()),
            State::Open => {}
            State::Failed | State::Destroyed => {
                return Err(Error::invalid_state("cannot close a failed or destroyed writer"));
            }
        }

        let sync = self.options.sync_on_close;
        let result = self.heap.finish(sync).and_then(|_| self.index.finish(sync));
        self.state = if result.is_ok() { State::Closed } else { State::Failed };
        if result.is_ok() {
            log::info!("Closed plain table {}: {} entries", self.base, self.entries);
        }
        result
    }

    /// Delete the files unless the table was closed.
    pub fn destroy(&mut self) {
        if matches!(self.state, State::Open | State::Failed) {
            for path in [self.index.path(), self.heap.path()] {
                if let Err(e) = remove_if_exists(path) {
                    log::warn!("Failed to remove {:?}: {}", path, e);
                }
            }
            self.state = State::Destroyed;
        }
    }

    /// Get the number of records written
    pub fn num_entries(&self) -> u64 {
        self.entries
    }
}

impl Drop for PlainWriter {
    fn drop(&mut self) {
        if matches!(self.state, State::Open | State::Failed) {
            log::warn!("Plain table {} dropped without close; removing partial files", self.base);
            self.destroy();
        }
    }
}

impl TableWrite for PlainWriter {
    fn write(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        PlainWriter::write(self, key, value)
    }

    fn close(&mut self) -> Result<()> {
        PlainWriter::close(self)
    }

    fn destroy(&mut self) {
        PlainWriter::destroy(self)
    }

    fn num_entries(&self) -> u64 {
        PlainWriter::num_entries(self)
    }
}

/// Fill `buf`, reporting a short file as [`Error::Truncated`].
fn read_exact_or_truncated<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::truncated(format!("{} ends early", what)),
        _ => Error::Io(e),
    })
}

/// Sequential reader for the plain format.
pub struct PlainReader {
    index: BufReader<File>,
    heap: BufReader<File>,
    index_len: u64,
    index_offset: u64,
    heap_len: u64,
    heap_offset: u64,
    record: Vec<u8>,
    key_len: usize,
    valid: bool,
}

impl PlainReader {
    /// Open table `base` in `dir` and position on its first record.
    pub fn open(dir: &Path, base: &str) -> Result<Self> {
        let index = File::open(dir.join(index_name(base)))?;
        let heap = File::open(dir.join(heap_name(base)))?;
        let index_len = index.metadata()?.len();
        let heap_len = heap.metadata()?.len();

        let mut reader = Self {
            index: BufReader::new(index),
            heap: BufReader::new(heap),
            index_len,
            index_offset: 0,
            heap_len,
            heap_offset: 0,
            record: Vec::new(),
            key_len: 0,
            valid: false,
        };
        reader.advance()?;
        Ok(reader)
    }

    /// Move to the next record. Returns `Ok(false)` at the end.
    pub fn advance(&mut self) -> Result<bool> {
        self.valid = false;

        let remaining = self.index_len - self.index_offset;
        if remaining == 0 {
            if self.heap_offset != self.heap_len {
                return Err(Error::corruption(format!(
                    "index covers {} heap bytes of {}",
                    self.heap_offset, self.heap_len
                )));
            }
            return Ok(false);
        }
        if remaining < PLAIN_ENTRY_SIZE as u64 {
            return Err(Error::truncated(format!("partial index entry of {} bytes", remaining)));
        }

        let mut raw = [0u8; PLAIN_ENTRY_SIZE];
        read_exact_or_truncated(&mut self.index, &mut raw, "index")?;
        self.index_offset += PLAIN_ENTRY_SIZE as u64;

        let entry = PlainEntry::decode(&raw)?;
        if entry.heap_offset != self.heap_offset {
            return Err(Error::corruption(format!(
                "record at heap offset {}, expected {}",
                entry.heap_offset, self.heap_offset
            )));
        }

        if entry.record_len() as u64 > self.heap_len - self.heap_offset {
            return Err(Error::truncated("heap ends inside a record"));
        }
        self.record.resize(entry.record_len(), 0);
        read_exact_or_truncated(&mut self.heap, &mut self.record, "heap")?;
        self.heap_offset += entry.record_len() as u64;
        self.key_len = entry.key_length as usize;
        self.valid = true;
        Ok(true)
    }

    /// The current record.
    pub fn current(&self) -> Option<(&[u8], &[u8])> {
        if self.valid {
            Some(self.record.split_at(self.key_len))
        } else {
            None
        }
    }
}

impl TableRead for PlainReader {
    fn current(&self) -> Option<(&[u8], &[u8])> {
        PlainReader::current(self)
    }

    fn advance(&mut self) -> Result<bool> {
        PlainReader::advance(self)
    }
}

/// Binary-searching seeker for the plain format.
pub struct PlainSeeker {
    path: PathBuf,
    index: RandomAccessFile,
    heap: RandomAccessFile,
    entries: u64,
}

impl PlainSeeker {
    /// Open table `base` in `dir`.
    pub fn open(dir: &Path, base: &str) -> Result<Self> {
        let index = RandomAccessFile::open(dir.join(index_name(base)))?;
        let heap = RandomAccessFile::open(dir.join(heap_name(base)))?;

        if index.len() % PLAIN_ENTRY_SIZE as u64 != 0 {
            return Err(Error::truncated(format!(
                "plain index of {} bytes is not a whole number of entries",
                index.len()
            )));
        }
        let entries = index.len() / PLAIN_ENTRY_SIZE as u64;

        Ok(Self { path: dir.join(base), index, heap, entries })
    }

    fn entry(&mut self, i: u64) -> Result<PlainEntry> {
        let mut raw = [0u8; PLAIN_ENTRY_SIZE];
        self.index.read_exact_at(i * PLAIN_ENTRY_SIZE as u64, &mut raw)?;
        PlainEntry::decode(&raw)
    }

    /// First record whose key satisfies the monotonic predicate `test`.
    pub fn find<F>(&mut self, mut test: F) -> Result<Option<Entry>>
    where
        F: FnMut(&[u8]) -> bool,
    {
        let entries = self.entries;
        let pos = first_satisfying(self, 0..entries, &mut test)?;
        if pos == entries {
            return Ok(None);
        }

        let entry = self.entry(pos)?;
        let mut key = self.heap.read_vec_at(entry.heap_offset, entry.record_len())?;
        let value = key.split_off(entry.key_length as usize);
        Ok(Some((key, value)))
    }

    /// Number of records
    pub fn len(&self) -> u64 {
        self.entries
    }

    /// Whether the table has no records
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}

impl EntrySource for PlainSeeker {
    fn entry_count(&self) -> u64 {
        self.entries
    }

    fn key_at(&mut self, index: u64) -> Result<Cow<'_, [u8]>> {
        let entry = self.entry(index)?;
        Ok(Cow::Owned(self.heap.read_vec_at(entry.heap_offset, entry.key_length as usize)?))
    }
}

impl TableSeek for PlainSeeker {
    fn find(&mut self, test: &mut dyn FnMut(&[u8]) -> bool) -> Result<Option<Entry>> {
        PlainSeeker::find(self, test)
    }
}

impl std::fmt::Debug for PlainSeeker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainSeeker").field("path", &self.path).field("entries", &self.entries).finish()
    }
}
