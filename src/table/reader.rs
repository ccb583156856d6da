//! Sequential table reader.
//!
//! Streams the compressed data file front to back through one decompressor,
//! serving record frames out of a bounded output buffer.

use crate::config::Options;
use crate::error::{Error, Result};
use crate::table::codec::BlockDecompressor;
use crate::table::frame::{FrameHeader, FRAME_HEADER_SIZE};
use crate::table::{info_file_name, Metadata};
use std::fs::File;
use std::io::{self, Read};
use std::ops::Range;
use std::path::Path;

/// TableReader scans every record of a closed table in order.
///
/// Usage:
/// ```no_run
/// use blocktable::{Options, TableReader};
///
/// let mut reader = TableReader::open("./tables".as_ref(), "t", &Options::default()).unwrap();
/// while let Some((key, value)) = reader.current() {
///     println!("{:?} => {:?}", key, value);
///     reader.advance().unwrap();
/// }
/// ```
pub struct TableReader {
    meta: Metadata,
    file: File,
    /// Compressed bytes read from disk, valid up to `in_len`
    input: Vec<u8>,
    in_pos: usize,
    in_len: usize,
    file_eof: bool,
    decompressor: BlockDecompressor,
    /// Decompressed bytes; `out[out_pos..]` is not yet returned
    out: Vec<u8>,
    out_pos: usize,
    buffer_size: usize,
    current: Option<(Range<usize>, Range<usize>)>,
    records: u64,
}

impl TableReader {
    /// Open table `base` in `dir` and position on its first record.
    pub fn open(dir: &Path, base: &str, options: &Options) -> Result<Self> {
        options.validate()?;
        let meta = Metadata::read_from(&dir.join(info_file_name(base)))?;
        let file = File::open(dir.join(base))?;
        let buffer_size = options.read_buffer_size;

        let mut reader = Self {
            meta,
            file,
            input: vec![0u8; buffer_size],
            in_pos: 0,
            in_len: 0,
            file_eof: false,
            decompressor: BlockDecompressor::new(),
            out: Vec::with_capacity(buffer_size),
            out_pos: 0,
            buffer_size,
            current: None,
            records: 0,
        };
        reader.advance()?;
        Ok(reader)
    }

    /// Move to the next record.
    ///
    /// Returns `Ok(false)` at the end of the table.
    pub fn advance(&mut self) -> Result<bool> {
        self.current = None;

        loop {
            let available = &self.out[self.out_pos..];
            match FrameHeader::peek(available) {
                Some(header) if available.len() >= header.frame_len() => {
                    let start = self.out_pos;
                    let key = header.key_range();
                    let value = header.value_range();
                    self.current =
                        Some((start + key.start..start + key.end, start + value.start..start + value.end));
                    self.out_pos += header.frame_len();
                    self.records += 1;
                    return Ok(true);
                }
                header => {
                    if let Some(h) = header {
                        self.check_lengths(&h)?;
                    }
                    let needed = header.map_or(FRAME_HEADER_SIZE, |h| h.frame_len());
                    self.make_room(needed);
                    if !self.fill_output()? {
                        return self.finish_stream();
                    }
                }
            }
        }
    }

    /// The current record, valid until the next call to `advance`.
    pub fn current(&self) -> Option<(&[u8], &[u8])> {
        self.current.as_ref().map(|(key, value)| (&self.out[key.clone()], &self.out[value.clone()]))
    }

    /// Get the table metadata
    pub fn metadata(&self) -> &Metadata {
        &self.meta
    }

    /// Number of records returned so far
    pub fn records_read(&self) -> u64 {
        self.records
    }

    /// A record can never be longer than the table's key and value totals.
    fn check_lengths(&self, header: &FrameHeader) -> Result<()> {
        if header.key_len as u64 > self.meta.key_bytes || header.value_len as u64 > self.meta.data_bytes {
            return Err(Error::corruption(format!(
                "record {} declares {} key bytes and {} value bytes, beyond table totals",
                self.records, header.key_len, header.value_len
            )));
        }
        Ok(())
    }

    /// Drop returned bytes and make sure `needed` bytes fit in the output
    /// buffer. Records larger than the buffer grow it for as long as they
    /// are pending; afterwards it shrinks back.
    fn make_room(&mut self, needed: usize) {
        if self.out_pos > 0 {
            self.out.drain(..self.out_pos);
            self.out_pos = 0;
        }

        if needed > self.out.capacity() {
            self.out.reserve(needed - self.out.len());
        } else if needed <= self.buffer_size && self.out.capacity() > self.buffer_size {
            self.out.shrink_to(self.buffer_size.max(self.out.len()));
        }

        if self.out.len() == self.out.capacity() {
            self.out.reserve(self.buffer_size);
        }
    }

    /// Inflate more bytes into the output buffer.
    ///
    /// Returns `Ok(false)` once the end-of-stream marker has been decoded
    /// and nothing more is produced.
    fn fill_output(&mut self) -> Result<bool> {
        loop {
            if self.decompressor.is_finished() {
                return Ok(false);
            }
            if self.in_pos == self.in_len && !self.file_eof {
                self.refill()?;
            }

            let (consumed, produced) =
                self.decompressor.inflate(&self.input[self.in_pos..self.in_len], &mut self.out)?;
            self.in_pos += consumed;

            if produced > 0 {
                return Ok(true);
            }
            if self.decompressor.is_finished() {
                return Ok(false);
            }
            if consumed == 0 {
                if self.in_pos == self.in_len && self.file_eof {
                    return Err(Error::truncated(
                        "compressed stream ends before its end-of-stream marker",
                    ));
                }
                if self.in_pos < self.in_len {
                    return Err(Error::compression("inflate made no progress"));
                }
            }
        }
    }

    fn refill(&mut self) -> Result<()> {
        loop {
            match self.file.read(&mut self.input) {
                Ok(n) => {
                    self.in_pos = 0;
                    self.in_len = n;
                    self.file_eof = n == 0;
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    /// Checks run once the stream has ended.
    fn finish_stream(&mut self) -> Result<bool> {
        let pending = self.out.len() - self.out_pos;
        if pending > 0 {
            return Err(Error::truncated(format!(
                "{} bytes of a partial record at end of stream",
                pending
            )));
        }

        let consumed = self.decompressor.total_in();
        if consumed != self.meta.compressed_size {
            return Err(Error::corruption(format!(
                "stream ended after {} compressed bytes, metadata says {}",
                consumed, self.meta.compressed_size
            )));
        }
        if self.records != self.meta.entries {
            return Err(Error::corruption(format!(
                "read {} records, metadata says {}",
                self.records, self.meta.entries
            )));
        }
        if self.in_pos < self.in_len {
            log::warn!("{} trailing bytes after the compressed stream", self.in_len - self.in_pos);
            self.in_pos = self.in_len;
        }

        Ok(false)
    }
}
