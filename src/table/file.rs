//! File primitives shared by the table engines.
//!
//! [`AppendFile`] is the only way the writer puts bytes on disk; it owns the
//! running offset so callers never compute offsets from outside state.
//! [`RandomAccessFile`] serves the bounded positional reads of the seeker.

use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Append-only file that tracks its own length.
pub struct AppendFile {
    /// Path to the file
    path: PathBuf,
    /// Buffered writer for efficient I/O
    writer: BufWriter<File>,
    /// Bytes appended so far
    offset: u64,
}

impl AppendFile {
    /// Create (or truncate) the file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new().create(true).write(true).truncate(true).open(&path)?;

        Ok(Self { path, writer: BufWriter::new(file), offset: 0 })
    }

    /// Append `data`, returning the offset it starts at.
    pub fn append(&mut self, data: &[u8]) -> Result<u64> {
        let start = self.offset;
        self.writer.write_all(data)?;
        self.offset += data.len() as u64;
        Ok(start)
    }

    /// Offset the next append will start at.
    pub fn current_offset(&self) -> u64 {
        self.offset
    }

    /// Flush buffered bytes, optionally fsync'ing them.
    pub fn finish(&mut self, sync: bool) -> Result<()> {
        self.writer.flush()?;
        if sync {
            self.writer.get_ref().sync_all()?;
        }
        Ok(())
    }

    /// Get the path to the file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read-only file supporting reads at arbitrary offsets.
#[derive(Debug)]
pub struct RandomAccessFile {
    path: PathBuf,
    file: File,
    len: u64,
}

impl RandomAccessFile {
    /// Open an existing file for reading
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        Ok(Self { path, file, len })
    }

    /// File length at open time.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Check if the file is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get the path to the file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fill `buf` from `offset`.
    ///
    /// A range extending past the end of the file is reported as
    /// [`Error::Truncated`] without touching the disk.
    pub fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.check_range(offset, buf.len())?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => {
                Error::truncated(format!("{}: short read at offset {}", self.path.display(), offset))
            }
            _ => Error::Io(e),
        })
    }

    /// Read `len` bytes starting at `offset`.
    ///
    /// The range is checked against the file size before the buffer is
    /// allocated.
    pub fn read_vec_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.check_range(offset, len)?;
        let mut buf = vec![0u8; len];
        self.read_exact_at(offset, &mut buf)?;
        Ok(buf)
    }

    fn check_range(&self, offset: u64, len: usize) -> Result<()> {
        let end = offset.checked_add(len as u64).ok_or_else(|| {
            Error::corruption(format!("read range overflows at offset {}", offset))
        })?;
        if end > self.len {
            return Err(Error::truncated(format!(
                "{}: range {}..{} exceeds file size {}",
                self.path.display(),
                offset,
                end,
                self.len
            )));
        }
        Ok(())
    }
}

/// Remove a file, treating "already gone" as success.
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}
