//! Table file formats behind one interface.
//!
//! A [`TableFormat`] creates writers, sequential readers and seekers for a
//! base file name inside a [`TableDir`]. [`BlockFormat`] is the compressed
//! block table; [`PlainFormat`] stores uncompressed records with one index
//! entry each.
//!
//! ## Example
//!
//! ```rust,no_run
//! use blocktable::format::{BlockFormat, TableDir, TableFormat};
//! use blocktable::Options;
//!
//! # fn main() -> Result<(), blocktable::Error> {
//! let options = Options::default();
//! let dir = TableDir::open("./tables", &options)?;
//!
//! let mut writer = BlockFormat.create_writer(&dir, "t", &options)?;
//! writer.write(b"apple", b"red")?;
//! writer.write(b"banana", b"yellow")?;
//! writer.close()?;
//!
//! let mut seeker = BlockFormat.open_seeker(&dir, "t", &options)?;
//! assert_eq!(seeker.seek(b"b")?.map(|(k, _)| k), Some(b"banana".to_vec()));
//! # Ok(())
//! # }
//! ```

mod plain;

pub use plain::{PlainFormat, PlainReader, PlainSeeker, PlainWriter};

use crate::config::Options;
use crate::error::{Error, Result};
use crate::table::{self, Entry, TableReader, TableSeeker, TableWriter};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory holding table files.
#[derive(Debug, Clone)]
pub struct TableDir {
    root: PathBuf,
}

impl TableDir {
    /// Open the directory at `path`, creating it when `create_if_missing`
    /// is set.
    pub fn open<P: AsRef<Path>>(path: P, options: &Options) -> Result<Self> {
        let root = path.as_ref().to_path_buf();

        if !root.exists() {
            if !options.create_if_missing {
                return Err(Error::invalid_argument(format!(
                    "table directory {:?} does not exist",
                    root
                )));
            }
            fs::create_dir_all(&root)?;
            log::info!("Created table directory {:?}", root);
        } else if !root.is_dir() {
            return Err(Error::invalid_argument(format!("{:?} is not a directory", root)));
        }

        Ok(Self { root })
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Full path of file `name` inside the directory.
    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

/// Base names are single path components.
fn check_base(base: &str) -> Result<()> {
    if base.is_empty() || base == "." || base == ".." || base.contains(['/', '\\']) {
        return Err(Error::invalid_argument(format!("invalid table name {:?}", base)));
    }
    Ok(())
}

/// Write side of a table.
pub trait TableWrite: Send {
    /// Append a record. Keys must arrive in non-decreasing order.
    fn write(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Finish the table. Idempotent.
    fn close(&mut self) -> Result<()>;

    /// Abandon the table, deleting its files unless it was closed.
    fn destroy(&mut self);

    /// Number of records written
    fn num_entries(&self) -> u64;
}

/// Sequential read side of a table.
pub trait TableRead: Send {
    /// The current record, `None` once the table is exhausted.
    fn current(&self) -> Option<(&[u8], &[u8])>;

    /// Move to the next record. Returns `Ok(false)` at the end.
    fn advance(&mut self) -> Result<bool>;
}

/// Random-access side of a table.
pub trait TableSeek: Send {
    /// First record whose key satisfies the monotonic predicate `test`.
    fn find(&mut self, test: &mut dyn FnMut(&[u8]) -> bool) -> Result<Option<Entry>>;

    /// First record with key `>= key`.
    fn seek(&mut self, key: &[u8]) -> Result<Option<Entry>> {
        self.find(&mut |k: &[u8]| k >= key)
    }
}

/// A table file format.
pub trait TableFormat {
    /// Create a new table, truncating any previous one with the same name.
    fn create_writer(&self, dir: &TableDir, base: &str, options: &Options) -> Result<Box<dyn TableWrite>>;

    /// Open a closed table for a front-to-back scan.
    fn open_reader(&self, dir: &TableDir, base: &str, options: &Options) -> Result<Box<dyn TableRead>>;

    /// Open a closed table for predicate searches.
    fn open_seeker(&self, dir: &TableDir, base: &str, options: &Options) -> Result<Box<dyn TableSeek>>;

    /// Delete every file of a table.
    fn remove(&self, dir: &TableDir, base: &str) -> Result<()>;
}

/// The block-compressed table format.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockFormat;

impl TableFormat for BlockFormat {
    fn create_writer(&self, dir: &TableDir, base: &str, options: &Options) -> Result<Box<dyn TableWrite>> {
        check_base(base)?;
        Ok(Box::new(TableWriter::create(dir.path(), base, options.clone())?))
    }

    fn open_reader(&self, dir: &TableDir, base: &str, options: &Options) -> Result<Box<dyn TableRead>> {
        check_base(base)?;
        Ok(Box::new(TableReader::open(dir.path(), base, options)?))
    }

    fn open_seeker(&self, dir: &TableDir, base: &str, options: &Options) -> Result<Box<dyn TableSeek>> {
        check_base(base)?;
        Ok(Box::new(TableSeeker::open(dir.path(), base, options)?))
    }

    fn remove(&self, dir: &TableDir, base: &str) -> Result<()> {
        check_base(base)?;
        table::remove_table(dir.path(), base)
    }
}

impl TableWrite for TableWriter {
    fn write(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        TableWriter::write(self, key, value)
    }

    fn close(&mut self) -> Result<()> {
        TableWriter::close(self)
    }

    fn destroy(&mut self) {
        TableWriter::destroy(self)
    }

    fn num_entries(&self) -> u64 {
        TableWriter::num_entries(self)
    }
}

impl TableRead for TableReader {
    fn current(&self) -> Option<(&[u8], &[u8])> {
        TableReader::current(self)
    }

    fn advance(&mut self) -> Result<bool> {
        TableReader::advance(self)
    }
}

impl TableSeek for TableSeeker {
    fn find(&mut self, test: &mut dyn FnMut(&[u8]) -> bool) -> Result<Option<Entry>> {
        TableSeeker::find(self, test)
    }
}
