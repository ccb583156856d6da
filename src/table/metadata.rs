//! Table metadata sidecar (`<base>.info`).
//!
//! A newline-terminated text file with one `key: value` pair per line:
//!
//! ```text
//! entries: 3
//! key-bytes: 3
//! data-bytes: 3
//! compressed-size: 29
//! n-index-levels: 1
//! fanout: 64
//! ```

use crate::error::{Error, Result};
use std::fmt::Write as _;
use std::fs::File;
use std::io::Write;
use std::path::Path;

const ENTRIES: &str = "entries";
const KEY_BYTES: &str = "key-bytes";
const DATA_BYTES: &str = "data-bytes";
const COMPRESSED_SIZE: &str = "compressed-size";
const INDEX_LEVELS: &str = "n-index-levels";
const FANOUT: &str = "fanout";

/// Totals and tree shape of a closed table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Number of records
    pub entries: u64,
    /// Sum of key lengths
    pub key_bytes: u64,
    /// Sum of value lengths
    pub data_bytes: u64,
    /// Length of the compressed data file
    pub compressed_size: u64,
    /// Number of index levels (at least 1)
    pub index_levels: u32,
    /// Records per block and children per index entry
    pub fanout: u32,
}

impl Metadata {
    /// Number of level 0 entries (blocks) implied by the totals.
    pub fn block_count(&self) -> u64 {
        if self.fanout == 0 {
            return 0;
        }
        self.entries.div_ceil(self.fanout as u64)
    }

    /// Render the text form.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (key, value) in [
            (ENTRIES, self.entries),
            (KEY_BYTES, self.key_bytes),
            (DATA_BYTES, self.data_bytes),
            (COMPRESSED_SIZE, self.compressed_size),
            (INDEX_LEVELS, self.index_levels as u64),
            (FANOUT, self.fanout as u64),
        ] {
            // Writing to a String cannot fail.
            let _ = writeln!(out, "{}: {}", key, value);
        }
        out
    }

    /// Parse the text form.
    pub fn decode(text: &str) -> Result<Self> {
        if !text.is_empty() && !text.ends_with('\n') {
            return Err(Error::truncated("metadata does not end with a newline"));
        }

        let mut entries = None;
        let mut key_bytes = None;
        let mut data_bytes = None;
        let mut compressed_size = None;
        let mut index_levels = None;
        let mut fanout = None;

        for (lineno, line) in text.lines().enumerate() {
            let (key, value) = line.split_once(": ").ok_or_else(|| {
                Error::corruption(format!("metadata line {}: expected `key: value`", lineno + 1))
            })?;
            let slot = match key {
                ENTRIES => &mut entries,
                KEY_BYTES => &mut key_bytes,
                DATA_BYTES => &mut data_bytes,
                COMPRESSED_SIZE => &mut compressed_size,
                INDEX_LEVELS => &mut index_levels,
                FANOUT => &mut fanout,
                other => {
                    log::debug!("Ignoring unknown metadata key {:?}", other);
                    continue;
                }
            };
            let value: u64 = value.trim().parse().map_err(|_| {
                Error::corruption(format!("metadata line {}: bad number {:?}", lineno + 1, value))
            })?;
            *slot = Some(value);
        }

        let require = |value: Option<u64>, key: &str| {
            value.ok_or_else(|| Error::corruption(format!("metadata is missing `{}`", key)))
        };
        let narrow = |value: u64, key: &str| {
            u32::try_from(value)
                .map_err(|_| Error::corruption(format!("metadata `{}` out of range: {}", key, value)))
        };

        let meta = Self {
            entries: require(entries, ENTRIES)?,
            key_bytes: require(key_bytes, KEY_BYTES)?,
            data_bytes: require(data_bytes, DATA_BYTES)?,
            compressed_size: require(compressed_size, COMPRESSED_SIZE)?,
            index_levels: narrow(require(index_levels, INDEX_LEVELS)?, INDEX_LEVELS)?,
            fanout: narrow(require(fanout, FANOUT)?, FANOUT)?,
        };

        if meta.fanout < 2 {
            return Err(Error::corruption(format!("metadata fanout {} is below 2", meta.fanout)));
        }
        if meta.index_levels == 0 {
            return Err(Error::corruption("metadata declares zero index levels"));
        }
        Ok(meta)
    }

    /// Read and parse the metadata file at `path`.
    pub fn read_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::decode(&text)
    }

    /// Write the metadata file at `path`.
    pub fn write_to(&self, path: &Path, sync: bool) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(self.encode().as_bytes())?;
        if sync {
            file.sync_all()?;
        }
        Ok(())
    }
}
