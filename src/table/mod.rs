//! Block-compressed table implementation.
//!
//! A table is an immutable, sorted sequence of key-value records split into
//! blocks of `fanout` records. Blocks are compressed as one DEFLATE stream
//! with a restart point at every block boundary, so any block can be
//! inflated on its own. A sparse fanout tree of index levels maps keys to
//! blocks.
//!
//! ## File Set
//!
//! ```text
//! <base>         // compressed data stream
//! <base>.info    // metadata: totals and tree shape
//! <base>.000i    // level 0 index: one 24-byte entry per block
//! <base>.000h    // level 0 heap: first key of every block
//! <base>.001i    // level 1 index: one 12-byte entry per fanout group
//! <base>.001h    // level 1 heap
//! ...
//! ```
//!
//! ## Record Frame
//!
//! ```text
//! [key_len: u32][value_len: u32][key][value]
//! ```
//!
//! All integers are little-endian.

pub mod codec;
pub mod file;
pub mod frame;
pub mod index;
pub mod metadata;
pub mod reader;
pub mod search;
pub mod seeker;
pub mod writer;

pub use metadata::Metadata;
pub use reader::TableReader;
pub use seeker::{Entry, TableSeeker};
pub use writer::TableWriter;

use crate::error::Result;
use std::path::Path;

/// Name of the metadata file for `base`.
pub fn info_file_name(base: &str) -> String {
    format!("{}.info", base)
}

/// Name of the index file of `level` for `base`.
pub fn index_file_name(base: &str, level: usize) -> String {
    format!("{}.{:03}i", base, level)
}

/// Name of the heap file of `level` for `base`.
pub fn heap_file_name(base: &str, level: usize) -> String {
    format!("{}.{:03}h", base, level)
}

/// Delete every file of the table `base` in `dir`.
///
/// The level count comes from the metadata when it is readable; otherwise
/// level files are removed until the first missing index file.
pub fn remove_table(dir: &Path, base: &str) -> Result<()> {
    let levels = Metadata::read_from(&dir.join(info_file_name(base)))
        .map(|meta| meta.index_levels as usize)
        .ok();

    let mut level = 0;
    loop {
        let index = dir.join(index_file_name(base, level));
        let done = match levels {
            Some(n) => level >= n,
            None => !index.exists(),
        };
        if done {
            break;
        }
        file::remove_if_exists(&index)?;
        file::remove_if_exists(&dir.join(heap_file_name(base, level)))?;
        level += 1;
    }

    file::remove_if_exists(&dir.join(base))?;
    file::remove_if_exists(&dir.join(info_file_name(base)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_names() {
        assert_eq!(info_file_name("t"), "t.info");
        assert_eq!(index_file_name("t", 0), "t.000i");
        assert_eq!(heap_file_name("t", 12), "t.012h");
    }
}
