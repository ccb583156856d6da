//! # BlockTable - Block-Compressed Sorted Tables
//!
//! BlockTable stores an immutable, sorted sequence of key-value records in a
//! small set of files: one compressed data stream plus a sparse, multi-level
//! index tree. Tables are written once, then either scanned front to back or
//! searched with a monotonic predicate.
//!
//! ## Architecture
//!
//! - **Writer**: appends records, compressing them as one DEFLATE stream
//!   with a restart point every `fanout` records, and builds the index tree
//! - **Reader**: streams every record in order through one decompressor
//! - **Seeker**: descends the index tree with positional reads and inflates
//!   only the block that can hold the answer
//! - **Block Cache**: keeps recently inflated blocks per seeker
//! - **Formats**: the block format and an uncompressed plain format behind
//!   one [`TableFormat`](format::TableFormat) trait
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use blocktable::{Options, TableReader, TableSeeker, TableWriter};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), blocktable::Error> {
//! let options = Options::default().fanout(16);
//! let dir = Path::new("./tables");
//!
//! // Write a table
//! let mut writer = TableWriter::create(dir, "fruit", options.clone())?;
//! writer.write(b"apple", b"red")?;
//! writer.write(b"banana", b"yellow")?;
//! writer.write(b"cherry", b"red")?;
//! writer.close()?;
//!
//! // Scan it
//! let mut reader = TableReader::open(dir, "fruit", &options)?;
//! while let Some((key, value)) = reader.current() {
//!     println!("{:?} => {:?}", key, value);
//!     reader.advance()?;
//! }
//!
//! // Seek into it
//! let mut seeker = TableSeeker::open(dir, "fruit", &options)?;
//! if let Some(value) = seeker.get(b"banana")? {
//!     println!("Found: {:?}", value);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod cache;
pub mod config;
pub mod error;
pub mod format;
pub mod table;

// Re-exports
pub use cache::CacheStats;
pub use config::Options;
pub use error::{Error, Result};
pub use format::{BlockFormat, PlainFormat, TableDir, TableFormat, TableRead, TableSeek, TableWrite};
pub use table::{remove_table, Entry, Metadata, TableReader, TableSeeker, TableWriter};
