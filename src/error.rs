//! Error types for BlockTable.

use std::io;
use thiserror::Error;

/// The result type used throughout BlockTable.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for table operations.
///
/// A seek that matches nothing is not an error: `find` returns `Ok(None)`.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A declared length runs past the bytes actually available.
    #[error("Truncated: {0}")]
    Truncated(String),

    /// Structurally inconsistent data was detected.
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// The block codec rejected its input or could not produce output.
    #[error("Compression error: {0}")]
    Compression(String),

    /// An invalid argument was provided.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The object is in a state that does not allow the operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Creates a new truncation error.
    pub fn truncated(msg: impl Into<String>) -> Self {
        Error::Truncated(msg.into())
    }

    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new compression error.
    pub fn compression(msg: impl Into<String>) -> Self {
        Error::Compression(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Returns true for errors that describe damaged table files.
    pub fn is_data_error(&self) -> bool {
        matches!(self, Error::Truncated(_) | Error::Corruption(_) | Error::Compression(_))
    }
}

impl From<flate2::CompressError> for Error {
    fn from(err: flate2::CompressError) -> Self {
        Error::Compression(err.to_string())
    }
}

impl From<flate2::DecompressError> for Error {
    fn from(err: flate2::DecompressError) -> Self {
        Error::Compression(err.to_string())
    }
}
