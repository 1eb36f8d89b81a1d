//! Cache Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The cache directory could not be created or is not a directory.
    #[display("unusable cache directory: {}", _0.display())]
    Directory(#[error(not(source))] PathBuf),
    /// Metadata can only be recorded for an image that exists.
    #[display("cached image missing: {}", _0.display())]
    MissingImage(#[error(not(source))] PathBuf),
    /// The source document's modification time could not be read.
    #[display("source document unreadable: {}", _0.display())]
    SourceUnreadable(#[error(not(source))] PathBuf),
    #[display("I/O error: {_0}")]
    Io(IoError),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::SourceUnreadable(_))
    }
}
