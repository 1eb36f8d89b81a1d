//! Library Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Neither a spreadsheet nor an image we know how to show.
    #[display("unsupported document: {}", _0.display())]
    Unsupported(#[error(not(source))] PathBuf),
    /// No worksheet matches the requested page.
    #[display("no sheet for page: {_0}")]
    NoSheet(#[error(not(source))] String),
    /// Conversion ran but produced nothing; details are in the logs.
    #[display("conversion produced no image")]
    Conversion,
    #[display("image could not be decoded: {}", _0.display())]
    Decode(#[error(not(source))] PathBuf),
    #[display("conversion cache unavailable")]
    Cache,
    /// The caller gave up on the request.
    Cancelled,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conversion | Self::Decode(_))
    }
}
