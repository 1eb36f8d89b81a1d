//! Workbook Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A workbook error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for workbook operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The document could not be opened or parsed as a workbook.
    #[display("unreadable workbook: {}", _0.display())]
    Unreadable(#[error(not(source))] PathBuf),
    /// The workbook no longer contains the requested sheet.
    #[display("sheet not found: {_0}")]
    SheetNotFound(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    ///
    /// Documents live on removable drives and are edited externally, so an
    /// unreadable workbook may simply be mid-save.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreadable(_))
    }
}
