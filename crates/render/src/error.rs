//! Render Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! None of these escape [`ConversionPipeline::convert`](crate::ConversionPipeline::convert);
//! they end up inside [`Outcome::Failed`](crate::Outcome::Failed) and the logs.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A render error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for render operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// External tool could not be started (usually not installed).
    #[display("{_0} could not be started")]
    ToolUnavailable(#[error(not(source))] String),
    /// External tool was killed after running past its deadline.
    #[display("{_0} timed out")]
    ToolTimeout(#[error(not(source))] String),
    /// External tool exited with a non-zero code. No code means it was killed by a signal.
    #[display("{tool} exited unsuccessfully (code: {code:?})")]
    ToolFailed { tool: String, code: Option<i32> },
    /// A tool reported success but did not leave its output behind.
    #[display("expected output missing: {}", _0.display())]
    MissingOutput(#[error(not(source))] PathBuf),
    /// The requested sheet is not (or no longer) in the workbook.
    #[display("sheet not found: {_0}")]
    SheetNotFound(#[error(not(source))] String),
    #[display("workbook could not be read")]
    Workbook,
    #[display("conversion cache unavailable")]
    Cache,
    /// The caller no longer wants the result.
    Cancelled,
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
    ///
    /// LibreOffice in particular times out or crashes on a cold start far more
    /// often than it fails on a document.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ToolTimeout(_) | Self::ToolFailed { .. } | Self::Workbook | Self::Io(_))
    }
}
