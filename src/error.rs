//! CLI Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

/// What went wrong, at the granularity a shell user cares about.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("configuration could not be loaded")]
    Config,
    #[display("kiosk could not be started")]
    Startup,
    #[display("no sheet for page `{_0}`")]
    NoSheet(#[error(not(source))] String),
    #[display("could not convert {}", _0.display())]
    Conversion(#[error(not(source))] PathBuf),
    #[display("interrupted")]
    Interrupted,
}
