//! Worksheet discovery for the kiosk.
//!
//! A document is asked for a logical page ("front", "back") and this crate
//! decides which worksheet that means, by matching ordered, case-insensitive
//! substring patterns against the workbook's sheet names.

pub mod error;
mod label;
#[cfg(any(test, feature = "mock"))]
mod mock;
mod resolver;
mod source;

pub use crate::label::{PageLabel, PagePatterns, resolve};
#[cfg(any(test, feature = "mock"))]
pub use crate::mock::MockSheets;
pub use crate::resolver::SheetResolver;
pub use crate::source::{Calamine, SheetSource, SheetSourceHandle};
