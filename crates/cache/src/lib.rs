//! Page image caching for the kiosk.
//!
//! Two layers: [`ConversionCache`] addresses rendered sheet images on disk and
//! decides whether they can still be served, and [`MemoryImageCache`] keeps the
//! last few decoded, display-ready bitmaps around for instant navigation.

mod disk;
pub mod error;
mod memory;

pub use crate::disk::{ConversionCache, DEFAULT_STALE_AFTER, Validity};
pub use crate::memory::MemoryImageCache;
