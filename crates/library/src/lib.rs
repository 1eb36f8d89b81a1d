//! The kiosk's document library.
//!
//! Ties the lower crates together for the display layer: finding documents on
//! the drives, loading a page (memory cache, conversion, decode), keeping the
//! conversion cache warm with precache jobs, and noticing when drives change.

mod availability;
mod discovery;
pub mod error;
mod kiosk;
mod precache;

pub use crate::availability::{Availability, AvailabilityWatcher};
pub use crate::discovery::{Discovery, DocumentKind};
pub use crate::kiosk::{Bitmap, Kiosk, PageKey, decode, fit};
pub use crate::precache::{JobHandle, JobKind, JobSummary, PrecacheScheduler, Scope};
