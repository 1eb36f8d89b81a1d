//! Spreadsheet sheet rendering through external tools.
//!
//! A sheet goes office suite -> PDF -> rasterizer -> PNG, with ImageMagick
//! standing in when the rasterizer fails. All of it happens under one
//! process-wide [`ConversionLock`], and results land in a
//! [`ConversionCache`](kiosk_cache::ConversionCache).

pub mod error;
#[cfg(any(test, feature = "mock"))]
mod mock;
mod pipeline;
mod runner;
mod toolchain;

#[cfg(any(test, feature = "mock"))]
pub use crate::mock::{Behaviour, MockRunner};
pub use crate::pipeline::{ConversionLock, ConversionPipeline, Outcome, PipelineSettings};
pub use crate::runner::{ProcessRunner, RunnerHandle, ToolRunner};
pub use crate::toolchain::{Invocation, Tool, Toolchain};
pub use tokio_util::sync::CancellationToken;
