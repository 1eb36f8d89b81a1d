use crate::discovery::{Discovery, DocumentKind};
use crate::error::{ErrorKind, Result};
use crate::precache::{JobHandle, JobKind, PrecacheScheduler, Scope};
use exn::{OptionExt, ResultExt};
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, RgbaImage};
use kiosk_cache::{ConversionCache, MemoryImageCache};
use kiosk_config::Config;
use kiosk_render::{ConversionPipeline, Outcome, PipelineSettings, ProcessRunner, RunnerHandle, Toolchain};
use kiosk_workbook::{Calamine, PageLabel, SheetResolver, SheetSourceHandle};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Decoded, display-ready page.
pub type Bitmap = Arc<RgbaImage>;

/// Memory cache key: one document page as the viewer asked for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub document: PathBuf,
    pub label: PageLabel,
}
impl PageKey {
    pub fn new(document: impl Into<PathBuf>, label: impl Into<PageLabel>) -> Self {
        Self { document: document.into(), label: label.into() }
    }
}

/// Everything the display layer talks to.
///
/// Safe to share between the UI thread and display workers: the memory cache
/// sits behind a mutex here, the pipeline serializes itself and the scheduler
/// guards its own jobs.
pub struct Kiosk {
    pipeline: ConversionPipeline,
    discovery: Discovery,
    memory: Mutex<MemoryImageCache<PageKey, Bitmap>>,
    scheduler: PrecacheScheduler,
    max_dimension: u32,
}
impl Kiosk {
    /// Wire up real workbooks and real external tools.
    pub fn from_config(config: &Config) -> Result<Self> {
        let conversion = &config.conversion;
        let toolchain = Toolchain::discover(&conversion.converter, &conversion.rasterizer, &conversion.fallback);
        Self::new(config, Arc::new(Calamine), Arc::new(ProcessRunner), toolchain)
    }

    pub fn new(config: &Config, sheets: SheetSourceHandle, runner: RunnerHandle, toolchain: Toolchain) -> Result<Self> {
        let cache =
            ConversionCache::new(&config.cache.directory, config.cache.stale_after()).or_raise(|| ErrorKind::Cache)?;
        let resolver = SheetResolver::new(sheets, config.page_patterns());
        let conversion = &config.conversion;
        let settings = PipelineSettings {
            converter_timeout: Duration::from_secs(conversion.converter_timeout_secs),
            rasterizer_timeout: Duration::from_secs(conversion.rasterizer_timeout_secs),
            fallback_timeout: Duration::from_secs(conversion.fallback_timeout_secs),
            primary_dpi: conversion.primary_dpi,
            fallback_dpi: conversion.fallback_dpi,
        };
        let pipeline = ConversionPipeline::new(cache, resolver, runner, toolchain, settings);
        Ok(Self::with_pipeline(config, pipeline))
    }

    /// Build around an existing pipeline (and therefore its lock).
    pub fn with_pipeline(config: &Config, pipeline: ConversionPipeline) -> Self {
        let discovery = Discovery::from(&config.library);
        let scheduler = PrecacheScheduler::new(
            pipeline.clone(),
            discovery.clone(),
            config.precache.labels(),
            config.precache.pacing(),
            config.precache.join_timeout(),
        );
        Self {
            pipeline,
            discovery,
            memory: Mutex::new(MemoryImageCache::new(config.cache.memory_capacity)),
            scheduler,
            max_dimension: config.cache.max_image_dimension,
        }
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    pub fn pipeline(&self) -> &ConversionPipeline {
        &self.pipeline
    }

    pub fn scheduler(&self) -> &PrecacheScheduler {
        &self.scheduler
    }

    /// Worksheet that holds `label` of `document`, if any.
    pub fn resolve_page(&self, document: &Path, label: &PageLabel) -> Option<String> {
        self.pipeline.resolver().find(document, label)
    }

    /// Path of an up-to-date image of `sheet`, converting it if necessary.
    pub fn ensure_converted(&self, document: &Path, sheet: &str, cancel: &CancellationToken) -> Option<PathBuf> {
        self.convert(document, sheet, cancel).into_path()
    }

    /// Like [`Kiosk::ensure_converted`], keeping the reason there is no image.
    pub fn convert(&self, document: &Path, sheet: &str, cancel: &CancellationToken) -> Outcome {
        self.pipeline.convert(document, sheet, cancel)
    }

    pub fn mem_cache_get(&self, key: &PageKey) -> Option<Bitmap> {
        self.memory.lock().unwrap_or_else(|e| e.into_inner()).get(key).cloned()
    }

    pub fn mem_cache_put(&self, key: PageKey, bitmap: Bitmap) {
        let evicted = self.memory.lock().unwrap_or_else(|e| e.into_inner()).put(key, bitmap);
        if let Some((key, _)) = evicted {
            tracing::trace!(document = %key.document.display(), label = %key.label, "Evicted page from memory cache");
        }
    }

    pub fn start_precache(&self, scope: Scope, kind: JobKind) -> JobHandle {
        self.scheduler.start(kind, scope)
    }

    pub fn cancel(&self, handle: &JobHandle) {
        self.scheduler.cancel(handle);
    }

    /// The whole display path for one page: memory cache, then (for
    /// spreadsheets) resolve and convert, then decode and scale down.
    #[instrument(skip_all, fields(document = %document.display(), label = %label))]
    pub fn load_page(&self, document: &Path, label: &PageLabel, cancel: &CancellationToken) -> Result<Bitmap> {
        let key = PageKey::new(document, label.clone());
        if let Some(bitmap) = self.mem_cache_get(&key) {
            tracing::debug!("Memory cache hit");
            return Ok(bitmap);
        }
        let image = match self.discovery.classify(document) {
            Some(DocumentKind::Raster) => document.to_path_buf(),
            Some(DocumentKind::Spreadsheet) => {
                let sheet = self.resolve_page(document, label).ok_or_raise(|| ErrorKind::NoSheet(label.to_string()))?;
                match self.convert(document, &sheet, cancel) {
                    Outcome::Cached(path) | Outcome::Converted(path) => path,
                    Outcome::Cancelled => exn::bail!(ErrorKind::Cancelled),
                    Outcome::Failed(err) => return Err(err.raise(ErrorKind::Conversion)),
                }
            },
            None => exn::bail!(ErrorKind::Unsupported(document.to_path_buf())),
        };
        if cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        let bitmap: Bitmap = Arc::new(decode(&image, self.max_dimension)?);
        self.mem_cache_put(key, bitmap.clone());
        Ok(bitmap)
    }

    /// Cancel all precache jobs and wait briefly for them.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}

/// Decode an image file, scaling it down (never up) to fit `max_dimension`.
pub fn decode(path: &Path, max_dimension: u32) -> Result<RgbaImage> {
    let decoded = ImageReader::open(path)
        .or_raise(|| ErrorKind::Decode(path.to_path_buf()))?
        .with_guessed_format()
        .or_raise(|| ErrorKind::Decode(path.to_path_buf()))?
        .decode()
        .or_raise(|| ErrorKind::Decode(path.to_path_buf()))?;
    Ok(fit(decoded, max_dimension, max_dimension).into_rgba8())
}

/// Scale `image` down to fit inside `width` x `height`, keeping its aspect ratio.
pub fn fit(image: DynamicImage, width: u32, height: u32) -> DynamicImage {
    if image.width() <= width && image.height() <= height {
        return image;
    }
    image.resize(width.max(1), height.max(1), FilterType::Lanczos3)
}
