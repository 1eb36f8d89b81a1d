use crate::error::{Error, ErrorKind, Result};
use crate::runner::RunnerHandle;
use crate::toolchain::Toolchain;
use exn::{OptionExt, ResultExt};
use kiosk_cache::ConversionCache;
use kiosk_workbook::SheetResolver;
use kiosk_workbook::error::ErrorKind as WorkbookErrorKind;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

static GLOBAL_LOCK: LazyLock<ConversionLock> = LazyLock::new(ConversionLock::new);

/// Serializes every external tool invocation in the process.
///
/// The office suite shares a user profile between instances and falls over
/// when two conversions overlap, so only one pipeline run may be inside the
/// lock at a time.
#[derive(Debug, Clone, Default)]
pub struct ConversionLock(Arc<Mutex<()>>);
impl ConversionLock {
    /// A lock independent of the process-wide one. Mostly for tests.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> Self {
        GLOBAL_LOCK.clone()
    }

    fn acquire(&self) -> MutexGuard<'_, ()> {
        // The guarded data is `()`: a panic mid-conversion leaves nothing to repair.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Timeouts and resolutions for the external tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub converter_timeout: Duration,
    pub rasterizer_timeout: Duration,
    pub fallback_timeout: Duration,
    pub primary_dpi: u32,
    pub fallback_dpi: u32,
}
impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            converter_timeout: Duration::from_secs(45),
            rasterizer_timeout: Duration::from_secs(30),
            fallback_timeout: Duration::from_secs(30),
            primary_dpi: 150,
            fallback_dpi: 100,
        }
    }
}

/// Result of asking for a converted sheet image.
#[derive(Debug)]
pub enum Outcome {
    /// A valid image was already on disk; no tools ran.
    Cached(PathBuf),
    /// The image was (re)produced by this call.
    Converted(PathBuf),
    /// The cancellation token fired before a result was produced.
    Cancelled,
    Failed(Error),
}
impl Outcome {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Cached(path) | Self::Converted(path) => Some(path),
            Self::Cancelled | Self::Failed(_) => None,
        }
    }

    pub fn into_path(self) -> Option<PathBuf> {
        match self {
            Self::Cached(path) | Self::Converted(path) => Some(path),
            Self::Cancelled | Self::Failed(_) => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Spreadsheet sheet to cached PNG, one conversion at a time.
#[derive(Clone)]
pub struct ConversionPipeline {
    cache: ConversionCache,
    resolver: SheetResolver,
    runner: RunnerHandle,
    toolchain: Toolchain,
    settings: PipelineSettings,
    lock: ConversionLock,
}
impl ConversionPipeline {
    pub fn new(
        cache: ConversionCache,
        resolver: SheetResolver,
        runner: RunnerHandle,
        toolchain: Toolchain,
        settings: PipelineSettings,
    ) -> Self {
        Self { cache, resolver, runner, toolchain, settings, lock: ConversionLock::global() }
    }

    /// Serialize against a different lock than the process-wide one.
    pub fn with_lock(mut self, lock: ConversionLock) -> Self {
        self.lock = lock;
        self
    }

    pub fn cache(&self) -> &ConversionCache {
        &self.cache
    }

    pub fn resolver(&self) -> &SheetResolver {
        &self.resolver
    }

    /// Make sure `sheet` of `document` is rendered in the cache.
    ///
    /// Never fails outright: tool errors, timeouts and missing sheets become
    /// [`Outcome::Failed`] (and a log line), a fired token becomes
    /// [`Outcome::Cancelled`]. Cancellation is checked before taking the lock,
    /// before starting any tool and after every tool; a tool that is already
    /// running is left to finish or time out.
    #[instrument(skip_all, fields(document = %document.display(), sheet = %sheet))]
    pub fn convert(&self, document: &Path, sheet: &str, cancel: &CancellationToken) -> Outcome {
        match self.convert_inner(document, sheet, cancel) {
            Ok(outcome) => outcome,
            Err(err) if matches!(&*err, ErrorKind::Cancelled) => {
                tracing::debug!("Conversion cancelled");
                Outcome::Cancelled
            },
            Err(err) => {
                tracing::warn!(error = ?err, "Conversion failed");
                Outcome::Failed(err)
            },
        }
    }

    fn convert_inner(&self, document: &Path, sheet: &str, cancel: &CancellationToken) -> Result<Outcome> {
        checkpoint(cancel)?;
        let image = self.cache.path_for(document, sheet);
        let _guard = self.lock.acquire();
        // Someone else may have converted it while we were waiting.
        if self.cache.is_valid(&image, Some(document)) {
            tracing::debug!(image = %image.display(), "Cache hit");
            return Ok(Outcome::Cached(image));
        }
        let index = self.resolver.sheet_index(document, sheet).map_err(|err| {
            let kind = match &*err {
                WorkbookErrorKind::SheetNotFound(name) => ErrorKind::SheetNotFound(name.clone()),
                WorkbookErrorKind::Unreadable(_) => ErrorKind::Workbook,
            };
            err.raise(kind)
        })?;
        checkpoint(cancel)?;

        tracing::info!(index, image = %image.display(), "Converting sheet");
        let work = self.cache.work_dir().or_raise(|| ErrorKind::Cache)?;
        let pdf = self.export_pdf(document, work.path())?;
        checkpoint(cancel)?;

        let rendered = work.path().join("page.png");
        let prefix = rendered.with_extension("");
        let raster = self.toolchain.rasterize(&pdf, index, self.settings.primary_dpi, &prefix);
        if let Err(err) = self.runner.execute(&raster, self.settings.rasterizer_timeout) {
            tracing::warn!(error = ?err, "Rasterizer failed; trying fallback");
            checkpoint(cancel)?;
            let _ = fs::remove_file(&rendered);
            let fallback = self.toolchain.fallback(&pdf, index, self.settings.fallback_dpi, &rendered);
            self.runner.execute(&fallback, self.settings.fallback_timeout)?;
        }
        checkpoint(cancel)?;

        if !rendered.is_file() {
            exn::bail!(ErrorKind::MissingOutput(rendered));
        }
        fs::rename(&rendered, &image).map_err(ErrorKind::Io)?;
        self.cache.record_metadata(&image, document).or_raise(|| ErrorKind::Cache)?;
        tracing::info!(image = %image.display(), "Sheet converted");
        Ok(Outcome::Converted(image))
    }

    /// Run the office suite and return the PDF it produced.
    fn export_pdf(&self, document: &Path, outdir: &Path) -> Result<PathBuf> {
        let invocation = self.toolchain.convert_to_pdf(document, outdir);
        self.runner.execute(&invocation, self.settings.converter_timeout)?;
        let mut pdfs: Vec<PathBuf> = fs::read_dir(outdir)
            .map_err(ErrorKind::Io)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("pdf")))
            .collect();
        pdfs.sort();
        pdfs.into_iter().next().ok_or_raise(|| ErrorKind::MissingOutput(outdir.to_path_buf()))
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        exn::bail!(ErrorKind::Cancelled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Behaviour, MockRunner};
    use crate::toolchain::Tool;
    use kiosk_cache::{DEFAULT_STALE_AFTER, Validity};
    use kiosk_workbook::{MockSheets, PagePatterns};
    use std::thread;
    use std::time::SystemTime;

    struct Fixture {
        _dir: tempfile::TempDir,
        document: PathBuf,
        runner: Arc<MockRunner>,
        pipeline: ConversionPipeline,
    }

    fn fixture(runner: MockRunner) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let document = dir.path().join("Model 7.xlsx");
        fs::write(&document, b"workbook").unwrap();
        let sheets = MockSheets::default().with_document(&document, ["Cover", "Front Page", "Back"]);
        let resolver = SheetResolver::new(Arc::new(sheets), PagePatterns::default());
        let cache = ConversionCache::new(dir.path().join("cache"), DEFAULT_STALE_AFTER).unwrap();
        let runner = Arc::new(runner);
        let pipeline =
            ConversionPipeline::new(cache, resolver, runner.clone(), MockRunner::toolchain(), PipelineSettings::default())
                .with_lock(ConversionLock::new());
        Fixture { _dir: dir, document, runner, pipeline }
    }

    fn leftovers(cache: &ConversionCache) -> Vec<String> {
        fs::read_dir(cache.directory())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|name| name.starts_with(".work-"))
            .collect()
    }

    #[test]
    fn test_convert_then_cached() {
        let f = fixture(MockRunner::default());
        let cancel = CancellationToken::new();
        let first = f.pipeline.convert(&f.document, "Back", &cancel);
        let Outcome::Converted(image) = first else { panic!("expected conversion, got {first:?}") };
        assert!(image.is_file());
        assert!(ConversionCache::metadata_path(&image).is_file());
        assert_eq!(f.pipeline.cache().validity(&image, Some(&f.document)), Validity::Valid);
        assert_eq!(f.runner.calls_to(Tool::Converter), 1);
        assert_eq!(f.runner.calls_to(Tool::Rasterizer), 1);

        let second = f.pipeline.convert(&f.document, "Back", &cancel);
        assert_eq!(second.path(), Some(image.as_path()));
        assert!(matches!(second, Outcome::Cached(_)));
        assert_eq!(f.runner.calls().len(), 2);
        assert!(leftovers(f.pipeline.cache()).is_empty());
    }

    #[test]
    fn test_rasterizer_gets_sheet_position() {
        let f = fixture(MockRunner::default());
        f.pipeline.convert(&f.document, "Back", &CancellationToken::new()).into_path().unwrap();
        let raster = f.runner.calls().into_iter().find(|c| c.tool == Tool::Rasterizer).unwrap();
        assert_eq!(raster.value_of("-f"), Some(Path::new("3")));
        assert_eq!(raster.value_of("-r"), Some(Path::new("150")));
    }

    #[test]
    fn test_source_change_reconverts() {
        let f = fixture(MockRunner::default());
        let cancel = CancellationToken::new();
        fs::File::options()
            .write(true)
            .open(&f.document)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(600))
            .unwrap();
        assert!(matches!(f.pipeline.convert(&f.document, "Front Page", &cancel), Outcome::Converted(_)));
        fs::File::options().write(true).open(&f.document).unwrap().set_modified(SystemTime::now()).unwrap();
        assert!(matches!(f.pipeline.convert(&f.document, "Front Page", &cancel), Outcome::Converted(_)));
        assert_eq!(f.runner.calls_to(Tool::Converter), 2);
    }

    #[rstest::rstest]
    #[case(Behaviour::Fail)]
    #[case(Behaviour::TimeOut)]
    fn test_rasterizer_failure_uses_fallback(#[case] behaviour: Behaviour) {
        let f = fixture(MockRunner::default().with_behaviour(Tool::Rasterizer, behaviour));
        let outcome = f.pipeline.convert(&f.document, "Cover", &CancellationToken::new());
        assert!(matches!(outcome, Outcome::Converted(_)), "{outcome:?}");
        let fallback = f.runner.calls().into_iter().find(|c| c.tool == Tool::Fallback).unwrap();
        assert_eq!(fallback.value_of("-density"), Some(Path::new("100")));
    }

    #[test]
    fn test_fallback_failure_fails() {
        let runner = MockRunner::default()
            .with_behaviour(Tool::Rasterizer, Behaviour::Fail)
            .with_behaviour(Tool::Fallback, Behaviour::Fail);
        let f = fixture(runner);
        let outcome = f.pipeline.convert(&f.document, "Cover", &CancellationToken::new());
        let Outcome::Failed(err) = outcome else { panic!("expected failure, got {outcome:?}") };
        assert!(matches!(&*err, ErrorKind::ToolFailed { .. }));
        assert_eq!(f.runner.calls_to(Tool::Fallback), 1);
        let image = f.pipeline.cache().path_for(&f.document, "Cover");
        assert!(!image.exists());
        assert!(!ConversionCache::metadata_path(&image).exists());
        assert!(leftovers(f.pipeline.cache()).is_empty());
    }

    #[test]
    fn test_fallback_timeout_fails() {
        let runner = MockRunner::default()
            .with_behaviour(Tool::Rasterizer, Behaviour::Fail)
            .with_behaviour(Tool::Fallback, Behaviour::TimeOut);
        let f = fixture(runner);
        let outcome = f.pipeline.convert(&f.document, "Cover", &CancellationToken::new());
        assert!(matches!(&outcome, Outcome::Failed(err) if matches!(&**err, ErrorKind::ToolTimeout(_))), "{outcome:?}");
        assert_eq!(f.runner.calls_to(Tool::Fallback), 1);
        assert!(!ConversionCache::metadata_path(&f.pipeline.cache().path_for(&f.document, "Cover")).exists());
    }

    #[test]
    fn test_cancelled_after_rasterizer_failure_skips_fallback() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let runner = MockRunner::default().with_behaviour(Tool::Rasterizer, Behaviour::Fail).with_hook(move |inv| {
            if inv.tool == Tool::Rasterizer {
                trigger.cancel();
            }
        });
        let f = fixture(runner);
        assert!(f.pipeline.convert(&f.document, "Cover", &cancel).is_cancelled());
        assert_eq!(f.runner.calls_to(Tool::Rasterizer), 1);
        assert_eq!(f.runner.calls_to(Tool::Fallback), 0);
        let image = f.pipeline.cache().path_for(&f.document, "Cover");
        assert!(!image.exists());
        assert!(!ConversionCache::metadata_path(&image).exists());
        assert!(leftovers(f.pipeline.cache()).is_empty());
    }

    #[test]
    fn test_converter_timeout_skips_rasterizer() {
        let f = fixture(MockRunner::default().with_behaviour(Tool::Converter, Behaviour::TimeOut));
        let outcome = f.pipeline.convert(&f.document, "Cover", &CancellationToken::new());
        let Outcome::Failed(err) = outcome else { panic!("expected failure, got {outcome:?}") };
        assert!(matches!(&*err, ErrorKind::ToolTimeout(_)));
        assert_eq!(f.runner.calls().len(), 1);
    }

    #[test]
    fn test_missing_pdf_fails() {
        let f = fixture(MockRunner::default().with_behaviour(Tool::Converter, Behaviour::NoOutput));
        let outcome = f.pipeline.convert(&f.document, "Cover", &CancellationToken::new());
        assert!(matches!(&outcome, Outcome::Failed(err) if matches!(&**err, ErrorKind::MissingOutput(_))));
    }

    #[test]
    fn test_unknown_sheet_fails_without_tools() {
        let f = fixture(MockRunner::default());
        let outcome = f.pipeline.convert(&f.document, "Notes", &CancellationToken::new());
        assert!(matches!(&outcome, Outcome::Failed(err) if matches!(&**err, ErrorKind::SheetNotFound(_))));
        assert!(f.runner.calls().is_empty());
    }

    #[test]
    fn test_cancelled_before_start() {
        let f = fixture(MockRunner::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(f.pipeline.convert(&f.document, "Cover", &cancel).is_cancelled());
        assert!(f.runner.calls().is_empty());
    }

    #[test]
    fn test_cancelled_mid_conversion_writes_nothing() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let f = fixture(MockRunner::default().with_hook(move |inv| {
            if inv.tool == Tool::Converter {
                trigger.cancel();
            }
        }));
        assert!(f.pipeline.convert(&f.document, "Cover", &cancel).is_cancelled());
        assert_eq!(f.runner.calls_to(Tool::Converter), 1);
        assert_eq!(f.runner.calls_to(Tool::Rasterizer), 0);
        let image = f.pipeline.cache().path_for(&f.document, "Cover");
        assert!(!image.exists());
        assert!(!ConversionCache::metadata_path(&image).exists());
        assert!(leftovers(f.pipeline.cache()).is_empty());
    }

    #[test]
    fn test_one_tool_at_a_time() {
        let f = fixture(MockRunner::default().with_delay(Duration::from_millis(20)));
        let pipeline = Arc::new(f.pipeline);
        let handles: Vec<_> = ["Cover", "Front Page", "Back", "Cover", "Back"]
            .into_iter()
            .map(|sheet| {
                let pipeline = pipeline.clone();
                let document = f.document.clone();
                thread::spawn(move || pipeline.convert(&document, sheet, &CancellationToken::new()).into_path())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap().is_some());
        }
        assert_eq!(f.runner.max_concurrency(), 1);
        // Duplicate requests were served from the cache once the lock freed up.
        assert_eq!(f.runner.calls_to(Tool::Converter), 3);
    }
}
