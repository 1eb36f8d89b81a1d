//! On-disk cache of rendered sheet images.
//!
//! The cache directory is flat: every entry is a PNG named after the document
//! basename and sheet, plus a sibling `.meta` file holding the document's
//! modification time (seconds since the epoch, as a float) at the moment the
//! image was produced. Entries are only ever created or overwritten, never
//! pruned.

use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use rslug::slugify;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::TempDir;

pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const IMAGE_EXTENSION: &str = "png";
const METADATA_EXTENSION: &str = "meta";

/// Why a cached image may or may not be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Valid,
    /// No image at the cache path.
    Missing,
    /// The document changed after the image was produced.
    SourceModified,
    /// The image is older than the staleness threshold.
    Stale,
    /// Either the image or the document could not be inspected.
    Unreadable,
}
impl Validity {
    pub fn is_valid(self) -> bool {
        self == Self::Valid
    }
}

#[derive(Debug, Clone)]
pub struct ConversionCache {
    directory: PathBuf,
    stale_after: Duration,
}
impl ConversionCache {
    /// Open (creating if necessary) a cache directory.
    pub fn new(directory: impl Into<PathBuf>, stale_after: Duration) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory).or_raise(|| ErrorKind::Directory(directory.clone()))?;
        if !directory.is_dir() {
            exn::bail!(ErrorKind::Directory(directory));
        }
        Ok(Self { directory, stale_after })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Deterministic cache location for a sheet of a document.
    ///
    /// Only the document *basename* takes part in the key, so two documents
    /// with the same file name in different folders share entries.
    pub fn path_for(&self, document: &Path, sheet: &str) -> PathBuf {
        let basename = document.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        self.directory.join(format!(
            "{}_{}_{}.{IMAGE_EXTENSION}",
            sanitize(&basename, "document"),
            sanitize(sheet, "sheet"),
            short_hash(&basename, sheet),
        ))
    }

    /// Sibling file holding the recorded document modification time.
    pub fn metadata_path(image: &Path) -> PathBuf {
        image.with_extension(METADATA_EXTENSION)
    }

    /// Whether `image` can be served for `document` without reconverting.
    ///
    /// Without a document only existence and staleness are checked. A missing
    /// or unparsable metadata file is treated as "unknown" and does not by
    /// itself invalidate the entry; anything else ambiguous does.
    pub fn validity(&self, image: &Path, document: Option<&Path>) -> Validity {
        let modified = match fs::metadata(image) {
            Ok(meta) if meta.is_file() => meta.modified(),
            Ok(_) => return Validity::Missing,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Validity::Missing,
            Err(err) => {
                tracing::warn!(image = %image.display(), error = %err, "Could not inspect cached image");
                return Validity::Unreadable;
            },
        };
        if let Some(document) = document {
            let Some(current) = modified_secs(document) else {
                tracing::debug!(document = %document.display(), "Source document mtime unavailable");
                return Validity::Unreadable;
            };
            if let Some(recorded) = read_recorded(image)
                && current > recorded
            {
                tracing::info!(document = %document.display(), current, recorded, "Source document modified since conversion");
                return Validity::SourceModified;
            }
        }
        let Ok(modified) = modified else {
            return Validity::Unreadable;
        };
        // A timestamp in the future counts as brand new.
        let age = SystemTime::now().duration_since(modified).unwrap_or_default();
        if age >= self.stale_after {
            tracing::debug!(image = %image.display(), age_secs = age.as_secs(), "Cached image is stale");
            return Validity::Stale;
        }
        Validity::Valid
    }

    pub fn is_valid(&self, image: &Path, document: Option<&Path>) -> bool {
        self.validity(image, document).is_valid()
    }

    /// Remember the document's current modification time for `image`.
    ///
    /// Must only be called once the image is in place.
    pub fn record_metadata(&self, image: &Path, document: &Path) -> Result<()> {
        if !image.is_file() {
            exn::bail!(ErrorKind::MissingImage(image.to_path_buf()));
        }
        let modified = modified_secs(document).ok_or_raise(|| ErrorKind::SourceUnreadable(document.to_path_buf()))?;
        fs::write(Self::metadata_path(image), modified.to_string()).map_err(ErrorKind::Io)?;
        tracing::trace!(image = %image.display(), modified, "Recorded cache metadata");
        Ok(())
    }

    /// Scratch directory inside the cache directory, removed on drop.
    ///
    /// Living on the same filesystem as the cache means finished images can
    /// be renamed into place atomically.
    pub fn work_dir(&self) -> Result<TempDir> {
        Ok(tempfile::Builder::new().prefix(".work-").tempdir_in(&self.directory).map_err(ErrorKind::Io)?)
    }
}

fn sanitize(value: &str, fallback: &str) -> String {
    let slug = slugify!(value);
    if slug.is_empty() { fallback.to_string() } else { slug }
}

fn short_hash(basename: &str, sheet: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(basename.as_bytes());
    hasher.update(&[0]);
    hasher.update(sheet.as_bytes());
    hasher.finalize().to_hex()[..8].to_string()
}

fn modified_secs(path: &Path) -> Option<f64> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(modified.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64())
}

fn read_recorded(image: &Path) -> Option<f64> {
    let path = ConversionCache::metadata_path(image);
    let raw = fs::read_to_string(&path).ok()?;
    match raw.trim().parse() {
        Ok(recorded) => Some(recorded),
        Err(err) => {
            tracing::warn!(metadata = %path.display(), error = %err, "Ignoring unparsable cache metadata");
            None
        },
    }
}
