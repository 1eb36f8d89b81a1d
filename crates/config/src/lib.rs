//! Kiosk configuration.
//!
//! Layers, lowest priority first:
//!
//! 1. Built-in defaults ([`Config::default`])
//! 2. A config file: `--config <path>` if given, otherwise `kiosk.toml` in the
//!    platform config directory. `.yaml`/`.yml` and `.json` files are read
//!    according to their extension.
//! 3. Environment variables prefixed `KIOSK_`, with `__` separating sections:
//!    `KIOSK_CACHE__MEMORY_CAPACITY=4`.

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use kiosk_workbook::{PageLabel, PagePatterns};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APPLICATION: &str = "kiosk";
const CONFIG_FILE: &str = "kiosk.toml";
const ENV_PREFIX: &str = "KIOSK_";
const PACING_RANGE_MILLIS: (u64, u64) = (100, 500);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub library: LibraryConfig,
    pub cache: CacheConfig,
    pub conversion: ConversionConfig,
    pub precache: PrecacheConfig,
    /// Page label to ordered sheet-name patterns.
    pub pages: BTreeMap<String, Vec<String>>,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            library: LibraryConfig::default(),
            cache: CacheConfig::default(),
            conversion: ConversionConfig::default(),
            precache: PrecacheConfig::default(),
            pages: BTreeMap::from([
                (PageLabel::FRONT.to_string(), strings(["front", "front page", "proposal"])),
                (PageLabel::BACK.to_string(), strings(["back", "back page"])),
                (PageLabel::HIDDEN.to_string(), strings(["changelog", "revision history"])),
            ]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Mount point under which every drive appears.
    pub root: PathBuf,
    /// Folder names (case-insensitive) never descended into.
    pub ignored_folders: Vec<String>,
    pub spreadsheet_extensions: Vec<String>,
    pub image_extensions: Vec<String>,
    pub poll_interval_secs: u64,
}
impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/media/pi"),
            ignored_folders: strings(["system volume information", "$recycle.bin"]),
            spreadsheet_extensions: strings(["xlsx", "xlsm", "xls", "ods"]),
            image_extensions: strings(["png", "jpg", "jpeg", "gif", "bmp"]),
            poll_interval_secs: 30,
        }
    }
}
impl LibraryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub directory: PathBuf,
    pub stale_after_days: u64,
    /// Number of decoded pages kept in memory.
    pub memory_capacity: usize,
    /// Longest edge, in pixels, of a decoded page.
    pub max_image_dimension: u32,
}
impl Default for CacheConfig {
    fn default() -> Self {
        let directory = ProjectDirs::from("", "", APPLICATION)
            .map(|dirs| dirs.cache_dir().to_path_buf())
            .unwrap_or_else(|| std::env::temp_dir().join(APPLICATION))
            .join("conversions");
        Self { directory, stale_after_days: 7, memory_capacity: 2, max_image_dimension: 1920 }
    }
}
impl CacheConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_days * 24 * 60 * 60)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Candidate executables, first one found on `PATH` wins.
    pub converter: Vec<String>,
    pub rasterizer: Vec<String>,
    pub fallback: Vec<String>,
    pub converter_timeout_secs: u64,
    pub rasterizer_timeout_secs: u64,
    pub fallback_timeout_secs: u64,
    pub primary_dpi: u32,
    pub fallback_dpi: u32,
}
impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            converter: strings(["libreoffice", "soffice"]),
            rasterizer: strings(["pdftoppm"]),
            fallback: strings(["convert", "magick"]),
            converter_timeout_secs: 45,
            rasterizer_timeout_secs: 30,
            fallback_timeout_secs: 30,
            primary_dpi: 150,
            fallback_dpi: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecacheConfig {
    /// Page labels rendered for every document during a sweep.
    pub labels: Vec<String>,
    /// Pause between background conversions.
    pub pacing_millis: u64,
    /// How long to wait for a superseded job to wind down.
    pub join_timeout_millis: u64,
}
impl Default for PrecacheConfig {
    fn default() -> Self {
        Self {
            labels: strings([PageLabel::FRONT, PageLabel::BACK]),
            pacing_millis: 300,
            join_timeout_millis: 1500,
        }
    }
}
impl PrecacheConfig {
    /// Clamped into the 100-500ms band; anything faster starves navigation.
    pub fn pacing(&self) -> Duration {
        let (min, max) = PACING_RANGE_MILLIS;
        Duration::from_millis(self.pacing_millis.clamp(min, max))
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_millis)
    }

    pub fn labels(&self) -> Vec<PageLabel> {
        self.labels.iter().map(PageLabel::new).collect()
    }
}

impl Config {
    /// Load the layered configuration; `file` overrides the default location.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let file = match file {
            Some(path) if !path.is_file() => exn::bail!(ErrorKind::NotFound(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_file(),
        };
        tracing::debug!(file = ?file, "Loading configuration");
        let config: Config = Self::figment(file.as_deref()).extract().or_raise(|| ErrorKind::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// `kiosk.toml` in the platform config directory, if there is one.
    pub fn default_file() -> Option<PathBuf> {
        ProjectDirs::from("", "", APPLICATION).map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Every configuration layer, unextracted.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(file) = file {
            let extension = file.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
            figment = match extension.as_deref() {
                Some("yaml" | "yml") => figment.merge(Yaml::file(file)),
                Some("json") => figment.merge(Json::file(file)),
                _ => figment.merge(Toml::file(file)),
            };
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| -> Result<()> { exn::bail!(ErrorKind::Invalid(message)) };
        if self.cache.memory_capacity == 0 {
            return invalid("cache.memory_capacity must be at least 1".into());
        }
        if self.cache.max_image_dimension == 0 {
            return invalid("cache.max_image_dimension must be at least 1".into());
        }
        if self.cache.stale_after_days == 0 {
            return invalid("cache.stale_after_days must be at least 1".into());
        }
        let conversion = &self.conversion;
        for (name, value) in [
            ("converter_timeout_secs", conversion.converter_timeout_secs),
            ("rasterizer_timeout_secs", conversion.rasterizer_timeout_secs),
            ("fallback_timeout_secs", conversion.fallback_timeout_secs),
            ("primary_dpi", conversion.primary_dpi.into()),
            ("fallback_dpi", conversion.fallback_dpi.into()),
        ] {
            if value == 0 {
                return invalid(format!("conversion.{name} must be greater than zero"));
            }
        }
        for (name, candidates) in
            [("converter", &conversion.converter), ("rasterizer", &conversion.rasterizer), ("fallback", &conversion.fallback)]
        {
            if candidates.iter().all(|c| c.trim().is_empty()) {
                return invalid(format!("conversion.{name} needs at least one executable name"));
            }
        }
        let patterns = self.page_patterns();
        for label in self.precache.labels() {
            if patterns.get(&label).is_empty() {
                return invalid(format!("precache label `{label}` has no page patterns"));
            }
        }
        Ok(())
    }

    pub fn page_patterns(&self) -> PagePatterns {
        self.pages.iter().map(|(label, patterns)| (label.as_str(), patterns.clone())).collect()
    }
}

fn strings<const N: usize>(values: [&str; N]) -> Vec<String> {
    values.into_iter().map(String::from).collect()
}
