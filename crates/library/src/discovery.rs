//! Finding documents on the mounted drives.
//!
//! The library is laid out as `root / outer folder / inner folder / document`.
//! Every listing here is sorted by path so sweeps are deterministic, and a
//! directory that cannot be read is logged and treated as empty rather than
//! aborting the whole walk.

use kiosk_config::LibraryConfig;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// Rendered through the conversion pipeline.
    Spreadsheet,
    /// Decoded directly.
    Raster,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    spreadsheet_extensions: Vec<String>,
    image_extensions: Vec<String>,
    ignored_folders: Vec<String>,
}
impl Discovery {
    pub fn new(
        spreadsheet_extensions: impl IntoIterator<Item = impl AsRef<str>>,
        image_extensions: impl IntoIterator<Item = impl AsRef<str>>,
        ignored_folders: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Self {
        fn lowered(values: impl IntoIterator<Item = impl AsRef<str>>) -> Vec<String> {
            values.into_iter().map(|v| v.as_ref().trim_start_matches('.').to_lowercase()).collect()
        }
        Self {
            spreadsheet_extensions: lowered(spreadsheet_extensions),
            image_extensions: lowered(image_extensions),
            ignored_folders: lowered(ignored_folders),
        }
    }

    pub fn classify(&self, path: &Path) -> Option<DocumentKind> {
        let extension = path.extension()?.to_str()?.to_lowercase();
        if self.spreadsheet_extensions.contains(&extension) {
            Some(DocumentKind::Spreadsheet)
        } else if self.image_extensions.contains(&extension) {
            Some(DocumentKind::Raster)
        } else {
            None
        }
    }

    pub fn is_ignored(&self, name: &OsStr) -> bool {
        let name = name.to_string_lossy().to_lowercase();
        self.ignored_folders.contains(&name)
    }

    /// Supported documents directly inside `dir`.
    pub fn documents_in(&self, dir: &Path) -> Vec<PathBuf> {
        list(dir).into_iter().filter(|p| p.is_file() && self.classify(p).is_some()).collect()
    }

    /// Spreadsheets directly inside `dir`.
    pub fn spreadsheets_in(&self, dir: &Path) -> Vec<PathBuf> {
        list(dir)
            .into_iter()
            .filter(|p| p.is_file() && self.classify(p) == Some(DocumentKind::Spreadsheet))
            .collect()
    }

    /// Sub-folders of `dir` that are not on the ignore list.
    pub fn folders_in(&self, dir: &Path) -> Vec<PathBuf> {
        list(dir)
            .into_iter()
            .filter(|p| p.is_dir() && !p.file_name().is_some_and(|n| self.is_ignored(n)))
            .collect()
    }

    /// Every spreadsheet under `root`: outer folders, then inner folders, then
    /// documents, each level in sorted order.
    pub fn walk(&self, root: &Path) -> Vec<PathBuf> {
        self.folders_in(root)
            .iter()
            .flat_map(|outer| self.folders_in(outer))
            .flat_map(|inner| self.spreadsheets_in(&inner))
            .collect()
    }
}
impl From<&LibraryConfig> for Discovery {
    fn from(config: &LibraryConfig) -> Self {
        Self::new(&config.spreadsheet_extensions, &config.image_extensions, &config.ignored_folders)
    }
}
impl Default for Discovery {
    fn default() -> Self {
        Self::from(&LibraryConfig::default())
    }
}

fn list(dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(dir = %dir.display(), error = %err, "Could not list directory; skipping");
            return Vec::new();
        },
    };
    let mut paths: Vec<PathBuf> = entries.filter_map(|entry| entry.ok().map(|e| e.path())).collect();
    paths.sort();
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn touch(root: &Path, relative: &str) -> PathBuf {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"").unwrap();
        path
    }

    #[rstest]
    #[case("a.xlsx", Some(DocumentKind::Spreadsheet))]
    #[case("A.XLSX", Some(DocumentKind::Spreadsheet))]
    #[case("b.ods", Some(DocumentKind::Spreadsheet))]
    #[case("c.JPEG", Some(DocumentKind::Raster))]
    #[case("d.bmp", Some(DocumentKind::Raster))]
    #[case("e.pdf", None)]
    #[case("xlsx", None)]
    fn test_classify(#[case] name: &str, #[case] expected: Option<DocumentKind>) {
        assert_eq!(Discovery::default().classify(Path::new(name)), expected);
    }

    #[test]
    fn test_documents_in_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let b = touch(dir.path(), "b.xlsx");
        let a = touch(dir.path(), "a.png");
        touch(dir.path(), "notes.txt");
        fs::create_dir(dir.path().join("c.xlsx")).unwrap();
        let discovery = Discovery::default();
        assert_eq!(discovery.documents_in(dir.path()), [a, b.clone()]);
        assert_eq!(discovery.spreadsheets_in(dir.path()), [b]);
    }

    #[test]
    fn test_walk_order_and_ignored_folders() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let expected = [
            touch(root, "Assembly/Model A/x.xlsx"),
            touch(root, "Assembly/Model A/y.xlsx"),
            touch(root, "Assembly/Model B/a.xlsx"),
            touch(root, "Welding/Model A/z.xlsx"),
        ];
        touch(root, "Assembly/Model B/photo.jpg");
        touch(root, "Assembly/top-level.xlsx");
        touch(root, "System Volume Information/Cache/hidden.xlsx");
        touch(root, "Welding/$RECYCLE.BIN/deleted.xlsx");
        assert_eq!(Discovery::default().walk(root), expected);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let discovery = Discovery::default();
        assert!(discovery.documents_in(&dir.path().join("gone")).is_empty());
        assert!(discovery.walk(&dir.path().join("gone")).is_empty());
    }
}
