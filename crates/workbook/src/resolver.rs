use crate::error::{ErrorKind, Result};
use crate::label::{PageLabel, PagePatterns, resolve};
use crate::source::SheetSourceHandle;
use exn::OptionExt;
use std::path::Path;

/// Maps a logical page label onto an actual worksheet name.
#[derive(Clone)]
pub struct SheetResolver {
    source: SheetSourceHandle,
    patterns: PagePatterns,
}
impl SheetResolver {
    pub fn new(source: SheetSourceHandle, patterns: PagePatterns) -> Self {
        Self { source, patterns }
    }

    pub fn patterns(&self) -> &PagePatterns {
        &self.patterns
    }

    /// Find the sheet that should be shown for `label`.
    ///
    /// Never fails: an unreadable workbook or a label without any matching
    /// sheet both come back as `None`, with the reason logged.
    pub fn find(&self, document: &Path, label: &PageLabel) -> Option<String> {
        let label = label.for_spreadsheet();
        let patterns = self.patterns.get(&label);
        if patterns.is_empty() {
            tracing::debug!(document = %document.display(), %label, "No sheet patterns configured for page label");
            return None;
        }
        let sheets = match self.source.sheet_names(document) {
            Ok(sheets) => sheets,
            Err(err) => {
                tracing::warn!(document = %document.display(), %label, error = %err, "Could not read sheet names");
                return None;
            },
        };
        let found = resolve(&sheets, patterns).map(str::to_string);
        if found.is_none() {
            tracing::debug!(document = %document.display(), %label, ?sheets, "No sheet matches page label");
        }
        found
    }

    /// Zero-based position of `sheet` in the workbook, read fresh from disk.
    pub fn sheet_index(&self, document: &Path, sheet: &str) -> Result<usize> {
        let sheets = self.source.sheet_names(document)?;
        sheets.iter().position(|s| s == sheet).ok_or_raise(|| ErrorKind::SheetNotFound(sheet.to_string()))
    }
}
