use std::collections::BTreeMap;
use std::fmt;

/// A logical page of a document, as chosen by the viewer.
///
/// Labels are case-insensitive; they are stored lowercased so `"Front"` and
/// `"front"` address the same page and the same memory cache slot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageLabel(String);
impl PageLabel {
    pub const FRONT: &'static str = "front";
    pub const BACK: &'static str = "back";
    /// Generic label used when the selected document may be a plain image.
    pub const IMAGE: &'static str = "image";
    pub const HIDDEN: &'static str = "hidden";

    pub fn new(label: impl AsRef<str>) -> Self {
        Self(label.as_ref().trim().to_lowercase())
    }

    pub fn front() -> Self {
        Self(Self::FRONT.to_string())
    }

    pub fn back() -> Self {
        Self(Self::BACK.to_string())
    }

    pub fn image() -> Self {
        Self(Self::IMAGE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The label whose patterns should be used when looking this one up in a
    /// spreadsheet. Asking a spreadsheet for its "image" means its front page.
    pub fn for_spreadsheet(&self) -> PageLabel {
        if self.0 == Self::IMAGE { Self::front() } else { self.clone() }
    }
}
impl fmt::Display for PageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
impl From<&str> for PageLabel {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}
impl From<String> for PageLabel {
    fn from(label: String) -> Self {
        Self::new(label)
    }
}

/// Ordered sheet-name patterns for each page label.
///
/// Pattern order matters: the first pattern that matches any sheet wins, even
/// if a later pattern would match a sheet that appears earlier in the workbook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagePatterns {
    patterns: BTreeMap<PageLabel, Vec<String>>,
}
impl PagePatterns {
    pub fn empty() -> Self {
        Self { patterns: BTreeMap::new() }
    }

    /// Add (or replace) the patterns for a label. Patterns are lowercased and
    /// blank patterns dropped, because an empty substring matches every sheet.
    pub fn with(mut self, label: impl Into<PageLabel>, patterns: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        let patterns = patterns
            .into_iter()
            .map(|p| p.as_ref().trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        self.patterns.insert(label.into(), patterns);
        self
    }

    pub fn get(&self, label: &PageLabel) -> &[String] {
        self.patterns.get(label).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn labels(&self) -> impl Iterator<Item = &PageLabel> {
        self.patterns.keys()
    }
}
impl Default for PagePatterns {
    fn default() -> Self {
        Self::empty()
            .with(PageLabel::FRONT, ["front", "front page", "proposal"])
            .with(PageLabel::BACK, ["back", "back page"])
            .with(PageLabel::HIDDEN, ["changelog", "revision history"])
    }
}
impl<L: Into<PageLabel>, P: AsRef<str>> FromIterator<(L, Vec<P>)> for PagePatterns {
    fn from_iter<I: IntoIterator<Item = (L, Vec<P>)>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), |patterns, (label, list)| patterns.with(label, list))
    }
}

/// Pick the sheet for an ordered list of (lowercase) patterns.
///
/// Case-insensitive substring containment; pattern order first, then sheet
/// order. `None` when nothing matches.
pub fn resolve<'a>(sheets: &'a [String], patterns: &[String]) -> Option<&'a str> {
    let lowered: Vec<String> = sheets.iter().map(|s| s.to_lowercase()).collect();
    patterns.iter().find_map(|pattern| {
        lowered.iter().position(|sheet| sheet.contains(pattern.as_str())).map(|idx| sheets[idx].as_str())
    })
}
