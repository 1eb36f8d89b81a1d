//! In-memory sheet source for testing.

use crate::SheetSource;
use crate::error::{ErrorKind, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Sheet source backed by a map of document path to sheet names.
///
/// Documents that were never registered behave like unreadable workbooks.
/// Sheet lists can be swapped at runtime with [`MockSheets::set`] to simulate
/// a document being edited on disk.
#[derive(Default)]
pub struct MockSheets {
    documents: Mutex<HashMap<PathBuf, Vec<String>>>,
    reads: AtomicUsize,
}

impl MockSheets {
    pub fn with_document(self, path: impl Into<PathBuf>, sheets: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.set(path, sheets);
        self
    }

    /// Replace the sheet list of a document.
    pub fn set(&self, path: impl Into<PathBuf>, sheets: impl IntoIterator<Item = impl Into<String>>) {
        let sheets = sheets.into_iter().map(Into::into).collect();
        self.documents.lock().unwrap_or_else(|e| e.into_inner()).insert(path.into(), sheets);
    }

    /// How many times a sheet list has been requested.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl SheetSource for MockSheets {
    fn sheet_names(&self, document: &Path) -> Result<Vec<String>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let documents = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        match documents.get(document) {
            Some(sheets) => Ok(sheets.clone()),
            None => exn::bail!(ErrorKind::Unreadable(document.to_path_buf())),
        }
    }
}
