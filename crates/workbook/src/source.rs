use crate::error::{ErrorKind, Result};
use calamine::{Reader, open_workbook_auto};
use exn::ResultExt;
use std::path::Path;
use std::sync::Arc;

pub type SheetSourceHandle = Arc<dyn SheetSource + Send + Sync>;

/// Anything that can list the worksheets of a document.
///
/// Sheet lists are never cached: documents sit on removable drives and are
/// edited in place, so every call goes back to the file.
pub trait SheetSource {
    /// Sheet names in workbook order.
    fn sheet_names(&self, document: &Path) -> Result<Vec<String>>;
}

/// Reads sheet names straight out of the workbook container (xlsx, xlsm, xls,
/// ods) without loading any cell data.
#[derive(Debug, Default, Clone, Copy)]
pub struct Calamine;
impl SheetSource for Calamine {
    fn sheet_names(&self, document: &Path) -> Result<Vec<String>> {
        let workbook = open_workbook_auto(document).or_raise(|| ErrorKind::Unreadable(document.to_path_buf()))?;
        Ok(workbook.sheet_names())
    }
}
