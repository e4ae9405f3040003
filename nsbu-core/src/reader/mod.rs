//! XLSX reader producing the normalized per-sheet cell grid

use anyhow::{Context, Result};

use std::fs::File;
use std::path::Path;
use zip::ZipArchive;

pub mod parser_utils;
pub mod workbook;
pub mod xlsx_parser;

use self::xlsx_parser::XlsxReader;
pub use parser_utils::CellReference;
pub use workbook::{Cell, CellValue, Resolved, Scalar, Sheet, Workbook};

/// Trait for spreadsheet format readers
pub trait WorkbookReader {
    fn read_sheets(&mut self) -> Result<Vec<Sheet>>;
}

/// Read a workbook from a file path
pub fn read_workbook<P: AsRef<Path>>(path: P) -> Result<Workbook> {
    let path_ref = path.as_ref();

    let is_xlsx = path_ref
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.eq_ignore_ascii_case("xlsx") || s.eq_ignore_ascii_case("xlsm"))
        .unwrap_or(false);
    if !is_xlsx {
        return Err(anyhow::anyhow!(
            "Unsupported file format: {}",
            path_ref.display()
        ));
    }

    let file = File::open(path_ref)
        .with_context(|| format!("Failed to open file: {}", path_ref.display()))?;
    let mut archive = ZipArchive::new(file).context("Failed to open zip archive")?;

    let mut reader = XlsxReader::new(&mut archive)?;
    let sheets = reader.read_sheets()?;

    tracing::debug!(
        path = %path_ref.display(),
        sheets = sheets.len(),
        hidden = sheets.iter().filter(|s| !s.visible).count(),
        "workbook read"
    );

    Ok(Workbook {
        path: path_ref.to_path_buf(),
        sheets,
    })
}
