//! Workbook data structures

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// Represents a complete workbook
#[derive(Debug, Clone, Default)]
pub struct Workbook {
    pub path: PathBuf,
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    /// Get a sheet by name
    pub fn get_sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    /// Visible sheets that hold at least one non-empty cell, in workbook order
    pub fn readable_sheets(&self) -> impl Iterator<Item = &Sheet> {
        self.sheets
            .iter()
            .filter(|s| s.visible && s.last_data_cell().is_some())
    }
}

/// Represents a worksheet
#[derive(Debug, Clone, Default)]
pub struct Sheet {
    pub name: String,
    pub cells: HashMap<(u32, u32), Cell>,
    /// False for sheets whose workbook state is hidden or veryHidden
    pub visible: bool,
}

impl Sheet {
    pub fn new(name: String) -> Self {
        Self {
            name,
            cells: HashMap::new(),
            visible: true,
        }
    }

    /// Build a sheet from already normalized cells
    pub fn from_cells(name: impl Into<String>, cells: impl IntoIterator<Item = Cell>) -> Self {
        let mut sheet = Self::new(name.into());
        for cell in cells {
            sheet.cells.insert((cell.row, cell.col), cell);
        }
        sheet
    }

    /// Get a cell at the given position
    pub fn get_cell(&self, row: u32, col: u32) -> Option<&Cell> {
        self.cells.get(&(row, col))
    }

    /// Non-empty cells grouped by row, each row ordered by column
    pub fn rows_by_index(&self) -> BTreeMap<u32, Vec<&Cell>> {
        let mut rows: BTreeMap<u32, Vec<&Cell>> = BTreeMap::new();
        for cell in self.cells.values().filter(|c| !c.value.is_empty()) {
            rows.entry(cell.row).or_default().push(cell);
        }
        for cells in rows.values_mut() {
            cells.sort_by_key(|c| c.col);
        }
        rows
    }

    /// Text of a cell after value resolution, if it resolves to non-blank text
    pub fn text_at(&self, row: u32, col: u32) -> Option<&str> {
        match self.get_cell(row, col)?.value.resolve() {
            Resolved::Text(t) if !t.trim().is_empty() => Some(t),
            _ => None,
        }
    }

    /// Index of the last row holding a non-empty cell
    pub fn max_row(&self) -> Option<u32> {
        self.last_data_cell().map(|(r, _)| r)
    }

    /// Get the last cell with actual data (bottom-right corner of data range)
    pub fn last_data_cell(&self) -> Option<(u32, u32)> {
        let non_empty_cells: Vec<_> = self
            .cells
            .values()
            .filter(|c| !c.value.is_empty())
            .collect();

        if non_empty_cells.is_empty() {
            return None;
        }

        // Find the maximum row and maximum column independently
        let max_row = non_empty_cells.iter().map(|c| c.row).max()?;
        let max_col = non_empty_cells.iter().map(|c| c.col).max()?;

        Some((max_row, max_col))
    }
}

/// Represents a single cell
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cell {
    pub row: u32,
    pub col: u32,
    pub value: CellValue,
    /// Raw `<v>` text as stored in the file (cached result for formula cells)
    pub raw: Option<String>,
    pub num_fmt: Option<String>,
    /// Font of the cell style is bold
    pub bold: bool,
    /// Alignment indent level of the cell style
    pub indent: u8,
}

impl Cell {
    pub fn new(row: u32, col: u32, value: CellValue) -> Self {
        Self {
            row,
            col,
            value,
            ..Default::default()
        }
    }

    pub fn bold(mut self) -> Self {
        self.bold = true;
        self
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = Some(raw.into());
        self
    }

    pub fn with_num_fmt(mut self, fmt: impl Into<String>) -> Self {
        self.num_fmt = Some(fmt.into());
        self
    }
}

/// Primitive value held by a cell or produced by a formula
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Scalar {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    Boolean(bool),
    Error(String),
}

/// Cell value shapes produced by the reader
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Plain(Scalar),
    /// Shared string made of several formatted runs, concatenated
    RichText(String),
    /// Formula with its cached result; the formula text is never evaluated
    Formula { formula: String, result: Scalar },
    Hyperlink { text: String, target: Option<String> },
}

impl Default for CellValue {
    fn default() -> Self {
        CellValue::Plain(Scalar::Empty)
    }
}

/// A cell value reduced to the shape consumers work with
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolved<'a> {
    Empty,
    Number(f64),
    Text(&'a str),
    Boolean(bool),
    Error(&'a str),
}

impl CellValue {
    pub fn number(n: f64) -> Self {
        CellValue::Plain(Scalar::Number(n))
    }

    pub fn text(s: impl Into<String>) -> Self {
        CellValue::Plain(Scalar::Text(s.into()))
    }

    /// Create a formula cell with a cached result
    pub fn formula(f: impl Into<String>, result: Scalar) -> Self {
        CellValue::Formula {
            formula: f.into(),
            result,
        }
    }

    /// Resolve the value every consumer should see
    pub fn resolve(&self) -> Resolved<'_> {
        let scalar = match self {
            CellValue::Plain(s) => s,
            CellValue::Formula { result, .. } => result,
            CellValue::RichText(t) => return Resolved::Text(t),
            CellValue::Hyperlink { text, .. } => return Resolved::Text(text),
        };
        match scalar {
            Scalar::Empty => Resolved::Empty,
            Scalar::Number(n) => Resolved::Number(*n),
            Scalar::Text(t) => Resolved::Text(t),
            Scalar::Boolean(b) => Resolved::Boolean(*b),
            Scalar::Error(e) => Resolved::Error(e),
        }
    }

    /// Check if the cell is empty
    pub fn is_empty(&self) -> bool {
        match self.resolve() {
            Resolved::Empty => true,
            Resolved::Text(t) => t.trim().is_empty(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formula_resolves_to_cached_result() {
        let value = CellValue::formula("SUM(B2:B4)", Scalar::Number(42.0));
        assert_eq!(value.resolve(), Resolved::Number(42.0));
        assert!(!value.is_empty());
    }

    #[test]
    fn test_rich_text_and_hyperlink_resolve_to_text() {
        assert_eq!(
            CellValue::RichText("Выручка".into()).resolve(),
            Resolved::Text("Выручка")
        );
        let link = CellValue::Hyperlink {
            text: "Note 5".into(),
            target: Some("#Notes!A1".into()),
        };
        assert_eq!(link.resolve(), Resolved::Text("Note 5"));
    }

    #[test]
    fn test_blank_text_is_empty() {
        assert!(CellValue::text("   ").is_empty());
        assert!(!CellValue::number(0.0).is_empty());
    }

    #[test]
    fn test_rows_are_column_ordered() {
        let sheet = Sheet::from_cells(
            "BS",
            vec![
                Cell::new(3, 2, CellValue::number(5.0)),
                Cell::new(3, 0, CellValue::text("a")),
                Cell::new(4, 1, CellValue::text("b")),
            ],
        );
        let rows = sheet.rows_by_index();
        let cols: Vec<u32> = rows[&3].iter().map(|c| c.col).collect();
        assert_eq!(cols, vec![0, 2]);
        assert_eq!(sheet.max_row(), Some(4));
        assert_eq!(sheet.last_data_cell(), Some((4, 2)));
    }
}
