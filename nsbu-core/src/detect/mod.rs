//! Heuristic structure detection
//!
//! Detection never fails. Whatever cannot be found by keyword falls back to a
//! default and is reported as a warning; the extractor decides later whether
//! the descriptor is complete enough to proceed.

pub mod boundaries;
pub mod keywords;

use chrono::{Days, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::ConverterConfig;
use crate::error::ConvertError;
use crate::extract::rules::StatementRules;
use crate::numeric::{Amount, parse_cell};
use crate::reader::{Cell, CellReference, Resolved, Sheet};
use crate::statement::StatementType;
use crate::text::{looks_like_code, normalize};
use crate::warning::{Warning, WarningKind};

pub use boundaries::{SectionBoundaries, SectionSlice, SectionStart};

/// A column holding one period of values
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValueColumn {
    pub col: u32,
    pub label: String,
}

/// Where things are on one sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructureDescriptor {
    pub statement: StatementType,
    pub header_row: Option<u32>,
    pub code_col: Option<u32>,
    pub label_col: Option<u32>,
    /// Start and end columns for balance sheets, period columns otherwise
    pub value_cols: Vec<ValueColumn>,
    pub unit_divisor: u64,
    pub first_data_row: u32,
    /// Last meaningful row (inclusive)
    pub last_row: u32,
    /// Profit and loss section starts
    pub boundaries: Option<SectionBoundaries>,
}

impl StructureDescriptor {
    pub fn periods(&self) -> Vec<String> {
        self.value_cols.iter().map(|c| c.label.clone()).collect()
    }

    pub fn data_rows(&self) -> std::ops::RangeInclusive<u32> {
        self.first_data_row..=self.last_row
    }

    /// Label column, once the mandatory columns are known to be present
    pub fn require_columns(&self, sheet: &str) -> Result<u32, ConvertError> {
        let missing = |column: &'static str| ConvertError::MissingColumns {
            statement: self.statement,
            sheet: sheet.to_string(),
            column,
        };
        let label_col = self.label_col.ok_or_else(|| missing("label"))?;
        if self.value_cols.is_empty() {
            return Err(missing("value"));
        }
        if self.statement == StatementType::BalanceSheet && self.code_col.is_none() {
            return Err(missing("code"));
        }
        Ok(label_col)
    }
}

#[derive(Debug, Clone)]
pub struct Detection {
    pub descriptor: StructureDescriptor,
    pub warnings: Vec<Warning>,
}

#[derive(Default)]
struct HeaderHits {
    code: Vec<(u32, u32)>,
    label: Vec<(u32, u32)>,
    start: Vec<(u32, u32, String)>,
    end: Vec<(u32, u32, String)>,
    /// Period candidates grouped by row
    periods: BTreeMap<u32, Vec<ValueColumn>>,
    unit: Option<u64>,
}

pub fn detect(
    sheet: &Sheet,
    statement: StatementType,
    config: &ConverterConfig,
    rules: &StatementRules,
) -> Detection {
    let rows = sheet.rows_by_index();
    let mut warnings = Vec::new();
    let max_row = sheet.max_row().unwrap_or(0);
    let scan_end = config.header_scan_rows(statement).min(max_row + 1);

    let hits = scan_header(&rows, scan_end, statement);

    let (mut header_row, mut value_cols) = match statement {
        StatementType::BalanceSheet => balance_sheet_value_header(&hits),
        _ => period_value_header(&hits),
    };
    if header_row.is_none() {
        header_row = hits
            .label
            .iter()
            .chain(hits.code.iter())
            .map(|(row, _)| *row)
            .min();
    }

    let code_col = nearest_hit(&hits.code, header_row);
    let label_col = nearest_hit(
        &hits
            .label
            .iter()
            .filter(|hit| !hits.code.contains(hit))
            .copied()
            .collect::<Vec<_>>(),
        header_row,
    );
    value_cols.retain(|v| Some(v.col) != code_col && Some(v.col) != label_col);

    let mut first_data_row = header_row.map(|r| r + 1).unwrap_or(0);
    while rows.get(&first_data_row).is_some_and(|cells| is_numbering_row(cells)) {
        first_data_row += 1;
    }

    let last_row = find_last_row(&rows, first_data_row, max_row);
    let data_rows: Vec<&Vec<&Cell>> = rows
        .range(first_data_row..=last_row.max(first_data_row))
        .map(|(_, cells)| cells)
        .collect();

    let label_col = label_col.or_else(|| {
        let col = fallback_label_col(&data_rows, code_col)?;
        warnings.push(Warning::new(
            WarningKind::DefaultedColumn,
            format!(
                "label column not found by header, using first text column {}",
                CellReference::col_to_letter(col)
            ),
        ));
        Some(col)
    });

    let code_like = fallback_code_col(&data_rows, label_col, &value_cols);
    let code_col = match (code_col, statement) {
        (Some(col), _) => Some(col),
        (None, StatementType::BalanceSheet) => code_like.inspect(|col| {
            warnings.push(Warning::new(
                WarningKind::DefaultedColumn,
                format!(
                    "code column not found by header, using column {} holding line codes",
                    CellReference::col_to_letter(*col)
                ),
            ));
        }),
        (None, _) => None,
    };

    if value_cols.is_empty() {
        let excluded: BTreeSet<u32> = [label_col, code_col, code_like]
            .into_iter()
            .flatten()
            .collect();
        let mut numeric = numeric_columns(&data_rows, label_col, &excluded);
        if statement == StatementType::BalanceSheet && numeric.len() > 2 {
            numeric.drain(..numeric.len() - 2);
        }
        if !numeric.is_empty() {
            warnings.push(Warning::new(
                WarningKind::DefaultedColumn,
                format!(
                    "value columns not found by header, using numeric columns {}",
                    numeric
                        .iter()
                        .map(|c| CellReference::col_to_letter(*c))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            ));
        }
        value_cols = numeric
            .into_iter()
            .map(|col| ValueColumn {
                col,
                label: header_text(&rows, header_row, col)
                    .unwrap_or_else(|| format!("Column {}", CellReference::col_to_letter(col))),
            })
            .collect();
    }

    let unit_divisor = match hits.unit {
        Some(divisor) => divisor,
        None => {
            let divisor = config.default_unit(statement);
            warnings.push(Warning::new(
                WarningKind::MissingUnit,
                format!("no unit of measurement found, assuming x{}", divisor),
            ));
            divisor
        }
    };

    let boundaries = match (statement, label_col) {
        (StatementType::ProfitLoss, Some(col)) => {
            let (bounds, boundary_warnings) = boundaries::resolve_boundaries(
                sheet,
                col,
                first_data_row,
                last_row,
                rules,
                config.other_opex_distance(statement),
            );
            warnings.extend(boundary_warnings);
            Some(bounds)
        }
        _ => None,
    };

    let descriptor = StructureDescriptor {
        statement,
        header_row,
        code_col,
        label_col,
        value_cols,
        unit_divisor,
        first_data_row,
        last_row,
        boundaries,
    };
    tracing::debug!(
        sheet = %sheet.name,
        header_row = ?descriptor.header_row,
        code_col = ?descriptor.code_col,
        label_col = ?descriptor.label_col,
        value_cols = descriptor.value_cols.len(),
        unit_divisor = descriptor.unit_divisor,
        last_row = descriptor.last_row,
        "detected structure"
    );

    Detection {
        descriptor,
        warnings,
    }
}

fn scan_header(
    rows: &BTreeMap<u32, Vec<&Cell>>,
    scan_end: u32,
    statement: StatementType,
) -> HeaderHits {
    let mut hits = HeaderHits::default();

    for (&row, cells) in rows.range(..scan_end) {
        let mut numeric_candidates = Vec::new();
        let mut numeric_cells = 0;

        for cell in cells {
            match cell.value.resolve() {
                Resolved::Text(text) => {
                    let norm = normalize(text);
                    if hits.unit.is_none() {
                        hits.unit = keywords::unit_divisor(&norm);
                    }
                    if keywords::code_header().is_match(&norm) {
                        hits.code.push((row, cell.col));
                    }
                    if keywords::label_header().is_match(&norm) {
                        hits.label.push((row, cell.col));
                    }
                    match statement {
                        StatementType::BalanceSheet => {
                            if keywords::start_header().is_match(&norm) {
                                hits.start.push((row, cell.col, text.trim().to_string()));
                            } else if keywords::end_header().is_match(&norm) {
                                hits.end.push((row, cell.col, text.trim().to_string()));
                            }
                        }
                        _ => {
                            if keywords::is_period_header(&norm) {
                                hits.periods.entry(row).or_default().push(ValueColumn {
                                    col: cell.col,
                                    label: text.trim().to_string(),
                                });
                            }
                        }
                    }
                }
                Resolved::Number(n) if statement != StatementType::BalanceSheet => {
                    numeric_cells += 1;
                    if let Some(label) = numeric_period_label(cell, n) {
                        numeric_candidates.push(ValueColumn {
                            col: cell.col,
                            label,
                        });
                    }
                }
                _ => {}
            }
        }

        // A row of years or dates is a header only when nothing else numeric sits in it
        if !numeric_candidates.is_empty() && numeric_candidates.len() == numeric_cells {
            let entry = hits.periods.entry(row).or_default();
            entry.extend(numeric_candidates);
            entry.sort_by_key(|v| v.col);
        }
    }
    hits
}

fn balance_sheet_value_header(hits: &HeaderHits) -> (Option<u32>, Vec<ValueColumn>) {
    let Some((row, start_col, start_label)) = hits.start.first() else {
        return (None, Vec::new());
    };
    // Prefer an end header on the same row
    let end = hits
        .end
        .iter()
        .find(|(r, c, _)| r == row && c > start_col)
        .or_else(|| hits.end.iter().find(|(_, c, _)| c > start_col));
    match end {
        Some((_, end_col, end_label)) => (
            Some(*row),
            vec![
                ValueColumn {
                    col: *start_col,
                    label: start_label.clone(),
                },
                ValueColumn {
                    col: *end_col,
                    label: end_label.clone(),
                },
            ],
        ),
        None => (Some(*row), Vec::new()),
    }
}

fn period_value_header(hits: &HeaderHits) -> (Option<u32>, Vec<ValueColumn>) {
    let has_column_hit =
        |row: u32| hits.label.iter().chain(hits.code.iter()).any(|(r, _)| *r == row);
    hits.periods
        .iter()
        .max_by_key(|(row, cols)| (cols.len(), has_column_hit(**row), std::cmp::Reverse(**row)))
        .map(|(row, cols)| (Some(*row), cols.clone()))
        .unwrap_or((None, Vec::new()))
}

/// Hit closest to the header row (at most two rows away), else the first one
fn nearest_hit(hits: &[(u32, u32)], header_row: Option<u32>) -> Option<u32> {
    match header_row {
        Some(header) => hits
            .iter()
            .filter(|(row, _)| row.abs_diff(header) <= 2)
            .min_by_key(|(row, col)| (row.abs_diff(header), *col))
            .map(|(_, col)| *col),
        None => hits.first().map(|(_, col)| *col),
    }
}

fn numeric_period_label(cell: &Cell, n: f64) -> Option<String> {
    if cell
        .num_fmt
        .as_deref()
        .is_some_and(keywords::is_date_format)
    {
        return serial_to_month(n);
    }
    if n.fract() == 0.0 && (1990.0..=2100.0).contains(&n) {
        return Some(format!("{}", n as i64));
    }
    None
}

/// Excel date serial to `YYYY-MM`
fn serial_to_month(serial: f64) -> Option<String> {
    if !(1.0..=2_958_465.0).contains(&serial) {
        return None;
    }
    // The 1900 date system counts days from 1899-12-30
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    let date = base.checked_add_days(Days::new(serial.floor() as u64))?;
    Some(date.format("%Y-%m").to_string())
}

/// Column numbering row ("1 2 3 4") printed under the header
fn is_numbering_row(cells: &[&Cell]) -> bool {
    if cells.len() < 2 {
        return false;
    }
    let mut previous = 0i64;
    for cell in cells {
        let n = match cell.value.resolve() {
            Resolved::Number(n) if n.fract() == 0.0 => n as i64,
            Resolved::Text(t) => match t.trim().parse::<i64>() {
                Ok(n) => n,
                Err(_) => return false,
            },
            _ => return false,
        };
        if n <= previous || n > 50 {
            return false;
        }
        previous = n;
    }
    true
}

fn find_last_row(rows: &BTreeMap<u32, Vec<&Cell>>, first_data_row: u32, max_row: u32) -> u32 {
    for (&row, cells) in rows.range(first_data_row..) {
        let footer = cells.iter().any(|cell| match cell.value.resolve() {
            Resolved::Text(t) => keywords::footer_marker().is_match(&normalize(t)),
            _ => false,
        });
        if footer {
            return row.saturating_sub(1).max(first_data_row);
        }
    }
    max_row
}

fn fallback_label_col(data_rows: &[&Vec<&Cell>], code_col: Option<u32>) -> Option<u32> {
    data_rows
        .iter()
        .flat_map(|cells| cells.iter())
        .filter(|cell| Some(cell.col) != code_col)
        .filter(|cell| match cell.value.resolve() {
            Resolved::Text(t) => !looks_like_code(t) && parse_cell(cell).value().is_none(),
            _ => false,
        })
        .map(|cell| cell.col)
        .min()
}

/// Column whose cells are mostly line codes
fn fallback_code_col(
    data_rows: &[&Vec<&Cell>],
    label_col: Option<u32>,
    value_cols: &[ValueColumn],
) -> Option<u32> {
    let mut counts: BTreeMap<u32, (usize, usize)> = BTreeMap::new();
    for cell in data_rows.iter().flat_map(|cells| cells.iter()) {
        if Some(cell.col) == label_col || value_cols.iter().any(|v| v.col == cell.col) {
            continue;
        }
        let code_like = match cell.value.resolve() {
            Resolved::Text(t) => looks_like_code(t),
            Resolved::Number(n) => n.fract() == 0.0 && (1.0..10_000.0).contains(&n),
            _ => false,
        };
        let entry = counts.entry(cell.col).or_default();
        entry.1 += 1;
        if code_like {
            entry.0 += 1;
        }
    }
    let first_value = value_cols.iter().map(|v| v.col).min().unwrap_or(u32::MAX);
    counts
        .into_iter()
        .filter(|(col, (codes, total))| *col < first_value && *codes >= 3 && codes * 10 >= total * 8)
        .max_by_key(|(col, (codes, _))| (*codes, std::cmp::Reverse(*col)))
        .map(|(col, _)| col)
}

/// Columns right of the label holding parseable amounts, left to right
fn numeric_columns(
    data_rows: &[&Vec<&Cell>],
    label_col: Option<u32>,
    excluded: &BTreeSet<u32>,
) -> Vec<u32> {
    let mut cols = BTreeSet::new();
    for cell in data_rows.iter().flat_map(|cells| cells.iter()) {
        if excluded.contains(&cell.col) || label_col.is_some_and(|l| cell.col <= l) {
            continue;
        }
        if matches!(parse_cell(cell), Amount::Value(_))
            && matches!(cell.value.resolve(), Resolved::Number(_))
        {
            cols.insert(cell.col);
        }
    }
    cols.into_iter().collect()
}

fn header_text(
    rows: &BTreeMap<u32, Vec<&Cell>>,
    header_row: Option<u32>,
    col: u32,
) -> Option<String> {
    let cell = rows.get(&header_row?)?.iter().find(|c| c.col == col)?;
    match cell.value.resolve() {
        Resolved::Text(t) => Some(t.trim().to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::rules::RowRules;
    use crate::reader::CellValue;

    fn text(row: u32, col: u32, s: &str) -> Cell {
        Cell::new(row, col, CellValue::text(s))
    }

    fn num(row: u32, col: u32, n: f64) -> Cell {
        Cell::new(row, col, CellValue::number(n))
    }

    fn run(sheet: &Sheet, statement: StatementType) -> Detection {
        let rules = RowRules::builtin().unwrap();
        detect(sheet, statement, &ConverterConfig::default(), rules.get(statement))
    }

    fn balance_sheet() -> Sheet {
        Sheet::from_cells(
            "Баланс",
            vec![
                text(0, 0, "Бухгалтерский баланс"),
                text(1, 0, "Единица измерения: тыс. сум"),
                text(3, 0, "Наименование показателя"),
                text(3, 1, "Код стр."),
                text(3, 2, "На начало отчетного периода"),
                text(3, 3, "На конец отчетного периода"),
                num(4, 0, 1.0),
                num(4, 1, 2.0),
                num(4, 2, 3.0),
                num(4, 3, 4.0),
                text(5, 0, "Основные средства"),
                text(5, 1, "010"),
                num(5, 2, 1000.0),
                num(5, 3, 1200.0),
                text(7, 0, "Руководитель"),
            ],
        )
    }

    #[test]
    fn test_balance_sheet_columns() {
        let detection = run(&balance_sheet(), StatementType::BalanceSheet);
        let d = &detection.descriptor;
        assert_eq!(d.header_row, Some(3));
        assert_eq!(d.label_col, Some(0));
        assert_eq!(d.code_col, Some(1));
        assert_eq!(d.value_cols.iter().map(|v| v.col).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(d.unit_divisor, 1000);
        assert_eq!(d.first_data_row, 5, "numbering row is skipped");
        assert_eq!(d.last_row, 6, "footer ends the data");
        assert!(detection.warnings.is_empty());
    }

    #[test]
    fn test_missing_unit_defaults_to_thousands() {
        let mut sheet = balance_sheet();
        sheet.cells.remove(&(1, 0));
        let detection = run(&sheet, StatementType::BalanceSheet);
        assert_eq!(detection.descriptor.unit_divisor, 1000);
        assert!(
            detection
                .warnings
                .iter()
                .any(|w| w.kind == WarningKind::MissingUnit)
        );
    }

    #[test]
    fn test_period_columns_exclude_totals() {
        let sheet = Sheet::from_cells(
            "PL",
            vec![
                text(0, 0, "в млн. сум"),
                text(2, 0, "Статья"),
                text(2, 1, "Январь 2024"),
                text(2, 2, "Февраль 2024"),
                text(2, 3, "Итого"),
                text(3, 0, "Выручка"),
                num(3, 1, 10.0),
                num(3, 2, 12.0),
                num(3, 3, 22.0),
            ],
        );
        let d = run(&sheet, StatementType::ProfitLoss).descriptor;
        assert_eq!(d.header_row, Some(2));
        assert_eq!(d.periods(), vec!["Январь 2024", "Февраль 2024"]);
        assert_eq!(d.unit_divisor, 1_000_000);
        assert!(d.boundaries.is_some());
    }

    #[test]
    fn test_date_serial_headers() {
        let sheet = Sheet::from_cells(
            "CF",
            vec![
                text(0, 0, "тыс. сум"),
                text(1, 0, "Показатель"),
                num(1, 1, 45292.0).with_num_fmt("mmm-yy"),
                num(1, 2, 45323.0).with_num_fmt("mmm-yy"),
                text(2, 0, "Поступления от покупателей"),
                num(2, 1, 5.0),
                num(2, 2, 6.0),
            ],
        );
        let d = run(&sheet, StatementType::CashFlow).descriptor;
        assert_eq!(d.periods(), vec!["2024-01", "2024-02"]);
        assert_eq!(d.first_data_row, 2);
    }

    #[test]
    fn test_fallback_columns_warn() {
        let sheet = Sheet::from_cells(
            "Sheet1",
            vec![
                text(0, 0, "тыс. сум"),
                text(2, 0, "Основные средства"),
                text(2, 1, "010"),
                num(2, 2, 1000.0),
                num(2, 3, 1200.0),
                text(3, 0, "Запасы"),
                text(3, 1, "150"),
                num(3, 2, 50.0),
                num(3, 3, 60.0),
                text(4, 0, "Денежные средства"),
                text(4, 1, "320"),
                num(4, 2, 5.0),
                num(4, 3, 7.0),
            ],
        );
        let detection = run(&sheet, StatementType::BalanceSheet);
        let d = &detection.descriptor;
        assert_eq!(d.label_col, Some(0));
        assert_eq!(d.code_col, Some(1));
        assert_eq!(d.value_cols.iter().map(|v| v.col).collect::<Vec<_>>(), vec![2, 3]);
        let defaulted = detection
            .warnings
            .iter()
            .filter(|w| w.kind == WarningKind::DefaultedColumn)
            .count();
        assert_eq!(defaulted, 3);
        assert!(d.require_columns("Sheet1").is_ok());
    }

    #[test]
    fn test_missing_value_columns_is_hard_failure() {
        let sheet = Sheet::from_cells("Notes", vec![text(0, 0, "Пояснительная записка")]);
        let d = run(&sheet, StatementType::ProfitLoss).descriptor;
        assert!(matches!(
            d.require_columns("Notes"),
            Err(ConvertError::MissingColumns { column: "value", .. })
        ));
    }

    #[test]
    fn test_serial_to_month() {
        assert_eq!(serial_to_month(45292.0).as_deref(), Some("2024-01"));
        assert_eq!(serial_to_month(45352.0).as_deref(), Some("2024-03"));
        assert_eq!(serial_to_month(2_958_465.0).as_deref(), Some("9999-12"));
        assert_eq!(serial_to_month(-1.0), None);
    }
}
