//! Statement line extraction
//!
//! Extractors walk the data rows of a detected sheet and turn them into
//! [`LineItem`]s. They are pure apart from polling the cancellation token.

pub mod balance_sheet;
pub mod cash_flow;
pub mod profit_loss;
pub mod rules;

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::cancel::CancellationToken;
use crate::config::ConverterConfig;
use crate::detect::StructureDescriptor;
use crate::error::ConvertError;
use crate::numeric::{Amount, parse_cell, scale_factor};
use crate::reader::{Cell, CellReference, Sheet};
use crate::statement::StatementType;
use crate::warning::{Warning, WarningKind};

pub use rules::{RowRules, StatementRules};

/// Identity of an extracted line within one statement
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKey {
    /// Line code or four-digit account code
    Code(String),
    Label {
        section: String,
        tag: Option<String>,
        label: String,
    },
    Bucket { section: String, bucket: String },
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKey::Code(code) => write!(f, "code {}", code),
            ItemKey::Label {
                section,
                tag: Some(tag),
                label,
            } => write!(f, "{}/{} '{}'", section, tag, label),
            ItemKey::Label { section, label, .. } => write!(f, "{} '{}'", section, label),
            ItemKey::Bucket { section, bucket } => write!(f, "{}/{}", section, bucket),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineItem {
    pub key: ItemKey,
    pub label: String,
    /// One entry per value column; `None` for blank cells
    pub period_values: Vec<Option<Decimal>>,
    pub is_subheader: bool,
    /// First source row (0-based)
    pub row: u32,
}

impl LineItem {
    pub fn amount(&self, period: usize) -> Decimal {
        self.period_values
            .get(period)
            .copied()
            .flatten()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn has_values(&self) -> bool {
        self.period_values.iter().any(|v| v.is_some())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RowStats {
    /// Non-empty rows visited
    pub scanned: usize,
    /// Rows that became leaf items
    pub leaves: usize,
    /// Rows merged into another item or dropped
    pub changes: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub items: Vec<LineItem>,
    pub warnings: Vec<Warning>,
    pub stats: RowStats,
}

impl Extraction {
    pub fn leaves(&self) -> impl Iterator<Item = &LineItem> {
        self.items.iter().filter(|i| !i.is_subheader)
    }
}

/// Leaf accumulation keeping one item per key
#[derive(Default)]
pub(crate) struct ItemSet {
    extraction: Extraction,
    index: HashMap<ItemKey, usize>,
}

impl ItemSet {
    pub(crate) fn warn(&mut self, warning: Warning) {
        self.extraction.warnings.push(warning);
    }

    pub(crate) fn scanned(&mut self) {
        self.extraction.stats.scanned += 1;
    }

    pub(crate) fn dropped(&mut self) {
        self.extraction.stats.changes += 1;
    }

    /// Register a subheader unless its key is already taken
    pub(crate) fn subheader(&mut self, key: ItemKey, label: &str, row: u32, periods: usize) {
        if self.index.contains_key(&key) {
            return;
        }
        self.insert(LineItem {
            key,
            label: label.to_string(),
            period_values: vec![None; periods],
            is_subheader: true,
            row,
        });
    }

    /// Add a leaf; a repeated key is merged into the first one with a warning.
    /// A subheader holding the same key becomes the leaf.
    pub(crate) fn leaf(&mut self, item: LineItem) {
        self.extraction.stats.leaves += 1;
        match self.index.get(&item.key).copied() {
            Some(existing) if self.extraction.items[existing].is_subheader => {
                self.promote(existing, item)
            }
            Some(existing) => {
                self.warn(
                    Warning::new(
                        WarningKind::DuplicateItem,
                        format!(
                            "{} repeats at row {}, values merged into row {}",
                            item.key,
                            item.row + 1,
                            self.extraction.items[existing].row + 1
                        ),
                    )
                    .at_row(item.row),
                );
                self.merge_into(existing, &item.period_values);
            }
            None => self.insert(item),
        }
    }

    /// Add a leaf whose key is expected to repeat (bucket accumulation)
    pub(crate) fn accumulate(&mut self, item: LineItem) {
        self.extraction.stats.leaves += 1;
        match self.index.get(&item.key).copied() {
            Some(existing) if self.extraction.items[existing].is_subheader => {
                self.promote(existing, item)
            }
            Some(existing) => self.merge_into(existing, &item.period_values),
            None => self.insert(item),
        }
    }

    fn promote(&mut self, existing: usize, item: LineItem) {
        tracing::trace!(row = item.row, key = %item.key, "subheader replaced by leaf");
        self.extraction.stats.changes += 1;
        self.extraction.items[existing] = item;
    }

    fn insert(&mut self, item: LineItem) {
        self.index.insert(item.key.clone(), self.extraction.items.len());
        self.extraction.items.push(item);
    }

    fn merge_into(&mut self, existing: usize, values: &[Option<Decimal>]) {
        self.extraction.stats.changes += 1;
        let target = &mut self.extraction.items[existing].period_values;
        for (slot, value) in target.iter_mut().zip(values) {
            if let Some(v) = value {
                *slot = Some(slot.unwrap_or(Decimal::ZERO).saturating_add(*v));
            }
        }
    }

    pub(crate) fn finish(self) -> Extraction {
        self.extraction
    }
}

/// Per-sheet state shared by the row walks
pub(crate) struct RowWalk<'a> {
    pub sheet: &'a Sheet,
    pub descriptor: &'a StructureDescriptor,
    pub label_col: u32,
    pub rows: BTreeMap<u32, Vec<&'a Cell>>,
    scale: Decimal,
    token: &'a CancellationToken,
    interval: usize,
    visited: usize,
}

impl<'a> RowWalk<'a> {
    pub(crate) fn new(
        sheet: &'a Sheet,
        descriptor: &'a StructureDescriptor,
        label_col: u32,
        config: &ConverterConfig,
        token: &'a CancellationToken,
    ) -> Self {
        let statement = descriptor.statement;
        Self {
            sheet,
            descriptor,
            label_col,
            rows: sheet.rows_by_index(),
            scale: scale_factor(descriptor.unit_divisor, config.target_unit(statement)),
            token,
            interval: config.cancel_check_interval(statement),
            visited: 0,
        }
    }

    pub(crate) fn periods(&self) -> usize {
        self.descriptor.value_cols.len()
    }

    /// Non-empty rows within `range`
    pub(crate) fn row_indices(&self, range: std::ops::RangeInclusive<u32>) -> Vec<u32> {
        if range.is_empty() {
            return Vec::new();
        }
        self.rows.range(range).map(|(row, _)| *row).collect()
    }

    /// Poll the token every `cancel_check_interval` rows
    pub(crate) fn poll(&mut self) -> Result<(), ConvertError> {
        if self.visited % self.interval == 0 && self.token.is_cancelled() {
            tracing::debug!(sheet = %self.sheet.name, row = self.visited, "cancelled");
            return Err(ConvertError::Cancelled);
        }
        self.visited += 1;
        Ok(())
    }

    pub(crate) fn label(&self, row: u32) -> Option<&'a str> {
        self.sheet.text_at(row, self.label_col).map(str::trim)
    }

    pub(crate) fn is_bold(&self, row: u32) -> bool {
        self.sheet
            .get_cell(row, self.label_col)
            .is_some_and(|c| c.bold)
    }

    /// A helper row carries -1 in its first numeric value cell
    pub(crate) fn is_helper_row(&self, row: u32) -> bool {
        self.descriptor
            .value_cols
            .iter()
            .filter_map(|v| self.sheet.get_cell(row, v.col))
            .find_map(|cell| parse_cell(cell).value())
            .is_some_and(|v| v == Decimal::NEGATIVE_ONE)
    }

    /// Scaled values of every value column
    pub(crate) fn values(&self, row: u32, items: &mut ItemSet) -> Vec<Option<Decimal>> {
        self.descriptor
            .value_cols
            .iter()
            .map(|v| {
                let cell = self.sheet.get_cell(row, v.col)?;
                let reason = match parse_cell(cell) {
                    Amount::Empty => return None,
                    Amount::Value(d) => match d.checked_mul(self.scale) {
                        Some(scaled) => return Some(scaled),
                        None => format!("{} is out of range once scaled", d),
                    },
                    Amount::Invalid(text) => format!("'{}' is not a number", text),
                };
                items.warn(
                    Warning::new(
                        WarningKind::UnparsedCell,
                        format!("{}: {}, read as 0", CellReference::new(row, v.col), reason),
                    )
                    .at_row(row),
                );
                Some(Decimal::ZERO)
            })
            .collect()
    }
}

/// Values as magnitudes (expense sections and outflows)
pub(crate) fn magnitudes(values: Vec<Option<Decimal>>) -> Vec<Option<Decimal>> {
    values.into_iter().map(|v| v.map(|d| d.abs())).collect()
}

/// Extract the line items of one sheet
pub fn extract(
    sheet: &Sheet,
    descriptor: &StructureDescriptor,
    rules: &StatementRules,
    config: &ConverterConfig,
    token: &CancellationToken,
) -> Result<Extraction, ConvertError> {
    let label_col = descriptor.require_columns(&sheet.name)?;
    let mut walk = RowWalk::new(sheet, descriptor, label_col, config, token);
    let extraction = match descriptor.statement {
        StatementType::BalanceSheet => balance_sheet::extract(&mut walk, rules)?,
        StatementType::CashFlow => cash_flow::extract(&mut walk, rules)?,
        StatementType::ProfitLoss => profit_loss::extract(&mut walk, rules)?,
    };
    tracing::debug!(
        sheet = %sheet.name,
        items = extraction.items.len(),
        leaves = extraction.stats.leaves,
        warnings = extraction.warnings.len(),
        "extracted line items"
    );
    Ok(extraction)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::detect::detect;
    use crate::reader::CellValue;
    use rust_decimal_macros::dec;

    fn sheet() -> Sheet {
        Sheet::from_cells(
            "Баланс",
            vec![
                text(0, 0, "тыс. сум"),
                text(1, 0, "Актив"),
                text(1, 1, "Код стр."),
                text(1, 2, "На начало года"),
                text(1, 3, "На конец года"),
                text(2, 0, "Основные средства"),
                text(2, 1, "010"),
                num(2, 2, 1000.0),
                num(2, 3, 1200.0),
                text(3, 0, "Служебная строка"),
                text(3, 1, "020"),
                num(3, 2, -1.0),
                num(3, 3, 5.0),
                text(4, 0, "Запасы"),
                text(4, 1, "150"),
                text(4, 2, "n/a"),
                num(4, 3, 7.0),
            ],
        )
    }

    fn run(sheet: &Sheet, token: &CancellationToken) -> Result<Extraction, ConvertError> {
        let config = ConverterConfig::default();
        let rules = RowRules::builtin().unwrap();
        let st = StatementType::BalanceSheet;
        let detection = detect(sheet, st, &config, rules.get(st));
        extract(sheet, &detection.descriptor, rules.get(st), &config, token)
    }

    #[test]
    fn test_helper_rows_are_dropped() {
        let extraction = run(&sheet(), &CancellationToken::new()).unwrap();
        assert!(
            !extraction
                .items
                .iter()
                .any(|i| i.key == ItemKey::Code("020".into()))
        );
    }

    #[test]
    fn test_unparsed_cell_reads_as_zero() {
        let extraction = run(&sheet(), &CancellationToken::new()).unwrap();
        let item = extraction
            .items
            .iter()
            .find(|i| i.key == ItemKey::Code("150".into()))
            .unwrap();
        assert_eq!(item.period_values, vec![Some(dec!(0)), Some(dec!(7))]);
        assert!(
            extraction
                .warnings
                .iter()
                .any(|w| w.kind == WarningKind::UnparsedCell && w.row == Some(4))
        );
    }

    #[test]
    fn test_cancelled_token_aborts() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            run(&sheet(), &token),
            Err(ConvertError::Cancelled)
        ));
    }

    #[test]
    fn test_duplicate_keys_merge_with_warning() {
        let mut items = ItemSet::default();
        let key = ItemKey::Code("010".into());
        for (row, v) in [(2, dec!(10)), (5, dec!(5))] {
            items.leaf(LineItem {
                key: key.clone(),
                label: "x".into(),
                period_values: vec![Some(v), None],
                is_subheader: false,
                row,
            });
        }
        let extraction = items.finish();
        assert_eq!(extraction.items.len(), 1);
        assert_eq!(extraction.items[0].period_values, vec![Some(dec!(15)), None]);
        assert_eq!(extraction.items[0].row, 2);
        assert_eq!(extraction.warnings[0].kind, WarningKind::DuplicateItem);
        assert_eq!(extraction.stats.changes, 1);
    }

    #[test]
    fn test_values_are_scaled_to_target_unit() {
        let mut sheet = sheet();
        sheet.cells.insert((0, 0), text(0, 0, "млн. сум"));
        sheet
            .cells
            .insert((2, 2), Cell::new(2, 2, CellValue::number(1.5)).with_raw("1.5"));
        let extraction = run(&sheet, &CancellationToken::new()).unwrap();
        let item = extraction
            .items
            .iter()
            .find(|i| i.key == ItemKey::Code("010".into()))
            .unwrap();
        assert_eq!(item.period_values[0], Some(dec!(1500)));
    }

    #[test]
    fn test_scaling_overflow_reads_as_zero() {
        let mut sheet = sheet();
        sheet.cells.insert((0, 0), text(0, 0, "млн. сум"));
        sheet.cells.insert(
            (2, 2),
            Cell::new(2, 2, CellValue::number(7e28)).with_raw("70000000000000000000000000000"),
        );
        let extraction = run(&sheet, &CancellationToken::new()).unwrap();
        let item = extraction
            .items
            .iter()
            .find(|i| i.key == ItemKey::Code("010".into()))
            .unwrap();
        assert_eq!(item.period_values, vec![Some(dec!(0)), Some(dec!(1200000))]);
        assert!(
            extraction
                .warnings
                .iter()
                .any(|w| w.kind == WarningKind::UnparsedCell && w.row == Some(2))
        );
    }

    #[test]
    fn test_subheader_key_is_taken_over_by_leaf() {
        let mut items = ItemSet::default();
        let key = ItemKey::Code("010".into());
        items.subheader(key.clone(), "Основные средства", 2, 2);
        items.leaf(LineItem {
            key: key.clone(),
            label: "Основные средства".into(),
            period_values: vec![Some(dec!(1000)), Some(dec!(1200))],
            is_subheader: false,
            row: 3,
        });
        items.subheader(key.clone(), "Основные средства", 4, 2);
        let extraction = items.finish();
        assert_eq!(extraction.items.len(), 1);
        assert!(!extraction.items[0].is_subheader);
        assert_eq!(extraction.items[0].row, 3);
        assert!(extraction.warnings.is_empty());
    }
}
