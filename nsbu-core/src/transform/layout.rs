//! IFRS layout handed to the writer

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::classify::Sign;
use crate::statement::StatementType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    /// Leaf line summed into the section total
    Item,
    Subheader,
    /// Shown, never summed
    Memo,
    /// Derived from other lines by a code formula, never summed
    Calculated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutLine {
    pub kind: LineKind,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_name: Option<String>,
    /// Displayed values, one per period
    pub values: Vec<Decimal>,
    /// Source rows that fed the line (0-based)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub source_rows: Vec<u32>,
    /// Calculated lines: operand codes, signed relative to displayed values
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub operands: Vec<(Sign, String)>,
}

impl LayoutLine {
    pub fn subheader(label: &str, periods: usize) -> Self {
        Self {
            kind: LineKind::Subheader,
            label: label.to_string(),
            code: None,
            ref_name: None,
            values: vec![Decimal::ZERO; periods],
            source_rows: Vec::new(),
            operands: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.kind == LineKind::Item
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutSection {
    pub id: String,
    pub label: String,
    pub lines: Vec<LayoutLine>,
    pub total_label: String,
    pub total_ref: String,
    pub total_per_period: Vec<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutCalculated {
    pub name: String,
    pub label: String,
    /// References actually present in the layout
    pub terms: Vec<(Sign, String)>,
    pub values: Vec<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "block", rename_all = "snake_case")]
pub enum LayoutBlock {
    Section(LayoutSection),
    Calculated(LayoutCalculated),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IfrsLayout {
    pub statement: StatementType,
    pub table_version: String,
    pub periods: Vec<String>,
    pub blocks: Vec<LayoutBlock>,
    /// Reference name -> index into [`IfrsLayout::rows`]
    pub named_refs: BTreeMap<String, usize>,
    /// Line code -> index into [`IfrsLayout::rows`]
    pub code_rows: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowKind {
    SectionHeader,
    Subheader,
    Item,
    Memo,
    Calculated,
    Total,
    /// Calculated block (gross profit, total assets, ...)
    Derived,
}

/// Formula of a flattened row over other row indices
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowFormula {
    Sum(Vec<usize>),
    Linear(Vec<(Sign, usize)>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutRow {
    pub kind: RowKind,
    pub label: String,
    pub values: Vec<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formula: Option<RowFormula>,
}

impl IfrsLayout {
    pub fn new(
        statement: StatementType,
        table_version: String,
        periods: Vec<String>,
        blocks: Vec<LayoutBlock>,
    ) -> Self {
        let mut named_refs = BTreeMap::new();
        let mut code_rows = BTreeMap::new();
        let mut index = 0;
        for block in &blocks {
            match block {
                LayoutBlock::Section(section) => {
                    index += 1;
                    for line in &section.lines {
                        if let Some(code) = &line.code {
                            code_rows.insert(code.clone(), index);
                        }
                        if let Some(name) = &line.ref_name {
                            named_refs.insert(name.clone(), index);
                        }
                        index += 1;
                    }
                    named_refs.insert(section.total_ref.clone(), index);
                    index += 1;
                }
                LayoutBlock::Calculated(calc) => {
                    named_refs.insert(calc.name.clone(), index);
                    index += 1;
                }
            }
        }
        Self {
            statement,
            table_version,
            periods,
            blocks,
            named_refs,
            code_rows,
        }
    }

    pub fn section(&self, id: &str) -> Option<&LayoutSection> {
        self.blocks.iter().find_map(|b| match b {
            LayoutBlock::Section(s) if s.id == id => Some(s),
            _ => None,
        })
    }

    /// Values of a named reference (section total, calculated block or line)
    pub fn value_of(&self, name: &str) -> Option<&[Decimal]> {
        self.blocks.iter().find_map(|b| match b {
            LayoutBlock::Section(s) if s.total_ref == name => Some(s.total_per_period.as_slice()),
            LayoutBlock::Section(s) => s
                .lines
                .iter()
                .find(|l| l.ref_name.as_deref() == Some(name))
                .map(|l| l.values.as_slice()),
            LayoutBlock::Calculated(c) if c.name == name => Some(c.values.as_slice()),
            LayoutBlock::Calculated(_) => None,
        })
    }

    /// Values of the line carrying a code
    pub fn code_values(&self, code: &str) -> Option<&[Decimal]> {
        self.lines()
            .find(|l| l.code.as_deref() == Some(code))
            .map(|l| l.values.as_slice())
    }

    pub fn lines(&self) -> impl Iterator<Item = &LayoutLine> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                LayoutBlock::Section(s) => Some(s),
                LayoutBlock::Calculated(_) => None,
            })
            .flat_map(|s| s.lines.iter())
    }

    /// Flatten into numbered rows with formulas over row indices
    pub fn rows(&self) -> Vec<LayoutRow> {
        let periods = self.periods.len();
        let mut rows = Vec::new();
        for block in &self.blocks {
            match block {
                LayoutBlock::Section(section) => {
                    rows.push(LayoutRow {
                        kind: RowKind::SectionHeader,
                        label: section.label.clone(),
                        values: vec![Decimal::ZERO; periods],
                        formula: None,
                    });
                    let mut leaves = Vec::new();
                    for line in &section.lines {
                        let (kind, formula) = match line.kind {
                            LineKind::Item => {
                                leaves.push(rows.len());
                                (RowKind::Item, None)
                            }
                            LineKind::Subheader => (RowKind::Subheader, None),
                            LineKind::Memo => (RowKind::Memo, None),
                            LineKind::Calculated => (
                                RowKind::Calculated,
                                Some(RowFormula::Linear(
                                    line.operands
                                        .iter()
                                        .filter_map(|(sign, code)| {
                                            self.code_rows.get(code).map(|&i| (*sign, i))
                                        })
                                        .collect(),
                                )),
                            ),
                        };
                        rows.push(LayoutRow {
                            kind,
                            label: line.label.clone(),
                            values: line.values.clone(),
                            formula,
                        });
                    }
                    rows.push(LayoutRow {
                        kind: RowKind::Total,
                        label: section.total_label.clone(),
                        values: section.total_per_period.clone(),
                        formula: Some(RowFormula::Sum(leaves)),
                    });
                }
                LayoutBlock::Calculated(calc) => rows.push(LayoutRow {
                    kind: RowKind::Derived,
                    label: calc.label.clone(),
                    values: calc.values.clone(),
                    formula: Some(RowFormula::Linear(
                        calc.terms
                            .iter()
                            .filter_map(|(sign, name)| {
                                self.named_refs.get(name).map(|&i| (*sign, i))
                            })
                            .collect(),
                    )),
                }),
            }
        }
        rows
    }
}
