//! IFRS transformer
//!
//! Places extracted line items into the table's sections, sums section totals
//! over leaf lines only and evaluates calculated blocks over named references
//! in dependency order.

pub mod layout;
pub mod render;

use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::classify::{
    AccountMatch, Block, ClassificationEntry, ClassificationTable, Operand, is_account_code,
};
use crate::extract::{ItemKey, LineItem};
use crate::warning::{Warning, WarningKind};

pub use layout::{
    IfrsLayout, LayoutBlock, LayoutCalculated, LayoutLine, LayoutRow, LayoutSection, LineKind,
    RowFormula, RowKind,
};
pub use render::{Placement, render_formula};

#[derive(Debug, Clone)]
pub struct Transformation {
    pub layout: IfrsLayout,
    pub warnings: Vec<Warning>,
    /// Items placed into an entry
    pub placed: usize,
    /// Items dropped, merged or adjusted
    pub changes: usize,
}

/// Amounts accumulated for one entry from code, account and bucket items
#[derive(Debug, Clone)]
struct Feed {
    amounts: Vec<Decimal>,
    rows: Vec<u32>,
}

impl Feed {
    fn new(periods: usize) -> Self {
        Self {
            amounts: vec![Decimal::ZERO; periods],
            rows: Vec::new(),
        }
    }

    fn add(&mut self, item: &LineItem) {
        for (p, slot) in self.amounts.iter_mut().enumerate() {
            *slot = slot.saturating_add(item.amount(p));
        }
        self.rows.push(item.row);
    }
}

struct Placer<'t> {
    table: &'t ClassificationTable,
    periods: usize,
    feeds: Vec<Option<Feed>>,
    code_fed: Vec<bool>,
    excluded: Vec<Option<Feed>>,
    labelled: Vec<Vec<&'t LineItem>>,
    warnings: Vec<Warning>,
    placed: usize,
    changes: usize,
}

impl<'t> Placer<'t> {
    fn index_of(&self, entry: &ClassificationEntry) -> usize {
        self.table
            .entries()
            .iter()
            .position(|e| std::ptr::eq(e, entry))
            .unwrap_or_default()
    }

    fn feed(&mut self, idx: usize, item: &LineItem) {
        let feed = self.feeds[idx].get_or_insert_with(|| Feed::new(self.periods));
        if !feed.rows.is_empty() {
            self.changes += 1;
        }
        feed.add(item);
        self.placed += 1;
    }

    fn unmapped(&mut self, item: &LineItem, message: String) {
        self.warnings
            .push(Warning::new(WarningKind::UnmappedCode, message).at_row(item.row));
        self.changes += 1;
    }

    fn place(&mut self, item: &'t LineItem) {
        let table = self.table;
        match &item.key {
            ItemKey::Code(code) => {
                if table.is_aggregate(code) {
                    self.warnings.push(
                        Warning::new(
                            WarningKind::AggregateSkipped,
                            format!("total line {} is recomputed by the layout", code),
                        )
                        .at_row(item.row),
                    );
                    self.changes += 1;
                    return;
                }
                if let Some(entry) = table.classify(code) {
                    if entry.is_calculated() {
                        self.warnings.push(
                            Warning::new(
                                WarningKind::CalculatedInSource,
                                format!(
                                    "line {} is calculated as {}, source value ignored",
                                    code,
                                    entry.formula.as_ref().map(|f| f.to_string()).unwrap_or_default()
                                ),
                            )
                            .at_row(item.row),
                        );
                        self.changes += 1;
                        return;
                    }
                    let idx = self.index_of(entry);
                    self.code_fed[idx] = true;
                    self.feed(idx, item);
                    return;
                }
                if !is_account_code(code) {
                    self.unmapped(
                        item,
                        format!("code {} is not in the {} table", code, table.name()),
                    );
                    return;
                }
                match table.match_account(code) {
                    AccountMatch::Entry(entry) => {
                        let idx = self.index_of(entry);
                        self.feed(idx, item);
                    }
                    AccountMatch::Excluded(entry) => {
                        let idx = self.index_of(entry);
                        self.excluded[idx]
                            .get_or_insert_with(|| Feed::new(self.periods))
                            .add(item);
                    }
                    AccountMatch::Unmapped => self.unmapped(
                        item,
                        format!("account {} is in no range of the {} table", code, table.name()),
                    ),
                }
            }
            ItemKey::Label { section, tag, .. } => {
                match table.classify_source(section, tag.as_deref()) {
                    Some(entry) => {
                        let idx = self.index_of(entry);
                        self.labelled[idx].push(item);
                        self.placed += 1;
                    }
                    None => self.unmapped(
                        item,
                        format!("no entry for {} in the {} table", item.key, table.name()),
                    ),
                }
            }
            ItemKey::Bucket { section, bucket } => {
                match table.classify_source(section, Some(bucket)) {
                    Some(entry) => {
                        let idx = self.index_of(entry);
                        self.feed(idx, item);
                    }
                    None => self.unmapped(
                        item,
                        format!("no entry for {} in the {} table", item.key, table.name()),
                    ),
                }
            }
        }
    }

    /// Excluded accounts reduce an entry fed by its line code, otherwise they are dropped
    fn apply_exclusions(&mut self) {
        for idx in 0..self.excluded.len() {
            let Some(excluded) = self.excluded[idx].take() else {
                continue;
            };
            self.changes += excluded.rows.len();
            let entry = &self.table.entries()[idx];
            if !self.code_fed[idx] {
                tracing::debug!(entry = %entry.id(), "excluded account rows dropped");
                continue;
            }
            tracing::debug!(entry = %entry.id(), "excluded account amounts subtracted");
            if let Some(feed) = self.feeds[idx].as_mut() {
                for (slot, amount) in feed.amounts.iter_mut().zip(&excluded.amounts) {
                    *slot = slot.saturating_sub(*amount);
                }
            }
        }
    }

    /// Source amounts of an entry, if anything fed it
    fn source(&self, idx: usize) -> Option<Vec<Decimal>> {
        let feed = self.feeds[idx].as_ref();
        let labelled = &self.labelled[idx];
        if feed.is_none() && labelled.is_empty() {
            return None;
        }
        let mut amounts = feed
            .map(|f| f.amounts.clone())
            .unwrap_or_else(|| vec![Decimal::ZERO; self.periods]);
        for item in labelled {
            for (p, slot) in amounts.iter_mut().enumerate() {
                *slot = slot.saturating_add(item.amount(p));
            }
        }
        Some(amounts)
    }

    fn source_of_code(&self, code: &str, period: usize) -> Option<Decimal> {
        let entry = self.table.classify(code)?;
        self.source(self.index_of(entry))
            .map(|a| a.get(period).copied().unwrap_or_default())
    }

    fn entry_lines(&self, idx: usize, entry: &ClassificationEntry) -> Vec<LayoutLine> {
        let sign = entry.display_sign();
        let leaf_kind = if entry.is_memo {
            LineKind::Memo
        } else {
            LineKind::Item
        };

        if let Some(formula) = &entry.formula {
            let present = formula
                .codes()
                .any(|c| self.source_of_code(c, 0).is_some());
            if !present {
                return Vec::new();
            }
            let values = (0..self.periods)
                .map(|p| {
                    sign.apply(formula.evaluate(|operand| match operand {
                        Operand::Code(c) => self.source_of_code(c, p).unwrap_or(Decimal::ZERO),
                        Operand::Ref(_) => Decimal::ZERO,
                    }))
                })
                .collect();
            let operands = formula
                .terms
                .iter()
                .filter_map(|term| match &term.operand {
                    Operand::Code(c) => {
                        let op = self.table.classify(c)?;
                        Some((
                            term.sign.times(op.is_negative).times(entry.is_negative),
                            c.clone(),
                        ))
                    }
                    Operand::Ref(_) => None,
                })
                .collect();
            return vec![LayoutLine {
                kind: LineKind::Calculated,
                label: entry.ifrs_label.clone(),
                code: entry.code.clone(),
                ref_name: entry.ref_name.clone(),
                values,
                source_rows: Vec::new(),
                operands,
            }];
        }

        let labelled = &self.labelled[idx];
        if self.feeds[idx].is_none() && !labelled.is_empty() && entry.ref_name.is_none() {
            let mut items = labelled.clone();
            items.sort_by_key(|i| i.row);
            return items
                .into_iter()
                .map(|item| LayoutLine {
                    kind: leaf_kind,
                    label: item.label.clone(),
                    code: None,
                    ref_name: None,
                    values: (0..self.periods).map(|p| sign.apply(item.amount(p))).collect(),
                    source_rows: vec![item.row],
                    operands: Vec::new(),
                })
                .collect();
        }

        let Some(amounts) = self.source(idx) else {
            return Vec::new();
        };
        let mut source_rows: Vec<u32> = self.feeds[idx]
            .iter()
            .flat_map(|f| f.rows.iter().copied())
            .chain(labelled.iter().map(|i| i.row))
            .collect();
        source_rows.sort_unstable();
        vec![LayoutLine {
            kind: leaf_kind,
            label: entry.ifrs_label.clone(),
            code: entry.code.clone(),
            ref_name: entry.ref_name.clone(),
            values: amounts.into_iter().map(|a| sign.apply(a)).collect(),
            source_rows,
            operands: Vec::new(),
        }]
    }
}

/// Place items into the table's layout
pub fn transform(
    items: &[LineItem],
    table: &ClassificationTable,
    periods: &[String],
) -> Transformation {
    let n = periods.len();
    let entry_count = table.entries().len();
    let mut placement = Placer {
        table,
        periods: n,
        feeds: vec![None; entry_count],
        code_fed: vec![false; entry_count],
        excluded: vec![None; entry_count],
        labelled: vec![Vec::new(); entry_count],
        warnings: Vec::new(),
        placed: 0,
        changes: 0,
    };
    for item in items.iter().filter(|i| !i.is_subheader) {
        placement.place(item);
    }
    placement.apply_exclusions();

    let mut named: HashMap<String, Vec<Decimal>> = HashMap::new();
    let mut sections: HashMap<&str, LayoutSection> = HashMap::new();
    for block in table.blocks() {
        let Block::Section(def) = block else {
            continue;
        };
        let mut lines = Vec::new();
        let mut subsection: Option<&str> = None;
        for (idx, entry) in table
            .entries()
            .iter()
            .enumerate()
            .filter(|(_, e)| e.section == def.id)
        {
            let entry_lines = placement.entry_lines(idx, entry);
            if entry_lines.is_empty() {
                continue;
            }
            if entry.subsection.as_deref() != subsection {
                if let Some(sub) = entry.subsection.as_deref() {
                    lines.push(LayoutLine::subheader(sub, n));
                }
                subsection = entry.subsection.as_deref();
            }
            lines.extend(entry_lines);
        }

        let mut total = vec![Decimal::ZERO; n];
        for line in lines.iter().filter(|l| l.is_leaf()) {
            for (slot, v) in total.iter_mut().zip(&line.values) {
                *slot = slot.saturating_add(*v);
            }
        }
        for line in &lines {
            if let Some(name) = &line.ref_name {
                named.insert(name.clone(), line.values.clone());
            }
        }
        named.insert(def.total_ref.clone(), total.clone());
        sections.insert(
            def.id.as_str(),
            LayoutSection {
                id: def.id.clone(),
                label: def.label.clone(),
                lines,
                total_label: def.total_label.clone(),
                total_ref: def.total_ref.clone(),
                total_per_period: total,
            },
        );
    }

    let mut calculated: HashMap<&str, LayoutCalculated> = HashMap::new();
    for calc in table.calc_order() {
        let mut values = vec![Decimal::ZERO; n];
        let mut terms = Vec::new();
        for term in &calc.formula.terms {
            let Operand::Ref(name) = &term.operand else {
                continue;
            };
            let Some(operand) = named.get(name) else {
                tracing::debug!(calculated = %calc.name, reference = %name, "reference absent");
                continue;
            };
            for (slot, v) in values.iter_mut().zip(operand) {
                *slot = slot.saturating_add(term.sign.apply(*v));
            }
            terms.push((term.sign, name.clone()));
        }
        named.insert(calc.name.clone(), values.clone());
        calculated.insert(
            calc.name.as_str(),
            LayoutCalculated {
                name: calc.name.clone(),
                label: calc.label.clone(),
                terms,
                values,
            },
        );
    }

    let mut warnings = std::mem::take(&mut placement.warnings);
    for check in table.checks() {
        let (Some(left), Some(right)) = (named.get(&check.left), named.get(&check.right)) else {
            tracing::debug!(left = %check.left, right = %check.right, "check skipped");
            continue;
        };
        let label = check
            .label
            .clone()
            .unwrap_or_else(|| format!("{} = {}", check.left, check.right));
        for (p, (l, r)) in left.iter().zip(right).enumerate() {
            if l != r {
                warnings.push(Warning::new(
                    WarningKind::Unbalanced,
                    format!(
                        "{} fails for '{}': {} = {}, {} = {}",
                        label,
                        periods.get(p).map(String::as_str).unwrap_or("?"),
                        check.left,
                        l,
                        check.right,
                        r
                    ),
                ));
            }
        }
    }

    let blocks = table
        .blocks()
        .iter()
        .filter_map(|block| match block {
            Block::Section(def) => sections.remove(def.id.as_str()).map(LayoutBlock::Section),
            Block::Calculated(def) => calculated
                .remove(def.name.as_str())
                .map(LayoutBlock::Calculated),
        })
        .collect();

    Transformation {
        layout: IfrsLayout::new(
            table.statement(),
            table.version().to_string(),
            periods.to_vec(),
            blocks,
        ),
        warnings,
        placed: placement.placed,
        changes: placement.changes,
    }
}
