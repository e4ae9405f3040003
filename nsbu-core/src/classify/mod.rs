//! Classification tables: source code / account / label selector -> IFRS placement
//!
//! Tables are TOML data. Loading validates them completely, so a table that
//! reaches the transformer never needs to be checked again.

pub mod builtin;
pub mod formula;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use crate::error::TableError;
use crate::statement::StatementType;
pub use formula::{Formula, Operand, Sign, Term};

/// Label/bucket selector for entries fed by code-less rows
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceSelector {
    pub section: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationEntry {
    pub code: Option<String>,
    /// Account ranges as declared (`"2900"`)
    pub accounts: Vec<String>,
    /// Present for calculated entries; operands are codes
    pub formula: Option<Formula>,
    pub source: Option<SourceSelector>,
    pub ifrs_label: String,
    pub section: String,
    pub subsection: Option<String>,
    pub is_negative: bool,
    /// Shown but never summed into the section total
    pub is_memo: bool,
    pub excluded_accounts: Vec<String>,
    pub ref_name: Option<String>,
}

impl ClassificationEntry {
    pub fn is_calculated(&self) -> bool {
        self.formula.is_some()
    }

    /// Identifier used in messages
    pub fn id(&self) -> String {
        match (&self.code, &self.source) {
            (Some(code), _) => code.clone(),
            (None, Some(source)) => match &source.tag {
                Some(tag) => format!("{}/{}", source.section, tag),
                None => source.section.clone(),
            },
            (None, None) => self.ifrs_label.clone(),
        }
    }

    /// Sign applied to source amounts when displayed
    pub fn display_sign(&self) -> Sign {
        Sign::Plus.times(self.is_negative)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionDef {
    pub id: String,
    pub label: String,
    pub total_ref: String,
    pub total_label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalculatedDef {
    pub name: String,
    pub label: String,
    /// Operands are `@references`
    pub formula: Formula,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Block {
    Section(SectionDef),
    Calculated(CalculatedDef),
}

/// Declared equality between two named values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
    pub left: String,
    pub right: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// Outcome of looking up a 4-digit account
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AccountMatch<'a> {
    Entry(&'a ClassificationEntry),
    /// Inside the range of the entry but listed in its exclusions
    Excluded(&'a ClassificationEntry),
    Unmapped,
}

#[derive(Debug, Clone)]
pub struct ClassificationTable {
    name: String,
    version: String,
    statement: StatementType,
    blocks: Vec<Block>,
    entries: Vec<ClassificationEntry>,
    checks: Vec<Check>,
    aggregate_codes: BTreeSet<String>,
    by_code: HashMap<String, usize>,
    by_source: HashMap<SourceSelector, usize>,
    /// (prefix, entry index), longest prefix first
    account_index: Vec<(String, usize)>,
    /// Calculated block indices in dependency order
    calc_order: Vec<usize>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTable {
    version: String,
    statement: StatementType,
    #[serde(default)]
    aggregate_codes: Vec<String>,
    #[serde(default, rename = "block")]
    blocks: Vec<RawBlock>,
    #[serde(default, rename = "entry")]
    entries: Vec<RawEntry>,
    #[serde(default, rename = "check")]
    checks: Vec<Check>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawBlock {
    Section {
        section: String,
        label: String,
        total_ref: String,
        total_label: String,
    },
    Calculated {
        calculated: String,
        label: String,
        formula: String,
    },
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEntry {
    code: Option<String>,
    #[serde(default)]
    accounts: Vec<String>,
    #[serde(default)]
    calculated: bool,
    formula: Option<String>,
    source: Option<SourceSelector>,
    label: String,
    section: String,
    subsection: Option<String>,
    #[serde(default)]
    negative: bool,
    #[serde(default)]
    memo: bool,
    #[serde(default)]
    excluded_accounts: Vec<String>,
    ref_name: Option<String>,
}

fn invalid(table: &str, reason: String) -> TableError {
    TableError::Invalid {
        table: table.to_string(),
        reason,
    }
}

/// Range string to the prefix it covers: trailing zeros dropped, at least two digits
pub fn account_prefix(account: &str) -> String {
    let trimmed = account.trim().trim_end_matches('0');
    let mut prefix = trimmed.to_string();
    while prefix.len() < 2 {
        prefix.push('0');
    }
    prefix
}

pub(crate) fn is_account_code(s: &str) -> bool {
    s.len() == 4 && s.chars().all(|c| c.is_ascii_digit())
}

impl ClassificationTable {
    /// Parse and validate a table
    pub fn from_toml_str(name: &str, content: &str) -> Result<Self, TableError> {
        let raw: RawTable = toml::from_str(content).map_err(|source| TableError::Parse {
            table: name.to_string(),
            source,
        })?;
        Self::build(name, raw)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TableError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| TableError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("table")
            .to_string();
        Self::from_toml_str(&name, &content)
    }

    fn build(name: &str, raw: RawTable) -> Result<Self, TableError> {
        let table = name.to_string();

        // Blocks
        let mut blocks = Vec::with_capacity(raw.blocks.len());
        let mut section_ids = HashSet::new();
        let mut ref_names = HashSet::new();
        for block in raw.blocks {
            match block {
                RawBlock::Section {
                    section,
                    label,
                    total_ref,
                    total_label,
                } => {
                    if !section_ids.insert(section.clone()) {
                        return Err(TableError::DuplicateSection {
                            table,
                            section,
                        });
                    }
                    if !ref_names.insert(total_ref.clone()) {
                        return Err(TableError::DuplicateRef {
                            table,
                            name: total_ref,
                        });
                    }
                    blocks.push(Block::Section(SectionDef {
                        id: section,
                        label,
                        total_ref,
                        total_label,
                    }));
                }
                RawBlock::Calculated {
                    calculated,
                    label,
                    formula,
                } => {
                    if !ref_names.insert(calculated.clone()) {
                        return Err(TableError::DuplicateRef {
                            table,
                            name: calculated,
                        });
                    }
                    let parsed =
                        Formula::parse(&formula).map_err(|reason| TableError::InvalidFormula {
                            table: table.clone(),
                            context: calculated.clone(),
                            reason,
                        })?;
                    if let Some(code) = parsed.codes().next() {
                        return Err(TableError::InvalidFormula {
                            table,
                            context: calculated,
                            reason: format!(
                                "block formulas take @references, found code '{}'",
                                code
                            ),
                        });
                    }
                    blocks.push(Block::Calculated(CalculatedDef {
                        name: calculated,
                        label,
                        formula: parsed,
                    }));
                }
            }
        }

        // Entries
        let aggregate_codes: BTreeSet<String> = raw.aggregate_codes.into_iter().collect();
        let mut entries = Vec::with_capacity(raw.entries.len());
        let mut by_code = HashMap::new();
        let mut by_source = HashMap::new();
        for raw_entry in raw.entries {
            let formula = match (raw_entry.calculated, raw_entry.formula.as_deref()) {
                (true, Some(f)) => Some(Formula::parse(f).map_err(|reason| {
                    TableError::InvalidFormula {
                        table: table.clone(),
                        context: raw_entry.code.clone().unwrap_or_default(),
                        reason,
                    }
                })?),
                (true, None) => {
                    return Err(invalid(&table, format!(
                        "calculated entry '{}' has no formula",
                        raw_entry.code.as_deref().unwrap_or(&raw_entry.label)
                    )));
                }
                (false, Some(_)) => {
                    return Err(invalid(&table, format!(
                        "entry '{}' has a formula but is not calculated",
                        raw_entry.code.as_deref().unwrap_or(&raw_entry.label)
                    )));
                }
                (false, None) => None,
            };

            let entry = ClassificationEntry {
                code: raw_entry.code,
                accounts: raw_entry.accounts,
                formula,
                source: raw_entry.source,
                ifrs_label: raw_entry.label,
                section: raw_entry.section,
                subsection: raw_entry.subsection,
                is_negative: raw_entry.negative,
                is_memo: raw_entry.memo,
                excluded_accounts: raw_entry.excluded_accounts,
                ref_name: raw_entry.ref_name,
            };
            let idx = entries.len();

            if entry.code.is_none() && entry.source.is_none() {
                return Err(invalid(&table, format!(
                    "entry '{}' needs a code or a source selector",
                    entry.ifrs_label
                )));
            }
            if entry.is_calculated() && (!entry.accounts.is_empty() || entry.source.is_some()) {
                return Err(invalid(&table, format!(
                    "calculated entry '{}' cannot read accounts or source rows",
                    entry.id()
                )));
            }
            if entry.is_calculated() && entry.code.is_none() {
                return Err(invalid(&table, format!(
                    "calculated entry '{}' needs a code",
                    entry.ifrs_label
                )));
            }
            if !section_ids.contains(&entry.section) {
                return Err(TableError::UnknownSection {
                    table,
                    code: entry.id(),
                    section: entry.section,
                });
            }
            if let Some(code) = &entry.code {
                if by_code.insert(code.clone(), idx).is_some() || aggregate_codes.contains(code) {
                    return Err(TableError::DuplicateCode {
                        table,
                        code: code.clone(),
                    });
                }
            }
            if let Some(source) = &entry.source
                && by_source.insert(source.clone(), idx).is_some()
            {
                return Err(TableError::DuplicateCode {
                    table,
                    code: format!("source:{}", entry.id()),
                });
            }
            if let Some(name) = &entry.ref_name
                && !ref_names.insert(name.clone())
            {
                return Err(TableError::DuplicateRef {
                    table,
                    name: name.clone(),
                });
            }
            for account in entry.accounts.iter().chain(&entry.excluded_accounts) {
                if !is_account_code(account) {
                    return Err(invalid(&table, format!(
                        "entry '{}' lists '{}', accounts are four digits",
                        entry.id(),
                        account
                    )));
                }
            }
            entries.push(entry);
        }

        // Calculated entry operands: existing, non-calculated codes
        for entry in entries.iter().filter(|e| e.is_calculated()) {
            let Some(formula) = &entry.formula else {
                continue;
            };
            if let Some(name) = formula.refs().next() {
                return Err(TableError::InvalidFormula {
                    table,
                    context: entry.id(),
                    reason: format!("entry formulas take codes, found '@{}'", name),
                });
            }
            for operand in formula.codes() {
                match by_code.get(operand).map(|&i| &entries[i]) {
                    None => {
                        return Err(TableError::UnknownOperand {
                            table,
                            code: entry.id(),
                            operand: operand.to_string(),
                        });
                    }
                    Some(op) if op.is_calculated() => {
                        return Err(TableError::InvalidFormula {
                            table,
                            context: entry.id(),
                            reason: format!("operand '{}' is itself calculated", operand),
                        });
                    }
                    Some(_) => {}
                }
            }
        }

        // Account ranges, longest prefix first so nested ranges win
        let mut account_index: Vec<(String, usize)> = entries
            .iter()
            .enumerate()
            .flat_map(|(i, e)| e.accounts.iter().map(move |a| (account_prefix(a), i)))
            .collect();
        account_index.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        for pair in account_index.windows(2) {
            if pair[0].0 == pair[1].0 {
                return Err(invalid(&table, format!(
                    "account range '{}' is claimed twice",
                    pair[0].0
                )));
            }
        }

        // Excluded accounts must not be claimed by another entry
        for entry in &entries {
            for excluded in &entry.excluded_accounts {
                for (prefix, other_idx) in &account_index {
                    let other = &entries[*other_idx];
                    if std::ptr::eq(other, entry) {
                        continue;
                    }
                    if excluded.starts_with(prefix.as_str()) {
                        return Err(TableError::ExcludedAccountOverlap {
                            table,
                            account: excluded.clone(),
                            code: entry.id(),
                            other: other.id(),
                        });
                    }
                }
            }
        }

        // References used by blocks and checks
        for block in &blocks {
            if let Block::Calculated(calc) = block {
                for name in calc.formula.refs() {
                    if !ref_names.contains(name) {
                        return Err(TableError::UnknownReference {
                            table,
                            context: calc.name.clone(),
                            name: name.to_string(),
                        });
                    }
                }
            }
        }
        for check in &raw.checks {
            for name in [&check.left, &check.right] {
                if !ref_names.contains(name) {
                    return Err(TableError::UnknownReference {
                        table,
                        context: format!("check {} = {}", check.left, check.right),
                        name: name.clone(),
                    });
                }
            }
        }

        let calc_order = calc_order(&table, &blocks)?;

        Ok(Self {
            name: table,
            version: raw.version,
            statement: raw.statement,
            blocks,
            entries,
            checks: raw.checks,
            aggregate_codes,
            by_code,
            by_source,
            account_index,
            calc_order,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn statement(&self) -> StatementType {
        self.statement
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn entries(&self) -> &[ClassificationEntry] {
        &self.entries
    }

    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    /// Calculated blocks in an order where every reference is computed first
    pub fn calc_order(&self) -> impl Iterator<Item = &CalculatedDef> {
        self.calc_order.iter().filter_map(|&i| match &self.blocks[i] {
            Block::Calculated(calc) => Some(calc),
            Block::Section(_) => None,
        })
    }

    /// Exact line-code lookup
    pub fn classify(&self, code: &str) -> Option<&ClassificationEntry> {
        self.by_code.get(code).map(|&i| &self.entries[i])
    }

    /// Account range lookup honouring exclusions
    pub fn classify_account(&self, account: &str) -> Option<&ClassificationEntry> {
        match self.match_account(account) {
            AccountMatch::Entry(entry) => Some(entry),
            AccountMatch::Excluded(_) | AccountMatch::Unmapped => None,
        }
    }

    pub fn match_account(&self, account: &str) -> AccountMatch<'_> {
        for entry in &self.entries {
            if entry.excluded_accounts.iter().any(|x| x == account) {
                return AccountMatch::Excluded(entry);
            }
        }
        self.account_index
            .iter()
            .find(|(prefix, _)| account.starts_with(prefix.as_str()))
            .map(|(_, i)| AccountMatch::Entry(&self.entries[*i]))
            .unwrap_or(AccountMatch::Unmapped)
    }

    /// Label/bucket selector lookup; a tagged selector falls back to the untagged one
    pub fn classify_source(&self, section: &str, tag: Option<&str>) -> Option<&ClassificationEntry> {
        let exact = SourceSelector {
            section: section.to_string(),
            tag: tag.map(str::to_string),
        };
        if let Some(&i) = self.by_source.get(&exact) {
            return Some(&self.entries[i]);
        }
        if tag.is_some() {
            let untagged = SourceSelector {
                section: section.to_string(),
                tag: None,
            };
            return self.by_source.get(&untagged).map(|&i| &self.entries[i]);
        }
        None
    }

    /// Source total line the layout recomputes
    pub fn is_aggregate(&self, code: &str) -> bool {
        self.aggregate_codes.contains(code)
    }

    pub fn section(&self, id: &str) -> Option<&SectionDef> {
        self.blocks.iter().find_map(|b| match b {
            Block::Section(s) if s.id == id => Some(s),
            _ => None,
        })
    }
}

/// Topological order of calculated blocks; rejects reference cycles
fn calc_order(table: &str, blocks: &[Block]) -> Result<Vec<usize>, TableError> {
    let calc_by_name: HashMap<&str, usize> = blocks
        .iter()
        .enumerate()
        .filter_map(|(i, b)| match b {
            Block::Calculated(c) => Some((c.name.as_str(), i)),
            Block::Section(_) => None,
        })
        .collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Active,
        Done,
    }

    fn visit(
        idx: usize,
        blocks: &[Block],
        calc_by_name: &HashMap<&str, usize>,
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
        order: &mut Vec<usize>,
    ) -> Result<(), Vec<usize>> {
        match marks[idx] {
            Mark::Done => return Ok(()),
            Mark::Active => {
                let start = stack.iter().position(|&i| i == idx).unwrap_or(0);
                let mut cycle = stack[start..].to_vec();
                cycle.push(idx);
                return Err(cycle);
            }
            Mark::New => {}
        }
        marks[idx] = Mark::Active;
        stack.push(idx);
        if let Block::Calculated(calc) = &blocks[idx] {
            for name in calc.formula.refs() {
                if let Some(&dep) = calc_by_name.get(name) {
                    visit(dep, blocks, calc_by_name, marks, stack, order)?;
                }
            }
        }
        stack.pop();
        marks[idx] = Mark::Done;
        order.push(idx);
        Ok(())
    }

    let mut marks = vec![Mark::New; blocks.len()];
    let mut order = Vec::new();
    for (i, block) in blocks.iter().enumerate() {
        if !matches!(block, Block::Calculated(_)) {
            continue;
        }
        let mut stack = Vec::new();
        if let Err(cycle) = visit(i, blocks, &calc_by_name, &mut marks, &mut stack, &mut order) {
            let path: Vec<&str> = cycle
                .iter()
                .filter_map(|&i| match &blocks[i] {
                    Block::Calculated(c) => Some(c.name.as_str()),
                    Block::Section(_) => None,
                })
                .collect();
            return Err(TableError::CyclicReference {
                table: table.to_string(),
                path: path.join(" -> "),
            });
        }
    }
    Ok(order)
}

/// One table per statement type, shared read-only by every job
#[derive(Debug, Clone)]
pub struct TableSet {
    balance_sheet: ClassificationTable,
    cash_flow: ClassificationTable,
    profit_loss: ClassificationTable,
}

impl TableSet {
    pub fn new(
        balance_sheet: ClassificationTable,
        cash_flow: ClassificationTable,
        profit_loss: ClassificationTable,
    ) -> Result<Self, TableError> {
        for (expected, table) in [
            (StatementType::BalanceSheet, &balance_sheet),
            (StatementType::CashFlow, &cash_flow),
            (StatementType::ProfitLoss, &profit_loss),
        ] {
            if table.statement() != expected {
                return Err(TableError::Invalid {
                    table: table.name().to_string(),
                    reason: format!(
                        "declares statement '{}', expected '{}'",
                        table.statement(),
                        expected
                    ),
                });
            }
        }
        Ok(Self {
            balance_sheet,
            cash_flow,
            profit_loss,
        })
    }

    /// Tables embedded in the binary
    pub fn builtin() -> Result<Self, TableError> {
        Self::new(
            ClassificationTable::from_toml_str("balance_sheet", builtin::BALANCE_SHEET)?,
            ClassificationTable::from_toml_str("cash_flow", builtin::CASH_FLOW)?,
            ClassificationTable::from_toml_str("profit_loss", builtin::PROFIT_LOSS)?,
        )
    }

    /// Load `<statement>.toml` files from a directory; missing files fall back to the embedded table
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self, TableError> {
        let dir = dir.as_ref();
        let load = |statement: StatementType, embedded: &str| {
            let path = dir.join(format!("{}.toml", statement));
            if path.is_file() {
                tracing::debug!(path = %path.display(), "loading classification table");
                ClassificationTable::from_file(&path)
            } else {
                ClassificationTable::from_toml_str(statement.as_str(), embedded)
            }
        };
        Self::new(
            load(StatementType::BalanceSheet, builtin::BALANCE_SHEET)?,
            load(StatementType::CashFlow, builtin::CASH_FLOW)?,
            load(StatementType::ProfitLoss, builtin::PROFIT_LOSS)?,
        )
    }

    pub fn get(&self, statement: StatementType) -> &ClassificationTable {
        match statement {
            StatementType::BalanceSheet => &self.balance_sheet,
            StatementType::CashFlow => &self.cash_flow,
            StatementType::ProfitLoss => &self.profit_loss,
        }
    }
}
