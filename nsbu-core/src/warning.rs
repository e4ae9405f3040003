//! Recoverable conditions reported alongside a conversion

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Severity level of a warning
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Numeric cell that could not be parsed; treated as zero
    UnparsedCell,
    /// No unit-of-measurement text; default divisor applied
    MissingUnit,
    /// Column not found by keyword; a fallback column was used
    DefaultedColumn,
    /// Section boundary resolved by the distance heuristic
    AmbiguousBoundary,
    /// Section marker not found in the sheet
    MissingSection,
    UnmappedCode,
    /// Source total line recomputed by the layout
    AggregateSkipped,
    /// Source row for a calculated entry; its value is derived instead
    CalculatedInSource,
    DuplicateItem,
    /// A declared check does not hold
    Unbalanced,
}

impl WarningKind {
    pub fn default_severity(&self) -> Severity {
        match self {
            WarningKind::AggregateSkipped | WarningKind::CalculatedInSource => Severity::Info,
            WarningKind::AmbiguousBoundary => Severity::Info,
            WarningKind::Unbalanced => Severity::Error,
            _ => Severity::Warning,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WarningKind::UnparsedCell => "unparsed_cell",
            WarningKind::MissingUnit => "missing_unit",
            WarningKind::DefaultedColumn => "defaulted_column",
            WarningKind::AmbiguousBoundary => "ambiguous_boundary",
            WarningKind::MissingSection => "missing_section",
            WarningKind::UnmappedCode => "unmapped_code",
            WarningKind::AggregateSkipped => "aggregate_skipped",
            WarningKind::CalculatedInSource => "calculated_in_source",
            WarningKind::DuplicateItem => "duplicate_item",
            WarningKind::Unbalanced => "unbalanced",
        }
    }
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheet: Option<String>,
    /// 0-based source row
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<u32>,
}

impl Warning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            severity: kind.default_severity(),
            sheet: None,
            row: None,
        }
    }

    pub fn at_row(mut self, row: u32) -> Self {
        self.row = Some(row);
        self
    }

    pub fn in_sheet(mut self, sheet: impl Into<String>) -> Self {
        self.sheet = Some(sheet.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

impl PartialOrd for Warning {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Rows without a position sort first, then by row and kind
impl Ord for Warning {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sheet
            .cmp(&other.sheet)
            .then_with(|| self.row.cmp(&other.row))
            .then_with(|| self.kind.cmp(&other.kind))
            .then_with(|| self.message.cmp(&other.message))
    }
}

/// Count warnings at or above a severity
pub fn count_at_least(warnings: &[Warning], severity: Severity) -> usize {
    warnings.iter().filter(|w| w.severity >= severity).count()
}
