//! nsbu-core: NSBU to IFRS statement conversion
//!
//! Reads an Uzbek national-standard (NSBU) financial statement workbook,
//! detects its layout, extracts line items and places them into an IFRS
//! layout driven by versioned classification tables.

pub mod cancel;
pub mod classify;
pub mod config;
pub mod detect;
pub mod error;
pub mod extract;
pub mod numeric;
pub mod reader;
pub mod statement;
pub mod text;
pub mod transform;
pub mod warning;

use serde::Serialize;
use std::path::Path;

pub use cancel::CancellationToken;
pub use classify::{ClassificationTable, TableSet};
pub use config::ConverterConfig;
pub use error::{ConvertError, TableError};
pub use extract::RowRules;
pub use reader::{Sheet, Workbook};
pub use statement::StatementType;
pub use transform::{IfrsLayout, Placement, render_formula};
pub use warning::{Severity, Warning, WarningKind};

/// Row and placement counters of one job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    /// Items placed into an IFRS entry
    pub transformations: usize,
    /// Rows merged, dropped or adjusted on the way
    pub changes: usize,
    /// Non-empty source rows visited
    pub original_rows: usize,
    /// Source rows that became leaf items
    pub processed_rows: usize,
}

/// Result of converting one statement
#[derive(Debug, Clone, Serialize)]
pub struct Conversion {
    pub statement: StatementType,
    pub sheet: String,
    pub layout: IfrsLayout,
    pub warnings: Vec<Warning>,
    pub stats: JobStats,
}

impl Conversion {
    pub fn count_at_least(&self, severity: Severity) -> usize {
        warning::count_at_least(&self.warnings, severity)
    }
}

/// Main converter interface
pub struct Converter {
    config: ConverterConfig,
    tables: TableSet,
    rules: RowRules,
}

impl Converter {
    /// Converter over the embedded tables and default configuration
    pub fn new() -> Result<Self, TableError> {
        Self::with_config(ConverterConfig::default())
    }

    pub fn with_config(config: ConverterConfig) -> Result<Self, TableError> {
        Ok(Self::with_tables(
            config,
            TableSet::builtin()?,
            RowRules::builtin()?,
        ))
    }

    pub fn with_tables(config: ConverterConfig, tables: TableSet, rules: RowRules) -> Self {
        Self {
            config,
            tables,
            rules,
        }
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    pub fn table(&self, statement: StatementType) -> &ClassificationTable {
        self.tables.get(statement)
    }

    /// Read a workbook and convert one statement from it
    pub fn convert_file<P: AsRef<Path>>(
        &self,
        path: P,
        statement: StatementType,
        token: &CancellationToken,
    ) -> Result<Conversion, ConvertError> {
        let path = path.as_ref();
        let span = tracing::info_span!(
            "convert",
            statement = %statement,
            file = %path.display()
        );
        let _guard = span.enter();

        let workbook = reader::read_workbook(path).map_err(|e| {
            tracing::warn!(error = %e, "workbook unreadable");
            ConvertError::Read {
                path: path.display().to_string(),
                reason: format!("{:#}", e),
            }
        })?;
        self.convert_workbook(&workbook, statement, token)
    }

    /// Convert one statement from an already read workbook.
    ///
    /// A configured sheet name is used as is. Otherwise readable sheets are
    /// tried in workbook order and the first one whose columns can be found
    /// wins.
    pub fn convert_workbook(
        &self,
        workbook: &Workbook,
        statement: StatementType,
        token: &CancellationToken,
    ) -> Result<Conversion, ConvertError> {
        if let Some(name) = self.config.sheet(statement) {
            let sheet = workbook
                .get_sheet(name)
                .ok_or_else(|| ConvertError::Read {
                    path: workbook.path.display().to_string(),
                    reason: format!("sheet '{}' not found", name),
                })?;
            return self.convert_sheet(sheet, statement, token);
        }

        let mut first_error = None;
        for sheet in workbook.readable_sheets() {
            match self.convert_sheet(sheet, statement, token) {
                Ok(conversion) => return Ok(conversion),
                Err(ConvertError::Cancelled) => return Err(ConvertError::Cancelled),
                Err(e) => {
                    tracing::debug!(sheet = %sheet.name, error = %e, "sheet skipped");
                    first_error.get_or_insert(e);
                }
            }
        }
        let error = first_error.unwrap_or(ConvertError::NoReadableSheets);
        tracing::warn!(error = %error, "conversion failed");
        Err(error)
    }

    /// Run detection, extraction and transformation over one sheet
    pub fn convert_sheet(
        &self,
        sheet: &Sheet,
        statement: StatementType,
        token: &CancellationToken,
    ) -> Result<Conversion, ConvertError> {
        let rules = self.rules.get(statement);
        let detection = detect::detect(sheet, statement, &self.config, rules);
        let extraction =
            extract::extract(sheet, &detection.descriptor, rules, &self.config, token)?;
        let periods = detection.descriptor.periods();
        let transformation =
            transform::transform(&extraction.items, self.tables.get(statement), &periods);

        let mut warnings: Vec<Warning> = detection
            .warnings
            .into_iter()
            .chain(extraction.warnings)
            .chain(transformation.warnings)
            .map(|w| w.in_sheet(sheet.name.as_str()))
            .collect();
        warnings.sort();

        let stats = JobStats {
            transformations: transformation.placed,
            changes: extraction.stats.changes + transformation.changes,
            original_rows: extraction.stats.scanned,
            processed_rows: extraction.stats.leaves,
        };
        tracing::info!(
            sheet = %sheet.name,
            transformations = stats.transformations,
            changes = stats.changes,
            warnings = warnings.len(),
            "converted"
        );

        Ok(Conversion {
            statement,
            sheet: sheet.name.clone(),
            layout: transformation.layout,
            warnings,
            stats,
        })
    }
}
