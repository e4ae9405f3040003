//! Hard failures that abort a conversion or reject a table at load

use thiserror::Error;

use crate::statement::StatementType;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("no readable sheets in workbook")]
    NoReadableSheets,

    #[error("{statement}: sheet '{sheet}' has no recognizable {column} column")]
    MissingColumns {
        statement: StatementType,
        sheet: String,
        column: &'static str,
    },

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("failed to read '{path}': {reason}")]
    Read { path: String, reason: String },

    #[error("conversion cancelled")]
    Cancelled,
}

/// Classification table or row rule problems found while loading
#[derive(Debug, Error)]
pub enum TableError {
    #[error("{table}: duplicate code '{code}'")]
    DuplicateCode { table: String, code: String },

    #[error("{table}: duplicate section id '{section}'")]
    DuplicateSection { table: String, section: String },

    #[error("{table}: duplicate reference name '{name}'")]
    DuplicateRef { table: String, name: String },

    #[error("{table}: entry '{code}' refers to unknown section '{section}'")]
    UnknownSection {
        table: String,
        code: String,
        section: String,
    },

    #[error("{table}: '{context}' refers to unknown reference '@{name}'")]
    UnknownReference {
        table: String,
        context: String,
        name: String,
    },

    #[error("{table}: calculated entry '{code}' refers to unknown code '{operand}'")]
    UnknownOperand {
        table: String,
        code: String,
        operand: String,
    },

    #[error("{table}: account '{account}' excluded by '{code}' is also claimed by '{other}'")]
    ExcludedAccountOverlap {
        table: String,
        account: String,
        code: String,
        other: String,
    },

    #[error("{table}: reference cycle {path}")]
    CyclicReference { table: String, path: String },

    #[error("{table}: invalid formula in '{context}': {reason}")]
    InvalidFormula {
        table: String,
        context: String,
        reason: String,
    },

    #[error("{table}: {reason}")]
    Invalid { table: String, reason: String },

    #[error("{table}: {source}")]
    Parse {
        table: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to read table '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_reason() {
        let err = ConvertError::MissingColumns {
            statement: StatementType::BalanceSheet,
            sheet: "Ф1".into(),
            column: "value",
        };
        assert_eq!(
            err.to_string(),
            "balance_sheet: sheet 'Ф1' has no recognizable value column"
        );

        let err: ConvertError = TableError::DuplicateCode {
            table: "balance_sheet".into(),
            code: "010".into(),
        }
        .into();
        assert_eq!(err.to_string(), "balance_sheet: duplicate code '010'");
    }
}
