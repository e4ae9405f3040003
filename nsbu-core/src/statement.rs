//! Statement type tag accepted at the job boundary

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementType {
    BalanceSheet,
    CashFlow,
    ProfitLoss,
}

impl StatementType {
    pub const ALL: [StatementType; 3] = [
        StatementType::BalanceSheet,
        StatementType::CashFlow,
        StatementType::ProfitLoss,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatementType::BalanceSheet => "balance_sheet",
            StatementType::CashFlow => "cash_flow",
            StatementType::ProfitLoss => "profit_loss",
        }
    }
}

impl fmt::Display for StatementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "balance_sheet" | "bs" => Ok(StatementType::BalanceSheet),
            "cash_flow" | "cf" => Ok(StatementType::CashFlow),
            "profit_loss" | "pl" | "pnl" => Ok(StatementType::ProfitLoss),
            other => Err(format!(
                "unknown statement type '{}' (expected balance_sheet, cash_flow or profit_loss)",
                other
            )),
        }
    }
}
