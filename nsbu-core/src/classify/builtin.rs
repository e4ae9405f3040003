//! Table data embedded at build time

pub const BALANCE_SHEET: &str = include_str!("../../tables/balance_sheet.toml");
pub const CASH_FLOW: &str = include_str!("../../tables/cash_flow.toml");
pub const PROFIT_LOSS: &str = include_str!("../../tables/profit_loss.toml");
pub const ROW_RULES: &str = include_str!("../../tables/row_rules.toml");
