//! Amount parsing for source value cells

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::str::FromStr;

use crate::reader::{Cell, Resolved};

/// Outcome of reading a value cell
#[derive(Debug, Clone, PartialEq)]
pub enum Amount {
    Empty,
    Value(Decimal),
    /// Non-empty content that is not a number; callers treat it as zero
    Invalid(String),
}

impl Amount {
    pub fn value(&self) -> Option<Decimal> {
        match self {
            Amount::Value(v) => Some(*v),
            _ => None,
        }
    }
}

/// Read a cell as an amount.
///
/// Numeric cells use the raw stored text when it parses exactly, so values
/// such as `0.1` do not pick up binary float noise.
pub fn parse_cell(cell: &Cell) -> Amount {
    match cell.value.resolve() {
        Resolved::Empty => Amount::Empty,
        Resolved::Number(n) => {
            let from_raw = cell.raw.as_deref().and_then(parse_plain_decimal);
            match from_raw.or_else(|| Decimal::from_f64(n)) {
                Some(d) => Amount::Value(d),
                None => Amount::Invalid(n.to_string()),
            }
        }
        Resolved::Text(t) => {
            if t.trim().is_empty() {
                Amount::Empty
            } else {
                match parse_amount(t) {
                    Some(d) => Amount::Value(d),
                    None => Amount::Invalid(t.to_string()),
                }
            }
        }
        Resolved::Boolean(b) => Amount::Invalid(b.to_string()),
        Resolved::Error(e) => Amount::Invalid(e.to_string()),
    }
}

fn parse_plain_decimal(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    if raw.contains(['e', 'E']) {
        Decimal::from_scientific(raw).ok()
    } else {
        Decimal::from_str(raw).ok()
    }
}

/// Parse an amount typed as text.
///
/// Accepts thousands separators (space, NBSP, comma, apostrophe), decimal
/// commas, a lone dash for zero and accounting parentheses for negatives.
pub fn parse_amount(text: &str) -> Option<Decimal> {
    let trimmed = text.trim();
    if matches!(trimmed, "-" | "–" | "—" | "−") {
        return Some(Decimal::ZERO);
    }

    let mut s: String = trimmed
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '\'' | '\u{2019}' | '\u{202F}'))
        .collect();
    if s.is_empty() {
        return None;
    }

    let mut negative = false;
    if s.starts_with('(') && s.ends_with(')') && s.len() > 2 {
        negative = true;
        s = s[1..s.len() - 1].to_string();
    }
    if let Some(rest) = s.strip_prefix('-').or_else(|| s.strip_prefix('−')) {
        negative = !negative;
        s = rest.to_string();
    }

    let normalized = normalize_separators(&s)?;
    if !normalized
        .chars()
        .all(|c| c.is_ascii_digit() || c == '.')
    {
        return None;
    }

    let value = Decimal::from_str(&normalized).ok()?;
    Some(if negative { -value } else { value })
}

/// Resolve `,` and `.` into a single decimal point
fn normalize_separators(s: &str) -> Option<String> {
    let commas = s.matches(',').count();
    let dots = s.matches('.').count();

    let out = match (commas, dots) {
        (0, 0) | (0, 1) => s.to_string(),
        (0, _) => s.replace('.', ""),
        (_, 0) if commas > 1 => s.replace(',', ""),
        (1, 0) => {
            let after = s.rsplit(',').next().map(str::len).unwrap_or(0);
            // "1,234" reads as thousands, "1234,5" as a decimal comma
            if after == 3 {
                s.replace(',', "")
            } else {
                s.replace(',', ".")
            }
        }
        _ => {
            let last_comma = s.rfind(',')?;
            let last_dot = s.rfind('.')?;
            if last_comma > last_dot {
                s.replace('.', "").replace(',', ".")
            } else {
                s.replace(',', "")
            }
        }
    };
    (out.matches('.').count() <= 1).then_some(out)
}

/// Multiplier taking values from the detected unit to the target unit
pub fn scale_factor(unit_divisor: u64, target_unit: u64) -> Decimal {
    if target_unit == 0 {
        return Decimal::ONE;
    }
    Decimal::from(unit_divisor) / Decimal::from(target_unit)
}
