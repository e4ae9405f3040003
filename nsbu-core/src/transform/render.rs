//! Excel formulas over flattened layout rows

use crate::classify::Sign;
use crate::reader::CellReference;

use super::layout::{LayoutRow, RowFormula};

/// Where the writer puts the flattened rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// 1-based sheet row of `rows()[0]`
    pub first_row: u32,
    /// 0-based column of the first period
    pub first_value_col: u32,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            first_row: 2,
            first_value_col: 2,
        }
    }
}

impl Placement {
    fn cell(&self, row_index: usize, period: usize) -> String {
        format!(
            "{}{}",
            CellReference::col_to_letter(self.first_value_col + period as u32),
            self.first_row as usize + row_index
        )
    }
}

/// Formula for one period of a row, `None` for rows holding plain values
pub fn render_formula(row: &LayoutRow, period: usize, placement: &Placement) -> Option<String> {
    match row.formula.as_ref()? {
        RowFormula::Sum(indices) => Some(render_sum(indices, period, placement)),
        RowFormula::Linear(terms) => Some(render_linear(terms, period, placement)),
    }
}

fn render_sum(indices: &[usize], period: usize, placement: &Placement) -> String {
    if indices.is_empty() {
        return "=0".to_string();
    }
    let mut sorted = indices.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut parts = Vec::new();
    let mut start = sorted[0];
    let mut end = start;
    for &i in &sorted[1..] {
        if i == end + 1 {
            end = i;
            continue;
        }
        parts.push(span(start, end, period, placement));
        start = i;
        end = i;
    }
    parts.push(span(start, end, period, placement));
    format!("=SUM({})", parts.join(","))
}

fn span(start: usize, end: usize, period: usize, placement: &Placement) -> String {
    if start == end {
        placement.cell(start, period)
    } else {
        format!(
            "{}:{}",
            placement.cell(start, period),
            placement.cell(end, period)
        )
    }
}

fn render_linear(terms: &[(Sign, usize)], period: usize, placement: &Placement) -> String {
    if terms.is_empty() {
        return "=0".to_string();
    }
    let mut out = String::from("=");
    for (i, (sign, index)) in terms.iter().enumerate() {
        match (i, sign) {
            (0, Sign::Plus) => {}
            (_, Sign::Minus) => out.push('-'),
            (_, Sign::Plus) => out.push('+'),
        }
        out.push_str(&placement.cell(*index, period));
    }
    out
}
