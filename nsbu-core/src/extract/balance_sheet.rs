//! Code-keyed extraction (balance sheets, coded cash flow statements)

use rust_decimal::Decimal;

use super::{Extraction, ItemKey, ItemSet, LineItem, RowWalk, StatementRules};
use crate::error::ConvertError;
use crate::reader::Resolved;
use crate::text::{looks_like_code, normalize};
use crate::warning::{Warning, WarningKind};

pub(crate) fn extract(
    walk: &mut RowWalk<'_>,
    rules: &StatementRules,
) -> Result<Extraction, ConvertError> {
    extract_coded(walk, rules)
}

/// Normalize a line code cell: numeric `10` and text `"10"` become `"010"`
pub fn normalize_code(value: Resolved<'_>) -> Option<String> {
    let code = match value {
        Resolved::Number(n) if n.fract() == 0.0 && n >= 0.0 => format!("{}", n as u64),
        Resolved::Text(t) => t.trim().trim_end_matches('.').to_string(),
        _ => return None,
    };
    if !looks_like_code(&code) {
        return None;
    }
    if code.chars().all(|c| c.is_ascii_digit()) && code.len() < 3 {
        return Some(format!("{:0>3}", code));
    }
    Some(code)
}

pub(crate) fn extract_coded(
    walk: &mut RowWalk<'_>,
    rules: &StatementRules,
) -> Result<Extraction, ConvertError> {
    let mut items = ItemSet::default();
    let Some(code_col) = walk.descriptor.code_col else {
        return Ok(items.finish());
    };
    let periods = walk.periods();

    for row in walk.row_indices(walk.descriptor.data_rows()) {
        walk.poll()?;
        items.scanned();

        if walk.is_helper_row(row) {
            tracing::trace!(row, "helper row dropped");
            items.dropped();
            continue;
        }

        let label = walk.label(row).unwrap_or_default();
        let code = walk
            .sheet
            .get_cell(row, code_col)
            .and_then(|c| normalize_code(c.value.resolve()));
        let values = walk.values(row, &mut items);

        let subheader = walk.is_bold(row) || rules.is_skipped(None, &normalize(label));
        match code {
            Some(code) if subheader => {
                tracing::trace!(row, %code, "subheader");
                items.subheader(ItemKey::Code(code), label, row, periods);
            }
            Some(code) => {
                tracing::trace!(row, %code, "leaf");
                items.leaf(LineItem {
                    key: ItemKey::Code(code),
                    label: label.to_string(),
                    period_values: values,
                    is_subheader: false,
                    row,
                });
            }
            None if label.is_empty() => {}
            None if !subheader && values.iter().flatten().any(|v| *v != Decimal::ZERO) => {
                items.warn(
                    Warning::new(
                        WarningKind::UnmappedCode,
                        format!("row {} '{}' has values but no line code", row + 1, label),
                    )
                    .at_row(row),
                );
                items.dropped();
            }
            None => {
                let key = ItemKey::Label {
                    section: String::new(),
                    tag: None,
                    label: label.to_string(),
                };
                items.subheader(key, label, row, periods);
            }
        }
    }
    Ok(items.finish())
}
