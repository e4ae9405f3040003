//! Cash flow extraction
//!
//! Sheets with a code column are read like balance sheets. Sheets without
//! one are read by label: section markers switch the current section and
//! every leaf is tagged inflow or outflow.

use rust_decimal::Decimal;

use super::balance_sheet::extract_coded;
use super::{Extraction, ItemKey, ItemSet, LineItem, RowWalk, StatementRules, magnitudes};
use crate::error::ConvertError;
use crate::text::normalize;
use crate::warning::{Warning, WarningKind};

pub(crate) fn extract(
    walk: &mut RowWalk<'_>,
    rules: &StatementRules,
) -> Result<Extraction, ConvertError> {
    if walk.descriptor.code_col.is_some() {
        extract_coded(walk, rules)
    } else {
        extract_labelled(walk, rules)
    }
}

fn sign_tag(values: &[Option<Decimal>]) -> &'static str {
    let negative = values
        .iter()
        .flatten()
        .find(|v| !v.is_zero())
        .is_some_and(|v| v.is_sign_negative());
    if negative { "outflow" } else { "inflow" }
}

fn extract_labelled(
    walk: &mut RowWalk<'_>,
    rules: &StatementRules,
) -> Result<Extraction, ConvertError> {
    let mut items = ItemSet::default();
    let periods = walk.periods();
    let mut section: Option<String> = None;

    for row in walk.row_indices(walk.descriptor.data_rows()) {
        walk.poll()?;
        items.scanned();

        if walk.is_helper_row(row) {
            items.dropped();
            continue;
        }
        let Some(label) = walk.label(row) else {
            continue;
        };
        let norm = normalize(label);
        let values = walk.values(row, &mut items);
        let has_values = values.iter().any(Option::is_some);
        let subheader_key = |section: &Option<String>| ItemKey::Label {
            section: section.clone().unwrap_or_default(),
            tag: None,
            label: label.to_string(),
        };

        if rules.is_skipped(section.as_deref(), &norm) {
            items.subheader(subheader_key(&section), label, row, periods);
            continue;
        }

        let bold = walk.is_bold(row);
        if let Some(marker) = rules.marker_for(&norm) {
            tracing::trace!(row, section = %marker.section, "cash flow section");
            section = Some(marker.section.clone());
            if bold || !has_values {
                items.subheader(subheader_key(&section), label, row, periods);
                continue;
            }
        } else if bold {
            items.subheader(subheader_key(&section), label, row, periods);
            continue;
        }

        let Some(current) = section.as_deref() else {
            if values.iter().flatten().any(|v| !v.is_zero()) {
                items.warn(
                    Warning::new(
                        WarningKind::UnmappedCode,
                        format!("row {} '{}' sits before any cash flow section", row + 1, label),
                    )
                    .at_row(row),
                );
                items.dropped();
            }
            continue;
        };

        let tag = if rules.is_tagged(current) {
            Some(
                rules
                    .tag_for(Some(current), &norm)
                    .unwrap_or_else(|| sign_tag(&values))
                    .to_string(),
            )
        } else {
            None
        };
        let values = if rules.is_magnitude(current, tag.as_deref()) {
            magnitudes(values)
        } else {
            values
        };

        items.leaf(LineItem {
            key: ItemKey::Label {
                section: current.to_string(),
                tag,
                label: label.to_string(),
            },
            label: label.to_string(),
            period_values: values,
            is_subheader: false,
            row,
        });
    }
    Ok(items.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::config::ConverterConfig;
    use crate::detect::detect;
    use crate::extract::rules::RowRules;
    use crate::extract::test_support::*;
    use crate::reader::Sheet;
    use crate::statement::StatementType;
    use rust_decimal_macros::dec;

    fn run(sheet: &Sheet) -> Extraction {
        let config = ConverterConfig::default();
        let rules = RowRules::builtin().unwrap();
        let st = StatementType::CashFlow;
        let detection = detect(sheet, st, &config, rules.get(st));
        crate::extract::extract(
            sheet,
            &detection.descriptor,
            rules.get(st),
            &config,
            &CancellationToken::new(),
        )
        .unwrap()
    }

    fn key(section: &str, tag: Option<&str>, label: &str) -> ItemKey {
        ItemKey::Label {
            section: section.into(),
            tag: tag.map(Into::into),
            label: label.into(),
        }
    }

    #[test]
    fn test_labelled_cash_flow() {
        let sheet = Sheet::from_cells(
            "ДДС",
            vec![
                text(0, 0, "тыс. сум"),
                text(1, 0, "Статья"),
                text(1, 1, "2023"),
                text(1, 2, "2024"),
                text(2, 0, "Остаток денежных средств на начало периода"),
                num(2, 1, 40.0),
                num(2, 2, 50.0),
                bold(3, 0, "Операционная деятельность"),
                text(4, 0, "Поступления от покупателей"),
                num(4, 1, 900.0),
                num(4, 2, 1000.0),
                text(5, 0, "Оплата поставщикам"),
                num(5, 1, -600.0),
                num(5, 2, -700.0),
                text(6, 0, "Прочее"),
                num(6, 1, -5.0),
                num(6, 2, 0.0),
                text(7, 0, "Итого по операционной деятельности"),
                num(7, 1, 295.0),
                num(7, 2, 300.0),
            ],
        );
        let extraction = run(&sheet);
        let leaves: Vec<&LineItem> = extraction.leaves().collect();
        let keys: Vec<&ItemKey> = leaves.iter().map(|i| &i.key).collect();
        assert_eq!(
            keys,
            vec![
                &key(
                    "opening_cash",
                    None,
                    "Остаток денежных средств на начало периода"
                ),
                &key("operating", Some("inflow"), "Поступления от покупателей"),
                &key("operating", Some("outflow"), "Оплата поставщикам"),
                &key("operating", Some("outflow"), "Прочее"),
            ]
        );
        // outflows are read as magnitudes
        assert_eq!(leaves[2].period_values, vec![Some(dec!(600)), Some(dec!(700))]);
        assert_eq!(leaves[3].period_values, vec![Some(dec!(5)), Some(dec!(0))]);
        assert!(
            extraction
                .items
                .iter()
                .any(|i| i.is_subheader && i.label.starts_with("Итого"))
        );
    }

    #[test]
    fn test_coded_cash_flow_uses_codes() {
        let sheet = Sheet::from_cells(
            "CF",
            vec![
                text(0, 0, "тыс. сум"),
                text(1, 0, "Показатель"),
                text(1, 1, "Код строки"),
                text(1, 2, "За отчетный период"),
                text(2, 0, "Поступления от покупателей"),
                text(2, 1, "020"),
                num(2, 2, 100.0),
            ],
        );
        let extraction = run(&sheet);
        assert_eq!(extraction.items[0].key, ItemKey::Code("020".into()));
        assert_eq!(extraction.items[0].period_values, vec![Some(dec!(100))]);
    }
}
