//! Profit and loss extraction over resolved section slices

use rust_decimal::Decimal;

use super::{Extraction, ItemKey, ItemSet, LineItem, RowWalk, StatementRules, magnitudes};
use crate::error::ConvertError;
use crate::text::normalize;

pub(crate) fn extract(
    walk: &mut RowWalk<'_>,
    rules: &StatementRules,
) -> Result<Extraction, ConvertError> {
    let mut items = ItemSet::default();
    let periods = walk.periods();
    let descriptor = walk.descriptor;
    let Some(boundaries) = descriptor.boundaries.as_ref() else {
        return Ok(items.finish());
    };

    for slice in boundaries.slices(descriptor.last_row) {
        let section = slice.section;

        // A non-bold marker row carrying values is a leaf of its own section
        walk.poll()?;
        items.scanned();
        if walk.is_helper_row(slice.marker_row) {
            tracing::trace!(row = slice.marker_row, section, "helper marker row dropped");
            items.dropped();
        } else if let Some(label) = walk.label(slice.marker_row) {
            let values = walk.values(slice.marker_row, &mut items);
            if !walk.is_bold(slice.marker_row) && values.iter().any(Option::is_some) {
                leaf(&mut items, rules, section, label, values, slice.marker_row);
            } else {
                items.subheader(
                    ItemKey::Label {
                        section: section.to_string(),
                        tag: None,
                        label: label.to_string(),
                    },
                    label,
                    slice.marker_row,
                    periods,
                );
            }
        }

        for row in walk.row_indices(slice.body.clone()) {
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
            if walk.is_bold(row) || rules.is_skipped(Some(section), &norm) {
                tracing::trace!(row, section, "subheader");
                items.subheader(
                    ItemKey::Label {
                        section: section.to_string(),
                        tag: None,
                        label: label.to_string(),
                    },
                    label,
                    row,
                    periods,
                );
                continue;
            }
            let values = walk.values(row, &mut items);
            leaf(&mut items, rules, section, label, values, row);
        }
    }
    Ok(items.finish())
}

fn leaf(
    items: &mut ItemSet,
    rules: &StatementRules,
    section: &str,
    label: &str,
    values: Vec<Option<Decimal>>,
    row: u32,
) {
    let norm = normalize(label);
    if rules.is_bucketed(section) {
        let bucket = rules.bucket_for(&norm);
        tracing::trace!(row, section, bucket, "bucketed");
        let values = if rules.is_magnitude(section, None) {
            magnitudes(values)
        } else {
            values
        };
        items.accumulate(LineItem {
            key: ItemKey::Bucket {
                section: section.to_string(),
                bucket: bucket.to_string(),
            },
            label: bucket.to_string(),
            period_values: values,
            is_subheader: false,
            row,
        });
        return;
    }

    let tag = if rules.is_tagged(section) {
        rules.tag_for(Some(section), &norm).map(str::to_string)
    } else {
        None
    };
    let values = if rules.is_magnitude(section, tag.as_deref()) {
        magnitudes(values)
    } else {
        values
    };
    tracing::trace!(row, section, tag = ?tag, "leaf");
    items.leaf(LineItem {
        key: ItemKey::Label {
            section: section.to_string(),
            tag,
            label: label.to_string(),
        },
        label: label.to_string(),
        period_values: values,
        is_subheader: false,
        row,
    });
}
