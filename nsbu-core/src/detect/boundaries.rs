//! Two-pass section boundaries for profit and loss sheets
//!
//! Pass 1 walks every row once and records the first row matching each
//! section marker. Markers declared with `after` are ambiguous: they only open
//! a section when they sit more than `distance` rows past the start of the
//! anchor section. Pass 2 (the extractor) consumes the result as slices.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::extract::rules::StatementRules;
use crate::reader::Sheet;
use crate::text::normalize;
use crate::warning::{Warning, WarningKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionStart {
    pub section: String,
    /// Row of the marker label
    pub row: u32,
}

/// Resolved section starts, ordered by row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SectionBoundaries {
    pub starts: Vec<SectionStart>,
}

/// Rows belonging to one section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionSlice<'a> {
    pub section: &'a str,
    pub marker_row: u32,
    /// Rows after the marker up to the next marker or the last meaningful row
    pub body: std::ops::RangeInclusive<u32>,
}

impl SectionBoundaries {
    pub fn start_of(&self, section: &str) -> Option<u32> {
        self.starts
            .iter()
            .find(|s| s.section == section)
            .map(|s| s.row)
    }

    pub fn slices(&self, last_row: u32) -> Vec<SectionSlice<'_>> {
        self.starts
            .iter()
            .enumerate()
            .map(|(i, start)| {
                let end = self
                    .starts
                    .get(i + 1)
                    .map(|next| next.row.saturating_sub(1))
                    .unwrap_or(last_row);
                SectionSlice {
                    section: &start.section,
                    marker_row: start.row,
                    body: (start.row + 1)..=end,
                }
            })
            .collect()
    }
}

/// Pass 1 over `first_row..=last_row` of the label column
pub fn resolve_boundaries(
    sheet: &Sheet,
    label_col: u32,
    first_row: u32,
    last_row: u32,
    rules: &StatementRules,
    distance: u32,
) -> (SectionBoundaries, Vec<Warning>) {
    let mut warnings = Vec::new();
    let mut found: BTreeMap<String, u32> = BTreeMap::new();
    // (section, row, anchor section)
    let mut ambiguous: Vec<(String, u32, String)> = Vec::new();

    if first_row <= last_row {
        for row in first_row..=last_row {
            let Some(text) = sheet.text_at(row, label_col) else {
                continue;
            };
            let label = normalize(text);
            let Some(marker) = rules.marker_for(&label) else {
                continue;
            };
            if found.contains_key(&marker.section)
                || ambiguous.iter().any(|(s, _, _)| *s == marker.section)
            {
                continue;
            }
            match &marker.after {
                Some(anchor) => ambiguous.push((marker.section.clone(), row, anchor.clone())),
                None => {
                    tracing::trace!(section = %marker.section, row, "section marker");
                    found.insert(marker.section.clone(), row);
                }
            }
        }
    }

    let mut demoted = Vec::new();
    for (section, row, anchor) in ambiguous {
        match found.get(&anchor).copied() {
            Some(anchor_row) if row > anchor_row + distance => {
                warnings.push(
                    Warning::new(
                        WarningKind::AmbiguousBoundary,
                        format!(
                            "'{}' at row {} is {} rows past the {} start, treated as a section boundary (threshold {})",
                            section,
                            row + 1,
                            row.saturating_sub(anchor_row),
                            anchor,
                            distance
                        ),
                    )
                    .at_row(row),
                );
                found.insert(section, row);
            }
            Some(anchor_row) => {
                warnings.push(
                    Warning::new(
                        WarningKind::AmbiguousBoundary,
                        format!(
                            "'{}' at row {} is {} rows past the {} start, treated as a {} item (threshold {})",
                            section,
                            row + 1,
                            row.saturating_sub(anchor_row),
                            anchor,
                            anchor,
                            distance
                        ),
                    )
                    .at_row(row),
                );
                demoted.push(section);
            }
            None => {
                warnings.push(
                    Warning::new(
                        WarningKind::AmbiguousBoundary,
                        format!(
                            "'{}' at row {} treated as a section boundary, {} section not found",
                            section,
                            row + 1,
                            anchor
                        ),
                    )
                    .at_row(row),
                );
                found.insert(section, row);
            }
        }
    }

    let mut reported = Vec::new();
    for marker in &rules.markers {
        let section = marker.section.as_str();
        if found.contains_key(section) || demoted.iter().any(|d| d == section) {
            continue;
        }
        if reported.contains(&section) {
            continue;
        }
        reported.push(section);
        warnings.push(Warning::new(
            WarningKind::MissingSection,
            format!("section '{}' not found", section),
        ));
    }

    let mut starts: Vec<SectionStart> = found
        .into_iter()
        .map(|(section, row)| SectionStart { section, row })
        .collect();
    starts.sort_by_key(|s| s.row);

    (SectionBoundaries { starts }, warnings)
}
