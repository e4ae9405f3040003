//! Output formatters for conversions

use anyhow::Result;
use colored::*;
use nsbu_core::transform::{LayoutRow, RowKind};
use nsbu_core::{Conversion, ConvertError, Placement, Severity, Warning, render_formula};
use rust_decimal::Decimal;
use std::path::Path;

pub type FileResult<'a> = (&'a Path, Result<Conversion, ConvertError>);

const LABEL_WIDTH: usize = 48;
const VALUE_WIDTH: usize = 16;

/// Print each conversion as an indented table followed by its warnings
pub fn print_human(results: &[FileResult<'_>], formulas: bool) {
    for (path, result) in results {
        println!("{}", format!("Converting: {}", path.display()).bold());
        match result {
            Ok(conversion) => print_conversion(conversion, formulas),
            Err(e) => println!("  {} {}", "FAILED".red().bold(), e),
        }
        println!();
    }

    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    println!("{}", "Summary:".bold().underline());
    println!("  {} {}", "Converted:".green().bold(), results.len() - failed);
    if failed > 0 {
        println!("  {} {}", "Failed:".red().bold(), failed);
    }
}

fn print_conversion(conversion: &Conversion, formulas: bool) {
    let layout = &conversion.layout;
    println!(
        "{} {}  {} {}  {} {}",
        "Sheet:".bold(),
        conversion.sheet.cyan().bold(),
        "Statement:".bold(),
        conversion.statement,
        "Table:".bold(),
        layout.table_version.bright_black()
    );
    println!();

    let mut header = format!("{:<LABEL_WIDTH$}", "");
    for period in &layout.periods {
        header.push_str(&format!("{:>VALUE_WIDTH$}", truncate(period, VALUE_WIDTH - 1)));
    }
    println!("{}", header.bold());

    let placement = Placement::default();
    for (index, row) in layout.rows().iter().enumerate() {
        print_row(row, index, &placement, formulas);
    }
    println!();

    print_warnings(&conversion.warnings);

    let stats = &conversion.stats;
    println!(
        "  {} {} rows read, {} items, {} placed, {} changes",
        "Stats:".bold(),
        stats.original_rows,
        stats.processed_rows,
        stats.transformations,
        stats.changes
    );
}

fn print_row(row: &LayoutRow, index: usize, placement: &Placement, formulas: bool) {
    let (indent, show_values) = match row.kind {
        RowKind::SectionHeader => (0, false),
        RowKind::Subheader => (1, false),
        RowKind::Item | RowKind::Memo | RowKind::Calculated => (2, true),
        RowKind::Total | RowKind::Derived => (0, true),
    };
    let label = format!("{}{}", "  ".repeat(indent), row.label);
    let mut line = format!("{:<LABEL_WIDTH$}", truncate(&label, LABEL_WIDTH - 1));
    if show_values {
        for value in &row.values {
            line.push_str(&format!("{:>VALUE_WIDTH$}", format_amount(*value)));
        }
    }

    let line = match row.kind {
        RowKind::SectionHeader => line.bold().underline(),
        RowKind::Subheader => line.italic(),
        RowKind::Memo => line.bright_black(),
        RowKind::Total => line.bold(),
        RowKind::Derived => line.bold().cyan(),
        RowKind::Item | RowKind::Calculated => line.normal(),
    };

    match render_formula(row, 0, placement).filter(|_| formulas) {
        Some(formula) => println!(
            "{:>4} {}  {}",
            index + placement.first_row as usize,
            line,
            formula.bright_black()
        ),
        None => println!("{:>4} {}", index + placement.first_row as usize, line),
    }
}

fn print_warnings(warnings: &[Warning]) {
    if warnings.is_empty() {
        println!("  {}", "✓ No warnings".green().bold());
        return;
    }
    for warning in warnings {
        let severity_str = match warning.severity {
            Severity::Error => "ERROR".red().bold(),
            Severity::Warning => "WARN".yellow().bold(),
            Severity::Info => "INFO".blue().bold(),
        };
        let position = warning
            .row
            .map(|r| format!(" row {}", r + 1))
            .unwrap_or_default();
        println!(
            "  {} [{}]{} {}",
            severity_str,
            warning.kind.as_str().bright_black(),
            position.yellow(),
            warning.message
        );
    }
}

/// Thousands-separated amount with at most two decimals
fn format_amount(value: Decimal) -> String {
    let rounded = value.round_dp(2).normalize();
    let text = rounded.abs().to_string();
    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i.to_string(), Some(f.to_string())),
        None => (text, None),
    };

    let mut grouped = String::new();
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(ch);
    }
    if let Some(frac) = frac_part {
        grouped.push('.');
        grouped.push_str(&frac);
    }
    if rounded.is_sign_negative() && !rounded.is_zero() {
        format!("({})", grouped)
    } else {
        grouped
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

/// Print conversions in JSON format
pub fn print_json(results: &[FileResult<'_>]) -> Result<()> {
    let files: Vec<serde_json::Value> = results
        .iter()
        .map(|(path, result)| match result {
            Ok(conversion) => serde_json::json!({
                "file": path.display().to_string(),
                "status": "ok",
                "conversion": conversion,
                "rows": conversion.layout.rows(),
                "summary": {
                    "transformations": conversion.stats.transformations,
                    "changes": conversion.stats.changes,
                    "original_rows": conversion.stats.original_rows,
                    "processed_rows": conversion.stats.processed_rows,
                    "errors": conversion.count_at_least(Severity::Error),
                    "warnings": conversion.warnings.len(),
                }
            }),
            Err(e) => serde_json::json!({
                "file": path.display().to_string(),
                "status": "failed",
                "error": e.to_string(),
            }),
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&files)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    #[test]
    fn test_format_amount() {
        let d = |s: &str| Decimal::from_str(s).unwrap();
        assert_eq!(format_amount(d("1234567")), "1 234 567");
        assert_eq!(format_amount(d("-200")), "(200)");
        assert_eq!(format_amount(d("999.456")), "999.46");
        assert_eq!(format_amount(d("0")), "0");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Выручка", 10), "Выручка");
        assert_eq!(truncate("Себестоимость", 6), "Себес…");
    }
}
