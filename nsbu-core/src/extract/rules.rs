//! Ordered `(pattern, tag)` row rules loaded from TOML

use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::classify::builtin;
use crate::error::TableError;
use crate::statement::StatementType;

const TABLE: &str = "row_rules";

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRowRules {
    version: String,
    #[serde(default)]
    balance_sheet: RawStatementRules,
    #[serde(default)]
    cash_flow: RawStatementRules,
    #[serde(default)]
    profit_loss: RawStatementRules,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawStatementRules {
    #[serde(default)]
    skip: Vec<RawSkip>,
    #[serde(default)]
    markers: Vec<RawMarker>,
    #[serde(default)]
    buckets: Vec<RawBucket>,
    #[serde(default)]
    bucketed_sections: Vec<String>,
    default_bucket: Option<String>,
    #[serde(default)]
    tags: Vec<RawTag>,
    #[serde(default)]
    default_tags: BTreeMap<String, String>,
    #[serde(default)]
    magnitude_sections: BTreeSet<String>,
    #[serde(default)]
    magnitude_tags: BTreeSet<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSkip {
    pattern: String,
    #[serde(default)]
    sections: Vec<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMarker {
    section: String,
    pattern: String,
    after: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBucket {
    bucket: String,
    pattern: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTag {
    tag: String,
    pattern: String,
    #[serde(default)]
    sections: Vec<String>,
}

/// Skip pattern, optionally limited to some sections
#[derive(Debug, Clone)]
pub struct SkipRule {
    pub pattern: Regex,
    pub sections: Vec<String>,
}

/// Section marker; `after` makes it subject to the distance heuristic
#[derive(Debug, Clone)]
pub struct Marker {
    pub section: String,
    pub pattern: Regex,
    pub after: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TagRule {
    pub tag: String,
    pub pattern: Regex,
    pub sections: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StatementRules {
    pub skip: Vec<SkipRule>,
    pub markers: Vec<Marker>,
    pub buckets: Vec<(Regex, String)>,
    pub bucketed_sections: Vec<String>,
    pub default_bucket: String,
    pub tags: Vec<TagRule>,
    pub default_tags: BTreeMap<String, String>,
    pub magnitude_sections: BTreeSet<String>,
    pub magnitude_tags: BTreeSet<String>,
}

fn applies(sections: &[String], section: Option<&str>) -> bool {
    sections.is_empty() || section.is_some_and(|s| sections.iter().any(|x| x == s))
}

impl StatementRules {
    /// Label matches a skip pattern for the section
    pub fn is_skipped(&self, section: Option<&str>, label: &str) -> bool {
        self.skip
            .iter()
            .any(|r| applies(&r.sections, section) && r.pattern.is_match(label))
    }

    /// First marker whose pattern matches
    pub fn marker_for(&self, label: &str) -> Option<&Marker> {
        self.markers.iter().find(|m| m.pattern.is_match(label))
    }

    pub fn is_bucketed(&self, section: &str) -> bool {
        self.bucketed_sections.iter().any(|s| s == section)
    }

    pub fn bucket_for(&self, label: &str) -> &str {
        self.buckets
            .iter()
            .find(|(pattern, _)| pattern.is_match(label))
            .map(|(_, bucket)| bucket.as_str())
            .unwrap_or(&self.default_bucket)
    }

    /// Whether any tag rule or default tag applies to the section
    pub fn is_tagged(&self, section: &str) -> bool {
        self.default_tags.contains_key(section)
            || self
                .tags
                .iter()
                .any(|t| !t.sections.is_empty() && t.sections.iter().any(|s| s == section))
    }

    /// First matching tag rule, then the section default
    pub fn tag_for(&self, section: Option<&str>, label: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| applies(&t.sections, section) && t.pattern.is_match(label))
            .map(|t| t.tag.as_str())
            .or_else(|| section.and_then(|s| self.default_tags.get(s)).map(String::as_str))
    }

    /// Values in this section or with this tag are read as magnitudes
    pub fn is_magnitude(&self, section: &str, tag: Option<&str>) -> bool {
        self.magnitude_sections.contains(section)
            || tag.is_some_and(|t| self.magnitude_tags.contains(t))
    }

    fn compile(raw: RawStatementRules, statement: &str) -> Result<Self, TableError> {
        let skip = raw
            .skip
            .into_iter()
            .map(|r| {
                Ok(SkipRule {
                    pattern: compile_pattern(statement, &r.pattern)?,
                    sections: r.sections,
                })
            })
            .collect::<Result<Vec<_>, TableError>>()?;
        let markers = raw
            .markers
            .into_iter()
            .map(|m| {
                Ok(Marker {
                    pattern: compile_pattern(statement, &m.pattern)?,
                    section: m.section,
                    after: m.after,
                })
            })
            .collect::<Result<Vec<_>, TableError>>()?;
        let buckets = raw
            .buckets
            .into_iter()
            .map(|b| Ok((compile_pattern(statement, &b.pattern)?, b.bucket)))
            .collect::<Result<Vec<_>, TableError>>()?;
        let tags = raw
            .tags
            .into_iter()
            .map(|t| {
                Ok(TagRule {
                    pattern: compile_pattern(statement, &t.pattern)?,
                    tag: t.tag,
                    sections: t.sections,
                })
            })
            .collect::<Result<Vec<_>, TableError>>()?;

        let sections: BTreeSet<&str> = markers.iter().map(|m| m.section.as_str()).collect();
        for marker in &markers {
            if let Some(after) = &marker.after
                && !sections.contains(after.as_str())
            {
                return Err(TableError::Invalid {
                    table: TABLE.to_string(),
                    reason: format!(
                        "{}: marker '{}' is placed after unknown section '{}'",
                        statement, marker.section, after
                    ),
                });
            }
        }
        if !raw.bucketed_sections.is_empty() && raw.default_bucket.is_none() {
            return Err(TableError::Invalid {
                table: TABLE.to_string(),
                reason: format!("{}: bucketed sections need a default_bucket", statement),
            });
        }

        Ok(Self {
            skip,
            markers,
            buckets,
            bucketed_sections: raw.bucketed_sections,
            default_bucket: raw.default_bucket.unwrap_or_default(),
            tags,
            default_tags: raw.default_tags,
            magnitude_sections: raw.magnitude_sections,
            magnitude_tags: raw.magnitude_tags,
        })
    }
}

fn compile_pattern(statement: &str, pattern: &str) -> Result<Regex, TableError> {
    Regex::new(pattern).map_err(|e| TableError::Invalid {
        table: TABLE.to_string(),
        reason: format!("{}: bad pattern '{}': {}", statement, pattern, e),
    })
}

/// Row rules for every statement type
#[derive(Debug, Clone)]
pub struct RowRules {
    pub version: String,
    balance_sheet: StatementRules,
    cash_flow: StatementRules,
    profit_loss: StatementRules,
}

impl RowRules {
    pub fn from_toml_str(content: &str) -> Result<Self, TableError> {
        let raw: RawRowRules = toml::from_str(content).map_err(|source| TableError::Parse {
            table: TABLE.to_string(),
            source,
        })?;
        Ok(Self {
            version: raw.version,
            balance_sheet: StatementRules::compile(raw.balance_sheet, "balance_sheet")?,
            cash_flow: StatementRules::compile(raw.cash_flow, "cash_flow")?,
            profit_loss: StatementRules::compile(raw.profit_loss, "profit_loss")?,
        })
    }

    pub fn builtin() -> Result<Self, TableError> {
        Self::from_toml_str(builtin::ROW_RULES)
    }

    /// `row_rules.toml` from a directory, or the embedded rules when absent
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self, TableError> {
        let path = dir.as_ref().join("row_rules.toml");
        if !path.is_file() {
            return Self::builtin();
        }
        let content = std::fs::read_to_string(&path).map_err(|source| TableError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn get(&self, statement: StatementType) -> &StatementRules {
        match statement {
            StatementType::BalanceSheet => &self.balance_sheet,
            StatementType::CashFlow => &self.cash_flow,
            StatementType::ProfitLoss => &self.profit_loss,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::normalize;
    use rstest::rstest;

    fn rules() -> RowRules {
        RowRules::builtin().unwrap()
    }

    #[rstest]
    #[case("Заработная плата административного персонала", "payroll")]
    #[case("Единый социальный платеж с заработной платы", "social_tax")]
    #[case("Амортизация автомобилей", "depreciation")]
    #[case("ГСМ", "vehicle")]
    #[case("Ish haqi", "payroll")]
    #[case("Bank services", "other")]
    fn test_bucket_order(#[case] label: &str, #[case] bucket: &str) {
        let rules = rules();
        assert_eq!(
            rules.get(StatementType::ProfitLoss).bucket_for(&normalize(label)),
            bucket
        );
    }

    #[rstest]
    #[case("Расходы по процентам", "finance_costs")]
    #[case("Доходы по процентам", "finance_income")]
    #[case("Штрафы и пени", "other_expense")]
    #[case("Доход от аренды", "other_income")]
    fn test_other_income_tags(#[case] label: &str, #[case] tag: &str) {
        let rules = rules();
        assert_eq!(
            rules
                .get(StatementType::ProfitLoss)
                .tag_for(Some("other_income"), &normalize(label)),
            Some(tag)
        );
    }

    #[rstest]
    #[case("Выручка", Some("revenue"))]
    #[case("Себестоимость реализованной продукции", Some("cost_of_sales"))]
    #[case("Административные расходы", Some("admin"))]
    #[case("Прочие операционные расходы", Some("other_opex"))]
    #[case("Boshqa operatsion daromadlar", Some("other_income"))]
    #[case("Налог на прибыль", Some("income_tax"))]
    #[case("Аренда офиса", None)]
    fn test_profit_loss_markers(#[case] label: &str, #[case] section: Option<&str>) {
        let rules = rules();
        assert_eq!(
            rules
                .get(StatementType::ProfitLoss)
                .marker_for(&normalize(label))
                .map(|m| m.section.as_str()),
            section
        );
    }

    #[rstest]
    #[case("Оплата поставщикам", "outflow")]
    #[case("Поступления от покупателей", "inflow")]
    #[case("Proceeds from borrowings", "inflow")]
    #[case("Repayment of loans", "outflow")]
    fn test_cash_flow_tags(#[case] label: &str, #[case] tag: &str) {
        let rules = rules();
        assert_eq!(
            rules
                .get(StatementType::CashFlow)
                .tag_for(Some("operating"), &normalize(label)),
            Some(tag)
        );
    }

    #[test]
    fn test_skip_patterns() {
        let rules = rules();
        let pl = rules.get(StatementType::ProfitLoss);
        assert!(pl.is_skipped(Some("revenue"), &normalize("Итого выручка")));
        assert!(pl.is_skipped(Some("cost_of_sales"), &normalize("Валовая прибыль")));
        assert!(!pl.is_skipped(Some("revenue"), &normalize("Товар А")));
    }

    #[test]
    fn test_rejects_bad_pattern() {
        let content = "version = \"x\"\n[balance_sheet]\nskip = [{ pattern = '(' }]\n";
        assert!(matches!(
            RowRules::from_toml_str(content),
            Err(TableError::Invalid { .. })
        ));
    }

    #[test]
    fn test_rejects_unknown_after_section() {
        let content = r#"
version = "x"
[[profit_loss.markers]]
section = "other_opex"
pattern = "x"
after = "admin"
"#;
        assert!(RowRules::from_toml_str(content).is_err());
    }
}
