//! Converter configuration with a global -> per-statement fallback chain

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::statement::StatementType;

pub const DEFAULT_HEADER_SCAN_ROWS: i64 = 20;
pub const DEFAULT_OTHER_OPEX_DISTANCE: i64 = 5;
pub const DEFAULT_UNIT: i64 = 1000;
pub const DEFAULT_TARGET_UNIT: i64 = 1000;
pub const DEFAULT_CANCEL_CHECK_INTERVAL: i64 = 64;

const KNOWN_PARAMS: &[&str] = &[
    "header_scan_rows",
    "other_opex_distance",
    "default_unit",
    "target_unit",
    "cancel_check_interval",
    "sheet",
];

const VALID_UNITS: &[i64] = &[1, 1_000, 1_000_000, 1_000_000_000];

/// Main converter configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConverterConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    /// Overrides keyed by statement tag (`balance_sheet`, `cash_flow`, `profit_loss`)
    #[serde(default)]
    pub statements: HashMap<String, StatementConfig>,
}

/// Global configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(flatten)]
    pub params: HashMap<String, toml::Value>,
}

/// Statement-specific configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatementConfig {
    #[serde(flatten)]
    pub params: HashMap<String, toml::Value>,
}

impl ConverterConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: ConverterConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject unknown statement sections, unknown keys and out-of-range values
    pub fn validate(&self) -> Result<()> {
        for key in self.global.params.keys() {
            if key == "sheet" {
                anyhow::bail!(
                    "Configuration error: 'sheet' is only allowed in a statement section"
                );
            }
            if !KNOWN_PARAMS.contains(&key.as_str()) {
                anyhow::bail!("Configuration error: Unknown key '{}' in [global]", key);
            }
        }

        for (name, statement_config) in &self.statements {
            if name.parse::<StatementType>().is_err() {
                anyhow::bail!(
                    "Configuration error: Unknown statement section '[statements.{}]'",
                    name
                );
            }
            for key in statement_config.params.keys() {
                if !KNOWN_PARAMS.contains(&key.as_str()) {
                    anyhow::bail!(
                        "Configuration error: Unknown key '{}' in [statements.{}]",
                        key,
                        name
                    );
                }
            }
        }

        for statement in StatementType::ALL {
            for key in ["header_scan_rows", "cancel_check_interval", "target_unit"] {
                if let Some(value) = self.get_param_int(key, Some(statement))
                    && value <= 0
                {
                    anyhow::bail!(
                        "Configuration error: '{}' must be positive for {}",
                        key,
                        statement
                    );
                }
            }
            if let Some(value) = self.get_param_int("other_opex_distance", Some(statement))
                && value < 0
            {
                anyhow::bail!(
                    "Configuration error: 'other_opex_distance' must not be negative for {}",
                    statement
                );
            }
            if let Some(unit) = self.get_param_int("default_unit", Some(statement))
                && !VALID_UNITS.contains(&unit)
            {
                anyhow::bail!(
                    "Configuration error: 'default_unit' must be one of {:?}, got {}",
                    VALID_UNITS,
                    unit
                );
            }
        }

        Ok(())
    }

    fn statement_params(&self, statement: Option<StatementType>) -> Option<&StatementConfig> {
        let statement = statement?;
        self.statements
            .iter()
            .find(|(name, _)| name.parse::<StatementType>().ok() == Some(statement))
            .map(|(_, config)| config)
    }

    /// Get a parameter value with fallback chain: statement -> global
    pub fn get_param_int(&self, key: &str, statement: Option<StatementType>) -> Option<i64> {
        if let Some(value) = self
            .statement_params(statement)
            .and_then(|s| s.params.get(key))
            .and_then(|v| v.as_integer())
        {
            return Some(value);
        }
        self.global.params.get(key).and_then(|v| v.as_integer())
    }

    pub fn header_scan_rows(&self, statement: StatementType) -> u32 {
        self.get_param_int("header_scan_rows", Some(statement))
            .unwrap_or(DEFAULT_HEADER_SCAN_ROWS)
            .clamp(1, u32::MAX as i64) as u32
    }

    pub fn other_opex_distance(&self, statement: StatementType) -> u32 {
        self.get_param_int("other_opex_distance", Some(statement))
            .unwrap_or(DEFAULT_OTHER_OPEX_DISTANCE)
            .clamp(0, u32::MAX as i64) as u32
    }

    pub fn default_unit(&self, statement: StatementType) -> u64 {
        self.get_param_int("default_unit", Some(statement))
            .unwrap_or(DEFAULT_UNIT)
            .max(1) as u64
    }

    pub fn target_unit(&self, statement: StatementType) -> u64 {
        self.get_param_int("target_unit", Some(statement))
            .unwrap_or(DEFAULT_TARGET_UNIT)
            .max(1) as u64
    }

    pub fn cancel_check_interval(&self, statement: StatementType) -> usize {
        self.get_param_int("cancel_check_interval", Some(statement))
            .unwrap_or(DEFAULT_CANCEL_CHECK_INTERVAL)
            .max(1) as usize
    }

    /// Preferred sheet name for a statement
    pub fn sheet(&self, statement: StatementType) -> Option<&str> {
        self.statement_params(Some(statement))
            .and_then(|s| s.params.get("sheet"))
            .and_then(|v| v.as_str())
    }
}
