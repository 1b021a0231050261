use crate::error::{FoodbankError, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Days an appointment can ever fall on. Sunday is closed.
pub const OPENING_DAYS: &[&str] = &["monday", "tuesday", "wednesday", "thursday", "friday", "saturday"];

/// Top-level configuration parsed from foodbank.yaml. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub validation: ValidationRules,
    pub import: ImportSettings,
    pub barcode: BarcodeSettings,
    pub backup: BackupSettings,
    pub lock: LockSettings,
}

/// Row-level rules applied by the validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationRules {
    /// Weekday names accepted for `appointment_day`, compared case-insensitively.
    pub allowed_days: Vec<String>,
    /// 24-hour `HH:MM` pattern for `appointment_time`.
    pub time_pattern: String,
    /// Largest number of rows accepted by validate and import.
    pub max_rows: usize,
}

impl Default for ValidationRules {
    fn default() -> Self {
        ValidationRules {
            allowed_days: OPENING_DAYS
                .iter()
                .map(|d| d.to_string())
                .collect(),
            time_pattern: r"^([01]\d|2[0-3]):[0-5]\d$".to_string(),
            max_rows: 10_000,
        }
    }
}

impl ValidationRules {
    /// Every allowed day must be one of Monday to Saturday.
    pub fn check_days(&self) -> Result<()> {
        for day in &self.allowed_days {
            let folded = day.trim().to_lowercase();
            if folded == "sunday" {
                return Err(FoodbankError::Configuration(
                    "validation.allowed_days cannot include Sunday; the food bank is closed".into(),
                ));
            }
            if !OPENING_DAYS.contains(&folded.as_str()) {
                return Err(FoodbankError::Configuration(format!(
                    "validation.allowed_days: '{day}' is not a day from Monday to Saturday"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportSettings {
    pub default_batch_size: usize,
    pub max_batch_size: usize,
    /// Write an audit_log row for each client created by a bulk import.
    pub audit: bool,
}

impl Default for ImportSettings {
    fn default() -> Self {
        ImportSettings {
            default_batch_size: 50,
            max_batch_size: 100,
            audit: true,
        }
    }
}

impl ImportSettings {
    /// Resolve a requested batch size: 0 means the default, anything above the cap is clamped.
    pub fn effective_batch_size(&self, requested: usize) -> usize {
        let size = if requested == 0 {
            self.default_batch_size
        } else {
            requested
        };
        size.clamp(1, self.max_batch_size.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BarcodeSettings {
    pub prefix: String,
    /// How many times a barcode is regenerated after a unique-constraint hit.
    /// Zero keeps collisions as plain row failures.
    pub collision_retries: u32,
}

impl Default for BarcodeSettings {
    fn default() -> Self {
        BarcodeSettings {
            prefix: "FFB".to_string(),
            collision_retries: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    pub supported_versions: Vec<String>,
}

impl Default for BackupSettings {
    fn default() -> Self {
        BackupSettings {
            supported_versions: vec![crate::backup::BACKUP_VERSION.to_string()],
        }
    }
}

impl BackupSettings {
    pub fn supports(&self, version: &str) -> bool {
        let version = version.trim();
        !version.is_empty() && self.supported_versions.iter().any(|v| v == version)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// A maintenance lock older than this is considered abandoned and reclaimed.
    pub stale_after_secs: i64,
}

impl Default for LockSettings {
    fn default() -> Self {
        LockSettings {
            stale_after_secs: 3600,
        }
    }
}

impl LockSettings {
    /// Largest staleness window chrono can represent.
    pub const MAX_STALE_AFTER_SECS: i64 = i64::MAX / 1000;

    pub fn stale_after(&self) -> Result<Duration> {
        Some(self.stale_after_secs)
            .filter(|s| (1..=Self::MAX_STALE_AFTER_SECS).contains(s))
            .and_then(Duration::try_seconds)
            .ok_or_else(|| {
                FoodbankError::Configuration(format!(
                    "lock.stale_after_secs must be between 1 and {}, got {}",
                    Self::MAX_STALE_AFTER_SECS,
                    self.stale_after_secs
                ))
            })
    }
}

/// Parse a foodbank.yaml file into a Config
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        FoodbankError::Configuration(format!("Cannot read {}: {e}", path.display()))
    })?;
    parse_config_str(&content)
}

/// Parse a config YAML string into a Config
pub fn parse_config_str(content: &str) -> Result<Config> {
    if content.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config = serde_yaml::from_str(content)?;
    config.check()?;
    Ok(config)
}

impl Config {
    /// Reject settings no operation could run with.
    pub fn check(&self) -> Result<()> {
        if self.import.max_batch_size == 0 {
            return Err(FoodbankError::Configuration(
                "import.max_batch_size must be at least 1".into(),
            ));
        }
        if self.validation.max_rows == 0 {
            return Err(FoodbankError::Configuration(
                "validation.max_rows must be at least 1".into(),
            ));
        }
        self.validation.check_days()?;
        self.lock.stale_after()?;
        if self.backup.supported_versions.iter().all(|v| v.trim().is_empty()) {
            return Err(FoodbankError::Configuration(
                "backup.supported_versions must name at least one version".into(),
            ));
        }
        Ok(())
    }
}
