use crate::config::ValidationRules;
use crate::db::Database;
use crate::error::{FoodbankError, Result};
use crate::models::ImportRow;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// A business-rule violation on one field of one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub row: usize,
    pub field: String,
    pub message: String,
}

/// A non-blocking notice, currently only possible duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub row: usize,
    pub field: String,
    pub message: String,
    pub existing_id: Option<Uuid>,
}

/// Result of validating a set of import rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub total_rows: usize,
    /// Rows with no errors. Warnings do not disqualify a row.
    pub valid_rows: usize,
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
    /// Per input row, in order: true when the row has no errors.
    #[serde(skip)]
    accepted: Vec<bool>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Row numbers that carry at least one error.
    pub fn error_rows(&self) -> HashSet<usize> {
        self.errors.iter().map(|e| e.row).collect()
    }

    /// The subset of `rows` without errors, in input order.
    ///
    /// Matches by position, so `rows` must be the slice that was validated.
    /// Row numbers play no part and may repeat.
    pub fn filter_valid(&self, rows: &[ImportRow]) -> Vec<ImportRow> {
        rows.iter()
            .zip(&self.accepted)
            .filter(|(_, ok)| **ok)
            .map(|(row, _)| row.clone())
            .collect()
    }
}

/// Checks import rows against the configured rules.
///
/// Built once from `ValidationRules`; holds no mutable state.
#[derive(Debug, Clone)]
pub struct RowValidator {
    allowed_days: Vec<String>,
    time_pattern: Regex,
    max_rows: usize,
}

impl RowValidator {
    pub fn new(rules: &ValidationRules) -> Result<Self> {
        rules.check_days()?;
        let time_pattern = Regex::new(&rules.time_pattern).map_err(|e| {
            FoodbankError::Configuration(format!("Invalid appointment time pattern: {e}"))
        })?;
        Ok(RowValidator {
            allowed_days: rules
                .allowed_days
                .iter()
                .map(|d| d.trim().to_lowercase())
                .collect(),
            time_pattern,
            max_rows: rules.max_rows,
        })
    }

    /// Reject empty or oversized requests before any row is looked at.
    pub fn check_row_count(&self, count: usize) -> Result<()> {
        if count == 0 {
            return Err(FoodbankError::Input("No rows provided".into()));
        }
        if count > self.max_rows {
            return Err(FoodbankError::Input(format!(
                "Too many rows: {count} (maximum {})",
                self.max_rows
            )));
        }
        Ok(())
    }

    /// Apply the stateless field rules to one row.
    pub fn check_row(&self, row: &ImportRow) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut fail = |field: &str, message: String| {
            errors.push(ValidationError {
                row: row.row_number,
                field: field.to_string(),
                message,
            });
        };

        if row.name.trim().is_empty() {
            fail("name", "Name is required".into());
        }
        if row.address.trim().is_empty() {
            fail("address", "Address is required".into());
        }
        if row.family_size < 1 {
            fail("family_size", "Family size must be at least 1".into());
        }
        if row.num_children < 0 {
            fail("num_children", "Number of children cannot be negative".into());
        }

        if let Some(day) = present(&row.appointment_day) {
            if !self.allowed_days.contains(&day.to_lowercase()) {
                fail(
                    "appointment_day",
                    format!("Appointment day '{day}' must be one of {}", self.day_list()),
                );
            }
        }

        if let Some(time) = present(&row.appointment_time) {
            if !self.time_pattern.is_match(time) {
                fail(
                    "appointment_time",
                    format!("Appointment time '{time}' must be in 24-hour HH:MM format"),
                );
            }
        }

        errors
    }

    /// Validate every row. Errors never stop other rows from being checked.
    /// Rows without errors are looked up for possible duplicates, which are
    /// reported as warnings only. Nothing is written.
    pub fn validate(&self, db: &Database, rows: &[ImportRow]) -> Result<ValidationResult> {
        self.check_row_count(rows.len())?;

        let mut result = ValidationResult {
            total_rows: rows.len(),
            valid_rows: 0,
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            accepted: Vec::with_capacity(rows.len()),
        };

        for row in rows {
            let row_errors = self.check_row(row);
            result.accepted.push(row_errors.is_empty());
            if !row_errors.is_empty() {
                result.errors.extend(row_errors);
                continue;
            }

            result.valid_rows += 1;
            if let Some(existing) = db.find_duplicate_client(&row.name, &row.address)? {
                result.warnings.push(ValidationWarning {
                    row: row.row_number,
                    field: "name".into(),
                    message: format!(
                        "A client named '{}' is already registered at this address",
                        row.name.trim()
                    ),
                    existing_id: Some(existing),
                });
            }
        }

        result.valid = result.errors.is_empty();
        log::debug!(
            "Validated {} rows: {} valid, {} errors, {} warnings",
            result.total_rows,
            result.valid_rows,
            result.errors.len(),
            result.warnings.len()
        );
        Ok(result)
    }

    fn day_list(&self) -> String {
        self.allowed_days
            .iter()
            .map(|d| capitalize(d))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
