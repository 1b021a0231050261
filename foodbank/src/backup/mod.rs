mod archive;
mod export;
mod restore;

pub use export::{export, snapshot, ExportFile};
pub use restore::RestoreEngine;

use crate::error::{FoodbankError, Result};
use crate::models::{
    Attendance, AuditLogEntry, Client, RegistrationRequest, Staff, VerificationCode,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version tag written into every backup.
pub const BACKUP_VERSION: &str = "1.0";

/// A full snapshot of the six collections.
///
/// Field order here is the JSON key order of the backup document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    /// Missing in the document reads as empty, which restore rejects.
    #[serde(default)]
    pub version: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: String,
    pub staff: Vec<Staff>,
    pub clients: Vec<Client>,
    pub attendance: Vec<Attendance>,
    pub audit_log: Vec<AuditLogEntry>,
    pub registration_requests: Vec<RegistrationRequest>,
    pub verification_codes: Vec<VerificationCode>,
}

impl Backup {
    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| FoodbankError::Input(format!("Invalid backup document: {e}")))
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_zip(data: &[u8]) -> Result<Self> {
        archive::read_archive(data)
    }

    pub fn to_zip(&self) -> Result<Vec<u8>> {
        archive::write_archive(self)
    }

    pub fn counts(&self) -> CollectionCounts {
        CollectionCounts {
            staff: self.staff.len(),
            clients: self.clients.len(),
            attendance: self.attendance.len(),
            audit_log: self.audit_log.len(),
            registration_requests: self.registration_requests.len(),
            verification_codes: self.verification_codes.len(),
        }
    }
}

/// Record counts per collection, as exported or restored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionCounts {
    pub staff: usize,
    pub clients: usize,
    pub attendance: usize,
    pub audit_log: usize,
    pub registration_requests: usize,
    pub verification_codes: usize,
}

impl CollectionCounts {
    pub fn total(&self) -> usize {
        self.staff
            + self.clients
            + self.attendance
            + self.audit_log
            + self.registration_requests
            + self.verification_codes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// One JSON document.
    Json,
    /// A ZIP archive with one CSV per collection.
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "zip",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Json => write!(f, "json"),
            ExportFormat::Csv => write!(f, "csv"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = FoodbankError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" | "zip" => Ok(ExportFormat::Csv),
            other => Err(FoodbankError::Input(format!(
                "Unknown export format '{other}' (expected json or csv)"
            ))),
        }
    }
}

/// `foodbank-backup-YYYY-MM-DD.{json|zip}`
pub fn backup_filename(format: ExportFormat, date: NaiveDate) -> String {
    format!(
        "foodbank-backup-{}.{}",
        date.format("%Y-%m-%d"),
        format.extension()
    )
}
