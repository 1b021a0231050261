use super::{backup_filename, Backup, ExportFormat, BACKUP_VERSION};
use crate::db::Database;
use crate::error::Result;
use chrono::Utc;

/// A rendered backup ready to be written or sent.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportFile {
    pub filename: String,
    pub content: Vec<u8>,
}

/// Read all six collections, each ordered by `created_at` then `id`.
///
/// The reads share one transaction so the snapshot is consistent even if
/// another connection writes while it is taken.
pub fn snapshot(db: &Database, created_by: &str) -> Result<Backup> {
    let tx = db.begin()?;
    let backup = Backup {
        version: BACKUP_VERSION.to_string(),
        created_at: Utc::now(),
        created_by: created_by.to_string(),
        staff: db.list_all()?,
        clients: db.list_all()?,
        attendance: db.list_all()?,
        audit_log: db.list_all()?,
        registration_requests: db.list_all()?,
        verification_codes: db.list_all()?,
    };
    tx.commit()?;

    let counts = backup.counts();
    log::info!(
        "Snapshot taken: {} records ({} staff, {} clients, {} attendance, {} audit, {} requests, {} codes)",
        counts.total(),
        counts.staff,
        counts.clients,
        counts.attendance,
        counts.audit_log,
        counts.registration_requests,
        counts.verification_codes
    );
    Ok(backup)
}

/// Take a snapshot and render it in `format`.
pub fn export(db: &Database, format: ExportFormat, created_by: &str) -> Result<ExportFile> {
    let backup = snapshot(db, created_by)?;
    let content = match format {
        ExportFormat::Json => backup.to_json()?,
        ExportFormat::Csv => backup.to_zip()?,
    };
    Ok(ExportFile {
        filename: backup_filename(format, backup.created_at.date_naive()),
        content,
    })
}
