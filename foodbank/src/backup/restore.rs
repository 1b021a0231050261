use super::{Backup, CollectionCounts};
use crate::barcode::BarcodeGenerator;
use crate::cancel::CancelFlag;
use crate::config::Config;
use crate::db::{Database, Table};
use crate::error::{FoodbankError, Result};
use crate::models::{
    Attendance, AuditLogEntry, Client, RegistrationRequest, Staff, VerificationCode,
};
use rusqlite::Connection;

/// Replaces the six collections with the contents of a backup.
///
/// Everything happens inside one immediate transaction: deletes run
/// children-first, inserts parents-first, and any failure rolls the whole
/// restore back, leaving the previous data in place.
pub struct RestoreEngine<'a> {
    db: &'a Database,
    config: Config,
    cancel: CancelFlag,
}

impl<'a> RestoreEngine<'a> {
    pub fn new(db: &'a Database, config: &Config) -> Self {
        RestoreEngine {
            db,
            config: config.clone(),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Reject a backup whose version tag is missing or unsupported.
    pub fn check_version(&self, backup: &Backup) -> Result<()> {
        let version = backup.version.trim();
        if version.is_empty() {
            return Err(FoodbankError::Configuration(
                "Backup has no version tag".into(),
            ));
        }
        if !self.config.backup.supports(version) {
            return Err(FoodbankError::Configuration(format!(
                "Unsupported backup version '{version}' (supported: {})",
                self.config.backup.supported_versions.join(", ")
            )));
        }
        Ok(())
    }

    pub fn restore(&self, backup: &Backup) -> Result<CollectionCounts> {
        self.check_version(backup)?;

        let _lock = self.db.acquire_lock("restore", self.config.lock.stale_after()?)?;
        log::info!(
            "Restoring backup version {} taken {} by '{}'",
            backup.version.trim(),
            backup.created_at.to_rfc3339(),
            backup.created_by
        );

        let tx = self.db.begin_immediate()?;

        let mut cleared = 0;
        cleared += self.clear::<VerificationCode>()?;
        cleared += self.clear::<RegistrationRequest>()?;
        cleared += self.clear::<AuditLogEntry>()?;
        cleared += self.clear::<Attendance>()?;
        cleared += self.clear::<Client>()?;
        cleared += self.clear::<Staff>()?;
        log::debug!("Cleared {cleared} existing records");

        let unrecognised = self.unrecognised_barcodes(backup);
        if unrecognised > 0 {
            log::warn!(
                "{unrecognised} restored client(s) carry barcodes not issued under prefix '{}'",
                self.config.barcode.prefix
            );
        }

        let counts = CollectionCounts {
            staff: self.fill(&tx, &backup.staff)?,
            clients: self.fill(&tx, &backup.clients)?,
            attendance: self.fill(&tx, &backup.attendance)?,
            audit_log: self.fill(&tx, &backup.audit_log)?,
            registration_requests: self.fill(&tx, &backup.registration_requests)?,
            verification_codes: self.fill(&tx, &backup.verification_codes)?,
        };

        self.cancel.check()?;
        tx.commit()
            .map_err(|e| FoodbankError::Persistence(format!("Restore failed to commit: {e}")))?;

        log::info!("Restore complete: {} records", counts.total());
        Ok(counts)
    }

    /// Clients in `backup` whose barcode does not match the configured format.
    /// They are restored as they are.
    pub fn unrecognised_barcodes(&self, backup: &Backup) -> usize {
        let barcodes = BarcodeGenerator::new(&self.config.barcode.prefix);
        backup
            .clients
            .iter()
            .filter(|c| !barcodes.is_well_formed(&c.barcode_id))
            .count()
    }

    fn clear<T: Table>(&self) -> Result<usize> {
        self.cancel.check()?;
        self.db.delete_all::<T>().map_err(|e| {
            FoodbankError::Persistence(format!("Failed to clear {}: {e}", T::NAME))
        })
    }

    fn fill<T: Table>(&self, conn: &Connection, records: &[T]) -> Result<usize> {
        for (i, record) in records.iter().enumerate() {
            self.cancel.check()?;
            record.insert(conn).map_err(|e| {
                FoodbankError::Persistence(format!(
                    "Failed to restore {} record {}: {e}",
                    T::NAME,
                    i + 1
                ))
            })?;
        }
        Ok(records.len())
    }
}
