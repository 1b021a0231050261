use crate::backup::{self, Backup, CollectionCounts, ExportFile, ExportFormat, RestoreEngine};
use crate::cancel::CancelFlag;
use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::import::{self, BatchImporter, ImportOptions, ImportResult};
use crate::models::{
    Attendance, AuditLogEntry, Client, ImportRow, RegistrationRequest, Staff, VerificationCode,
};
use crate::validation::{RowValidator, ValidationResult};
use serde::Serialize;
use std::path::Path;

/// The main entry point for the intake core.
/// Owns the database and the configuration, and exposes validate, template,
/// import, export and restore.
pub struct Store {
    db: Database,
    config: Config,
    validator: RowValidator,
}

/// Snapshot of what the store currently holds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStatus {
    pub counts: CollectionCounts,
    /// Operation holding the maintenance lock, if any.
    pub maintenance: Option<String>,
    pub supported_backup_versions: Vec<String>,
}

impl Store {
    /// Open or create the database at `path`.
    pub fn open(path: &Path, config: Config) -> Result<Self> {
        config.check()?;
        let db = Database::open(path)?;
        Self::with_database(db, config)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory(config: Config) -> Result<Self> {
        config.check()?;
        Self::with_database(Database::open_in_memory()?, config)
    }

    fn with_database(db: Database, config: Config) -> Result<Self> {
        let validator = RowValidator::new(&config.validation)?;
        Ok(Store {
            db,
            config,
            validator,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ── Import ──────────────────────────────────────────────────────

    /// Check rows without writing anything.
    pub fn validate(&self, rows: &[ImportRow]) -> Result<ValidationResult> {
        self.validator.validate(&self.db, rows)
    }

    /// The CSV import template.
    pub fn template(&self) -> String {
        import::csv::template()
    }

    pub fn import(&self, rows: &[ImportRow], options: &ImportOptions) -> Result<ImportResult> {
        self.importer().import(rows, options)
    }

    /// Validate first, then import only the rows without errors.
    pub fn import_valid(
        &self,
        rows: &[ImportRow],
        options: &ImportOptions,
    ) -> Result<(ValidationResult, ImportResult)> {
        let report = self.validate(rows)?;
        if report.has_warnings() {
            log::info!("{} row(s) look like existing clients", report.warnings.len());
        }
        let accepted = if report.is_ok() {
            rows.to_vec()
        } else {
            report.filter_valid(rows)
        };
        if accepted.is_empty() {
            log::warn!("No valid rows to import ({} rejected)", rows.len());
            return Ok((report, ImportResult::empty()));
        }
        let result = self.import(&accepted, options)?;
        Ok((report, result))
    }

    /// An importer bound to this store, for callers that need cancellation
    /// or a custom barcode generator.
    pub fn importer(&self) -> BatchImporter<'_> {
        BatchImporter::new(&self.db, &self.config)
    }

    // ── Backup ──────────────────────────────────────────────────────

    pub fn snapshot(&self, created_by: &str) -> Result<Backup> {
        backup::snapshot(&self.db, created_by)
    }

    pub fn export(&self, format: ExportFormat, created_by: &str) -> Result<ExportFile> {
        backup::export(&self.db, format, created_by)
    }

    pub fn restore(&self, backup: &Backup) -> Result<CollectionCounts> {
        self.restorer().restore(backup)
    }

    pub fn restore_with_cancel(&self, backup: &Backup, cancel: CancelFlag) -> Result<CollectionCounts> {
        self.restorer().with_cancel(cancel).restore(backup)
    }

    fn restorer(&self) -> RestoreEngine<'_> {
        RestoreEngine::new(&self.db, &self.config)
    }

    /// Record counts per collection and maintenance lock state.
    pub fn status(&self) -> Result<StoreStatus> {
        Ok(StoreStatus {
            counts: CollectionCounts {
                staff: self.db.count::<Staff>()?,
                clients: self.db.count::<Client>()?,
                attendance: self.db.count::<Attendance>()?,
                audit_log: self.db.count::<AuditLogEntry>()?,
                registration_requests: self.db.count::<RegistrationRequest>()?,
                verification_codes: self.db.count::<VerificationCode>()?,
            },
            maintenance: self.db.lock_holder()?,
            supported_backup_versions: self.config.backup.supported_versions.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::sample_staff;
    use crate::error::FoodbankError;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn setup_store() -> (Store, Staff) {
        let store = Store::open_in_memory(Config::default()).unwrap();
        let staff = sample_staff();
        store.database().insert(&staff).unwrap();
        (store, staff)
    }

    fn csv_rows() -> Vec<ImportRow> {
        import::csv::parse_import_csv(
            b"name,address,family_size,appointment_day\n\
              Jane Doe,1 High St,3,Monday\n\
              jane doe , 1 HIGH ST,3,\n\
              ,2 Low Rd,2,\n\
              Sam,3 Mid Way,1,Sunday\n\
              Ali,4 Hill Rd,5,saturday\n",
        )
        .unwrap()
    }

    #[test]
    fn test_validate_then_import_valid_rows() {
        let (store, staff) = setup_store();
        let rows = csv_rows();

        let report = store.validate(&rows).unwrap();
        assert_eq!(report.total_rows, 5);
        assert_eq!(report.valid_rows, 3);
        assert_eq!(report.error_rows().len(), 2);

        let mut options = ImportOptions::new(staff.id);
        options.skip_duplicates = true;
        let (_, result) = store.import_valid(&rows, &options).unwrap();
        assert_eq!(result.total, 3);
        assert_eq!(result.imported, 2);
        assert_eq!(result.skipped, 1);
        assert!(result.success);

        // A second pass now warns about every remaining row.
        let report = store.validate(&report.filter_valid(&rows)).unwrap();
        assert_eq!(report.warnings.len(), 3);
    }

    #[test]
    fn test_import_valid_with_nothing_valid() {
        let (store, staff) = setup_store();
        let rows = import::csv::parse_import_csv(b"name,address,family_size\n,,0\n").unwrap();
        let (report, result) = store
            .import_valid(&rows, &ImportOptions::new(staff.id))
            .unwrap();
        assert!(!report.valid);
        assert_eq!(result.total, 0);
        assert!(result.batches.is_empty());
    }

    #[test]
    fn test_import_valid_with_repeated_row_numbers() {
        let (store, staff) = setup_store();
        let rows = vec![
            ImportRow {
                row_number: 3,
                family_size: 1,
                address: "1 High St".into(),
                ..Default::default()
            },
            ImportRow {
                row_number: 3,
                name: "Good".into(),
                address: "Valid St".into(),
                family_size: 2,
                ..Default::default()
            },
        ];

        let (report, result) = store
            .import_valid(&rows, &ImportOptions::new(staff.id))
            .unwrap();
        assert_eq!(report.valid_rows, 1);
        assert_eq!(result.imported, 1);
        let clients: Vec<Client> = store.database().list_all().unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].name, "Good");
    }

    #[test]
    fn test_cancelled_restore_through_store() {
        let (store, staff) = setup_store();
        store
            .import(&csv_rows()[..2], &ImportOptions::new(staff.id))
            .unwrap();
        let before = store.status().unwrap().counts;
        let (empty, _) = setup_store();
        let backup = empty.snapshot("admin").unwrap();

        let cancel = CancelFlag::new();
        cancel.cancel();
        let result = store.restore_with_cancel(&backup, cancel);
        assert!(matches!(result, Err(FoodbankError::Cancelled)));
        let status = store.status().unwrap();
        assert_eq!(status.counts, before);
        assert_eq!(status.maintenance, None);

        let counts = store.restore_with_cancel(&backup, CancelFlag::new()).unwrap();
        assert_eq!(counts, backup.counts());
    }

    #[test]
    fn test_export_restore_through_store() {
        let (store, staff) = setup_store();
        store
            .import(&csv_rows()[..2], &ImportOptions::new(staff.id))
            .unwrap();
        let backup = store.snapshot("admin").unwrap();

        let file = store.export(ExportFormat::Json, "admin").unwrap();
        assert!(file.filename.ends_with(".json"));

        let (other, _) = setup_store();
        let counts = other.restore(&Backup::from_json(&file.content).unwrap()).unwrap();
        assert_eq!(counts, backup.counts());
        assert_eq!(other.status().unwrap().counts, backup.counts());
    }

    #[test]
    fn test_status() {
        let (store, staff) = setup_store();
        store
            .import(&csv_rows()[..1], &ImportOptions::new(staff.id))
            .unwrap();
        let status = store.status().unwrap();
        assert_eq!(status.counts.staff, 1);
        assert_eq!(status.counts.clients, 1);
        assert_eq!(status.counts.audit_log, 1);
        assert_eq!(status.maintenance, None);
        assert_eq!(status.supported_backup_versions, vec!["1.0".to_string()]);
    }

    #[test]
    fn test_open_on_disk_persists() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("foodbank.db");
        {
            let store = Store::open(&path, Config::default()).unwrap();
            store.database().insert(&sample_staff()).unwrap();
        }
        let store = Store::open(&path, Config::default()).unwrap();
        assert_eq!(store.status().unwrap().counts.staff, 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.validation.time_pattern = "(".into();
        assert!(matches!(
            Store::open_in_memory(config),
            Err(FoodbankError::Configuration(_))
        ));
    }

    #[test]
    fn test_sunday_in_allowed_days_rejected() {
        let mut config = Config::default();
        config.validation.allowed_days.push("Sunday".into());
        assert!(matches!(
            Store::open_in_memory(config),
            Err(FoodbankError::Configuration(_))
        ));
    }

    #[test]
    fn test_template() {
        let (store, _) = setup_store();
        assert!(store.template().starts_with("name,address,family_size"));
    }
}
