pub mod csv;

use crate::barcode::BarcodeGenerator;
use crate::cancel::CancelFlag;
use crate::config::Config;
use crate::db::{Database, Table};
use crate::error::{FoodbankError, Result};
use crate::models::{AuditLogEntry, Client, ImportRow};
use chrono::Utc;
use rusqlite::{Connection, ErrorCode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Caller-supplied parameters for one import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportOptions {
    /// Staff member recorded as `created_by` on every client.
    pub created_by: Uuid,
    /// Rows per transaction. 0 selects the configured default; values above
    /// the configured cap are clamped.
    pub batch_size: usize,
    /// Skip rows matching an existing client on trimmed, case-folded name and address.
    pub skip_duplicates: bool,
}

impl ImportOptions {
    pub fn new(created_by: Uuid) -> Self {
        ImportOptions {
            created_by,
            batch_size: 0,
            skip_duplicates: false,
        }
    }
}

/// A row that could not be inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowFailure {
    pub row: usize,
    pub message: String,
}

/// Outcome of one batch (one transaction).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// 1-based batch number.
    pub batch: usize,
    /// Row number of the first row in the batch.
    pub start_row: usize,
    /// Row number of the last row in the batch.
    pub end_row: usize,
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Set when the whole batch was lost at commit.
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub row_errors: Vec<RowFailure>,
}

impl BatchResult {
    pub fn rows(&self) -> usize {
        self.success + self.skipped + self.failed
    }
}

/// Aggregated outcome of an import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportResult {
    pub total: usize,
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
    /// True only when no row failed in any batch.
    pub success: bool,
    pub batches: Vec<BatchResult>,
}

impl ImportResult {
    /// The result of importing nothing.
    pub fn empty() -> Self {
        Self::from_batches(0, Vec::new())
    }

    fn from_batches(total: usize, batches: Vec<BatchResult>) -> Self {
        let imported = batches.iter().map(|b| b.success).sum();
        let skipped = batches.iter().map(|b| b.skipped).sum();
        let failed: usize = batches.iter().map(|b| b.failed).sum();
        ImportResult {
            total,
            imported,
            skipped,
            failed,
            success: failed == 0,
            batches,
        }
    }
}

/// Inserts import rows as clients, one transaction per batch.
///
/// Batches run in order and are independent: a batch lost at commit is
/// reported as failed and the next batch still runs. Inside a batch every
/// row gets its own savepoint, so a failing row never takes its neighbours
/// with it.
pub struct BatchImporter<'a> {
    db: &'a Database,
    config: Config,
    barcodes: BarcodeGenerator,
    cancel: CancelFlag,
}

impl<'a> BatchImporter<'a> {
    pub fn new(db: &'a Database, config: &Config) -> Self {
        BatchImporter {
            db,
            config: config.clone(),
            barcodes: BarcodeGenerator::new(&config.barcode.prefix),
            cancel: CancelFlag::new(),
        }
    }

    /// Use a specific barcode generator (e.g. a seeded one).
    pub fn with_barcodes(mut self, barcodes: BarcodeGenerator) -> Self {
        self.barcodes = barcodes;
        self
    }

    /// Observe `cancel` between rows.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Import `rows`. Row-level problems and lost batches are reported in the
    /// result; only malformed requests, a held maintenance lock and
    /// cancellation are returned as errors.
    pub fn import(&self, rows: &[ImportRow], options: &ImportOptions) -> Result<ImportResult> {
        if rows.is_empty() {
            return Err(FoodbankError::Input("No rows provided".into()));
        }
        if rows.len() > self.config.validation.max_rows {
            return Err(FoodbankError::Input(format!(
                "Too many rows: {} (maximum {})",
                rows.len(),
                self.config.validation.max_rows
            )));
        }

        let _lock = self.db.acquire_lock("import", self.config.lock.stale_after()?)?;

        let batch_size = self.config.import.effective_batch_size(options.batch_size);
        log::info!(
            "Importing {} rows in batches of {batch_size} (skip_duplicates: {})",
            rows.len(),
            options.skip_duplicates
        );

        let mut batches = Vec::with_capacity(rows.len().div_ceil(batch_size));
        for (index, chunk) in rows.chunks(batch_size).enumerate() {
            self.cancel.check()?;
            batches.push(self.run_batch(index + 1, chunk, options)?);
        }

        let result = ImportResult::from_batches(rows.len(), batches);
        log::info!(
            "Import finished: {} imported, {} skipped, {} failed",
            result.imported,
            result.skipped,
            result.failed
        );
        Ok(result)
    }

    fn run_batch(
        &self,
        number: usize,
        chunk: &[ImportRow],
        options: &ImportOptions,
    ) -> Result<BatchResult> {
        let mut result = BatchResult {
            batch: number,
            start_row: chunk.first().map(|r| r.row_number).unwrap_or_default(),
            end_row: chunk.last().map(|r| r.row_number).unwrap_or_default(),
            success: 0,
            skipped: 0,
            failed: 0,
            error: None,
            row_errors: Vec::new(),
        };

        let mut tx = match self.db.begin() {
            Ok(tx) => tx,
            Err(e) => {
                log::warn!("Batch {number} could not start: {e}");
                return Ok(whole_batch_failed(result, chunk.len(), e.to_string()));
            }
        };
        log::debug!(
            "Batch {number}: rows {}..={}",
            result.start_row,
            result.end_row
        );

        for row in chunk {
            // Dropping `tx` on the way out rolls the batch back.
            self.cancel.check()?;

            if options.skip_duplicates {
                match self.db.find_duplicate_client(&row.name, &row.address) {
                    Ok(Some(existing)) => {
                        log::debug!("Row {} duplicates client {existing}; skipped", row.row_number);
                        result.skipped += 1;
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        record_row_failure(&mut result, row, &e);
                        continue;
                    }
                }
            }

            let outcome = tx
                .savepoint()
                .map_err(FoodbankError::from)
                .and_then(|sp| {
                    self.insert_row(&sp, row, options)?;
                    sp.commit()?;
                    Ok(())
                });
            match outcome {
                Ok(()) => result.success += 1,
                Err(e) => record_row_failure(&mut result, row, &e),
            }
        }

        if let Err(e) = tx.commit() {
            log::warn!("Batch {number} failed to commit: {e}");
            return Ok(whole_batch_failed(result, chunk.len(), e.to_string()));
        }
        Ok(result)
    }

    /// Insert one client, plus its audit entry when enabled.
    fn insert_row(&self, conn: &Connection, row: &ImportRow, options: &ImportOptions) -> Result<Client> {
        let mut retries_left = self.config.barcode.collision_retries;
        let client = loop {
            let candidate = row.to_client(self.barcodes.generate(), options.created_by, Utc::now());
            match candidate.insert(conn) {
                Ok(_) => break candidate,
                Err(e) if retries_left > 0 && is_barcode_collision(&e) => {
                    retries_left -= 1;
                    log::warn!(
                        "Barcode {} already taken (row {}); regenerating",
                        candidate.barcode_id,
                        row.row_number
                    );
                }
                Err(e) => return Err(e.into()),
            }
        };

        if self.config.import.audit {
            let entry = AuditLogEntry {
                id: Uuid::new_v4(),
                staff_id: Some(options.created_by),
                action: "create".into(),
                table_name: Client::NAME.into(),
                record_id: Some(client.id.to_string()),
                old_values: None,
                new_values: Some(serde_json::to_string(&client)?),
                created_at: client.created_at,
            };
            entry.insert(conn)?;
        }

        Ok(client)
    }
}

/// Parse import rows from a JSON array. Rows without a `row_number` are
/// numbered as if the array were a spreadsheet with a header line.
/// Two rows ending up with the same number is an input error.
pub fn parse_import_json(data: &[u8]) -> Result<Vec<ImportRow>> {
    let mut rows: Vec<ImportRow> = serde_json::from_slice(data)
        .map_err(|e| FoodbankError::Input(format!("Invalid import JSON: {e}")))?;
    let mut seen = HashSet::with_capacity(rows.len());
    for (i, row) in rows.iter_mut().enumerate() {
        if row.row_number == 0 {
            row.row_number = i + 2;
        }
        if !seen.insert(row.row_number) {
            return Err(FoodbankError::Input(format!(
                "Row number {} is used by more than one row",
                row.row_number
            )));
        }
    }
    Ok(rows)
}

fn record_row_failure(result: &mut BatchResult, row: &ImportRow, error: &dyn std::fmt::Display) {
    log::warn!("Row {} failed: {error}", row.row_number);
    result.failed += 1;
    result.row_errors.push(RowFailure {
        row: row.row_number,
        message: error.to_string(),
    });
}

fn whole_batch_failed(mut result: BatchResult, size: usize, error: String) -> BatchResult {
    result.success = 0;
    result.skipped = 0;
    result.failed = size;
    result.error = Some(error);
    result.row_errors.clear();
    result
}

fn is_barcode_collision(error: &rusqlite::Error) -> bool {
    match error {
        rusqlite::Error::SqliteFailure(err, Some(message)) => {
            err.code == ErrorCode::ConstraintViolation && message.contains("clients.barcode_id")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{sample_client, sample_staff};
    use crate::models::Staff;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use rusqlite::hooks::Action;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn setup() -> (Database, Staff) {
        let db = Database::open_in_memory().unwrap();
        let staff = sample_staff();
        db.insert(&staff).unwrap();
        (db, staff)
    }

    fn rows(n: usize) -> Vec<ImportRow> {
        (0..n)
            .map(|i| ImportRow {
                row_number: i + 2,
                name: format!("Client {i}"),
                address: format!("{i} Market Street"),
                family_size: 1 + (i % 5) as i64,
                ..Default::default()
            })
            .collect()
    }

    fn options(staff: &Staff, batch_size: usize, skip_duplicates: bool) -> ImportOptions {
        ImportOptions {
            created_by: staff.id,
            batch_size,
            skip_duplicates,
        }
    }

    #[test]
    fn test_batch_partition_law() {
        for (n, b) in [(1, 50), (50, 50), (51, 50), (120, 50), (7, 3), (10, 100)] {
            let (db, staff) = setup();
            let config = Config::default();
            let result = BatchImporter::new(&db, &config)
                .import(&rows(n), &options(&staff, b, false))
                .unwrap();

            assert_eq!(result.batches.len(), n.div_ceil(b), "n={n} b={b}");
            let covered: usize = result.batches.iter().map(BatchResult::rows).sum();
            assert_eq!(covered, n);
            assert_eq!(result.imported, n);
            assert!(result.success);
            assert_eq!(db.count::<Client>().unwrap(), n);
        }
    }

    #[test]
    fn test_batch_ranges_follow_row_numbers() {
        let (db, staff) = setup();
        let config = Config::default();
        let result = BatchImporter::new(&db, &config)
            .import(&rows(120), &options(&staff, 50, false))
            .unwrap();

        let ranges: Vec<_> = result
            .batches
            .iter()
            .map(|b| (b.batch, b.start_row, b.end_row, b.rows()))
            .collect();
        assert_eq!(ranges, vec![(1, 2, 51, 50), (2, 52, 101, 50), (3, 102, 121, 20)]);
    }

    #[test]
    fn test_batch_size_defaults_and_cap() {
        let (db, staff) = setup();
        let config = Config::default();
        let importer = BatchImporter::new(&db, &config);

        let result = importer.import(&rows(120), &options(&staff, 0, false)).unwrap();
        assert_eq!(result.batches.len(), 3);

        let result = importer.import(&rows(250), &options(&staff, 1000, false)).unwrap();
        assert_eq!(result.batches.len(), 3);
        assert_eq!(result.batches[0].rows(), 100);
    }

    #[test]
    fn test_commit_failure_fails_whole_batch_and_later_batches_run() {
        let (db, staff) = setup();
        let commits = Arc::new(AtomicUsize::new(0));
        let counter = commits.clone();
        // Rows are inserted before the hook is installed, so only the
        // maintenance lock and batch commits are counted:
        // 1 = lock acquire, 2 = batch 1, 3 = batch 2 (vetoed), 4 = batch 3.
        db.connection().commit_hook(Some(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            n == 3
        }));

        let config = Config::default();
        let result = BatchImporter::new(&db, &config)
            .import(&rows(120), &options(&staff, 50, false))
            .unwrap();
        db.connection().commit_hook(None::<fn() -> bool>);

        assert_eq!(result.batches.len(), 3);
        assert_eq!(result.batches[1].success, 0);
        assert_eq!(result.batches[1].failed, 50);
        assert!(result.batches[1].error.is_some());
        assert_eq!(result.batches[2].success, 20);
        assert_eq!(result.imported, 70);
        assert_eq!(result.failed, 50);
        assert_eq!(result.skipped, 0);
        assert!(!result.success);
        assert_eq!(db.count::<Client>().unwrap(), 70);
    }

    #[test]
    fn test_commit_failure_on_last_of_two_batches() {
        let (db, staff) = setup();
        let commits = Arc::new(AtomicUsize::new(0));
        let counter = commits.clone();
        db.connection().commit_hook(Some(move || {
            counter.fetch_add(1, Ordering::SeqCst) + 1 == 3
        }));

        let config = Config::default();
        let result = BatchImporter::new(&db, &config)
            .import(&rows(100), &options(&staff, 50, false))
            .unwrap();
        db.connection().commit_hook(None::<fn() -> bool>);

        assert_eq!(
            (result.imported, result.failed, result.skipped, result.success),
            (50, 50, 0, false)
        );
        assert_eq!(db.count::<AuditLogEntry>().unwrap(), 50);
    }

    #[test]
    fn test_skip_duplicates_within_import() {
        let (db, staff) = setup();
        let mut input = rows(2);
        input[0].name = "Jane Doe".into();
        input[0].address = "1 High St".into();
        input[1].name = "  JANE DOE".into();
        input[1].address = "1 high st  ".into();

        let config = Config::default();
        let result = BatchImporter::new(&db, &config)
            .import(&input, &options(&staff, 50, true))
            .unwrap();

        assert_eq!(result.imported, 1);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.failed, 0);
        assert!(result.success);
    }

    #[test]
    fn test_skip_duplicates_against_existing_clients() {
        let (db, staff) = setup();
        db.insert(&sample_client(&staff, "Client 0", "0 Market Street", 1)).unwrap();

        let config = Config::default();
        let importer = BatchImporter::new(&db, &config);
        let result = importer.import(&rows(3), &options(&staff, 50, true)).unwrap();
        assert_eq!((result.imported, result.skipped), (2, 1));

        let (db, staff) = setup();
        db.insert(&sample_client(&staff, "Client 0", "0 Market Street", 1)).unwrap();
        let importer = BatchImporter::new(&db, &config);
        let result = importer.import(&rows(3), &options(&staff, 50, false)).unwrap();
        assert_eq!((result.imported, result.skipped), (3, 0));
    }

    #[test]
    fn test_row_failure_does_not_abort_batch() {
        let (db, staff) = setup();
        let mut input = rows(3);
        input[1].family_size = 0; // violates the CHECK constraint

        let config = Config::default();
        let result = BatchImporter::new(&db, &config)
            .import(&input, &options(&staff, 50, false))
            .unwrap();

        assert_eq!(result.batches.len(), 1);
        assert_eq!(result.imported, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(result.batches[0].row_errors[0].row, 3);
        assert!(!result.success);
        assert_eq!(db.count::<Client>().unwrap(), 2);
        // the failed row left no audit entry behind
        assert_eq!(db.count::<AuditLogEntry>().unwrap(), 2);
    }

    #[test]
    fn test_audit_entries_written_per_client() {
        let (db, staff) = setup();
        let config = Config::default();
        BatchImporter::new(&db, &config)
            .import(&rows(3), &options(&staff, 2, false))
            .unwrap();

        let clients: Vec<Client> = db.list_all().unwrap();
        let audit: Vec<AuditLogEntry> = db.list_all().unwrap();
        assert_eq!(audit.len(), 3);
        for entry in &audit {
            assert_eq!(entry.action, "create");
            assert_eq!(entry.table_name, "clients");
            assert_eq!(entry.staff_id, Some(staff.id));
            let id = entry.record_id.as_deref().unwrap();
            assert!(clients.iter().any(|c| c.id.to_string() == id));
        }

        let mut config = Config::default();
        config.import.audit = false;
        let (db, staff) = setup();
        BatchImporter::new(&db, &config)
            .import(&rows(3), &options(&staff, 2, false))
            .unwrap();
        assert_eq!(db.count::<AuditLogEntry>().unwrap(), 0);
    }

    #[test]
    fn test_barcode_collision_is_row_failure_by_default() {
        let (db, staff) = setup();
        let taken = BarcodeGenerator::default().generate_at(Utc::now(), &mut StdRng::seed_from_u64(5));
        let mut existing = sample_client(&staff, "Someone", "Elsewhere", 1);
        existing.barcode_id = taken;
        db.insert(&existing).unwrap();

        let config = Config::default();
        let result = BatchImporter::new(&db, &config)
            .with_barcodes(BarcodeGenerator::with_seed("FFB", 5))
            .import(&rows(1), &options(&staff, 50, false))
            .unwrap();
        assert_eq!(result.failed, 1);
        assert!(result.batches[0].row_errors[0].message.contains("barcode_id"));
    }

    #[test]
    fn test_barcode_collision_retry_when_configured() {
        let (db, staff) = setup();
        let taken = BarcodeGenerator::default().generate_at(Utc::now(), &mut StdRng::seed_from_u64(5));
        let mut existing = sample_client(&staff, "Someone", "Elsewhere", 1);
        existing.barcode_id = taken.clone();
        db.insert(&existing).unwrap();

        let mut config = Config::default();
        config.barcode.collision_retries = 2;
        let result = BatchImporter::new(&db, &config)
            .with_barcodes(BarcodeGenerator::with_seed("FFB", 5))
            .import(&rows(1), &options(&staff, 50, false))
            .unwrap();
        assert_eq!(result.imported, 1);

        let clients: Vec<Client> = db.list_all().unwrap();
        assert!(clients.iter().filter(|c| c.barcode_id == taken).count() == 1);
    }

    #[test]
    fn test_parse_import_json_numbers_rows() {
        let rows = parse_import_json(
            br#"[{"name": "Jane", "address": "1 High St", "family_size": 2},
                 {"row_number": 9, "name": "Jo", "address": "2 Low Rd", "family_size": 1, "pref_halal": true}]"#,
        )
        .unwrap();
        assert_eq!(rows[0].row_number, 2);
        assert_eq!(rows[1].row_number, 9);
        assert!(rows[1].pref_halal);

        assert!(matches!(parse_import_json(b"{}"), Err(FoodbankError::Input(_))));
    }

    #[test]
    fn test_parse_import_json_rejects_repeated_row_numbers() {
        // The second row is numbered 3 by position, same as the first.
        let err = parse_import_json(
            br#"[{"row_number": 3, "name": "", "address": "1 High St", "family_size": 1},
                 {"name": "Good", "address": "Valid St", "family_size": 2}]"#,
        )
        .unwrap_err();
        match err {
            FoodbankError::Input(msg) => assert!(msg.contains("Row number 3"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_input_limits() {
        let (db, staff) = setup();
        let mut config = Config::default();
        config.validation.max_rows = 5;
        let importer = BatchImporter::new(&db, &config);

        assert!(matches!(
            importer.import(&[], &options(&staff, 50, false)),
            Err(FoodbankError::Input(_))
        ));
        assert!(matches!(
            importer.import(&rows(6), &options(&staff, 50, false)),
            Err(FoodbankError::Input(_))
        ));
        assert_eq!(db.count::<Client>().unwrap(), 0);
    }

    #[test]
    fn test_cancelled_import_rolls_back_open_batch() {
        let (db, staff) = setup();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let config = Config::default();
        let result = BatchImporter::new(&db, &config)
            .with_cancel(cancel)
            .import(&rows(10), &options(&staff, 5, false));
        assert!(matches!(result, Err(FoodbankError::Cancelled)));
        assert_eq!(db.count::<Client>().unwrap(), 0);
        assert!(db.lock_holder().unwrap().is_none());
    }

    #[test]
    fn test_cancel_during_batch_keeps_earlier_batches() {
        let (db, staff) = setup();
        let cancel = CancelFlag::new();
        let trigger = cancel.clone();
        let inserted = Arc::new(AtomicUsize::new(0));
        let counter = inserted.clone();
        // Cancel once five rows of batch 2 are in its open transaction.
        db.connection().update_hook(Some(move |action: Action, _: &str, table: &str, _: i64| {
            if action == Action::SQLITE_INSERT && table == Client::NAME {
                if counter.fetch_add(1, Ordering::SeqCst) + 1 == 55 {
                    trigger.cancel();
                }
            }
        }));

        let config = Config::default();
        let result = BatchImporter::new(&db, &config)
            .with_cancel(cancel)
            .import(&rows(120), &options(&staff, 50, false));
        db.connection().update_hook(None::<fn(Action, &str, &str, i64)>);

        assert!(matches!(result, Err(FoodbankError::Cancelled)));
        assert_eq!(inserted.load(Ordering::SeqCst), 55);
        assert_eq!(db.count::<Client>().unwrap(), 50);
        assert_eq!(db.count::<AuditLogEntry>().unwrap(), 50);
        let kept: Vec<Client> = db.list_all().unwrap();
        assert!(kept.iter().all(|c| c.name != "Client 50"));
        assert!(db.lock_holder().unwrap().is_none());
        assert!(db.connection().is_autocommit());
    }

    #[test]
    fn test_out_of_range_lock_staleness_is_configuration_error() {
        let (db, staff) = setup();
        let mut config = Config::default();
        config.lock.stale_after_secs = i64::MAX;
        let result = BatchImporter::new(&db, &config).import(&rows(1), &options(&staff, 50, false));
        assert!(matches!(result, Err(FoodbankError::Configuration(_))));
        assert_eq!(db.count::<Client>().unwrap(), 0);
        assert!(db.lock_holder().unwrap().is_none());
    }

    #[test]
    fn test_import_refused_while_lock_held() {
        let (db, staff) = setup();
        let _guard = db.acquire_lock("restore", Duration::hours(1)).unwrap();
        let config = Config::default();
        let result = BatchImporter::new(&db, &config).import(&rows(1), &options(&staff, 50, false));
        assert!(matches!(result, Err(FoodbankError::Busy(_))));
    }
}
