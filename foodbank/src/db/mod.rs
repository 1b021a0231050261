mod lock;
mod tables;

pub use lock::MaintenanceGuard;
pub use tables::Table;

use crate::error::Result;
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::path::Path;
use uuid::Uuid;

/// The storage database holding the six collections plus the maintenance lock.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        // WAL lets an export keep its read snapshot while a writer commits.
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        log::debug!("Opened {} (journal_mode={mode})", path.display());
        let db = Database { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.initialize()?;
        Ok(db)
    }

    fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        self.conn.create_scalar_function(
            "fold_key",
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let value: Option<String> = ctx.get(0)?;
                Ok(value.map(|v| fold_key(&v)))
            },
        )?;

        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS staff (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                role TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS clients (
                id TEXT PRIMARY KEY,
                barcode_id TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                address TEXT NOT NULL,
                family_size INTEGER NOT NULL CHECK (family_size >= 1),
                num_children INTEGER NOT NULL DEFAULT 0 CHECK (num_children >= 0),
                children_ages TEXT,
                reason TEXT,
                appointment_day TEXT,
                appointment_time TEXT,
                pref_gluten_free INTEGER NOT NULL DEFAULT 0,
                pref_halal INTEGER NOT NULL DEFAULT 0,
                pref_vegetarian INTEGER NOT NULL DEFAULT 0,
                pref_no_cooking INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                created_by TEXT REFERENCES staff(id)
            );

            CREATE INDEX IF NOT EXISTS idx_clients_created_at ON clients(created_at);
            CREATE INDEX IF NOT EXISTS idx_clients_fold_key
                ON clients(fold_key(name), fold_key(address));

            CREATE TABLE IF NOT EXISTS attendance (
                id TEXT PRIMARY KEY,
                client_id TEXT NOT NULL REFERENCES clients(id),
                checked_in_by TEXT REFERENCES staff(id),
                checked_in_at TEXT NOT NULL,
                notes TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS audit_log (
                id TEXT PRIMARY KEY,
                staff_id TEXT REFERENCES staff(id),
                action TEXT NOT NULL,
                table_name TEXT NOT NULL,
                record_id TEXT,
                old_values TEXT,
                new_values TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS registration_requests (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                reviewed_by TEXT REFERENCES staff(id),
                reviewed_at TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS verification_codes (
                id TEXT PRIMARY KEY,
                request_id TEXT NOT NULL REFERENCES registration_requests(id),
                code TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                used INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS maintenance_lock (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                holder TEXT NOT NULL,
                operation TEXT NOT NULL,
                acquired_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // ── Transactions ─────────────────────────────────────────────────

    /// Begin a deferred transaction. Rolls back when dropped uncommitted.
    pub fn begin(&self) -> Result<Transaction<'_>> {
        Ok(self.conn.unchecked_transaction()?)
    }

    /// Begin a transaction that takes the write lock up front.
    pub fn begin_immediate(&self) -> Result<Transaction<'_>> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Immediate,
        )?)
    }

    // ── Collections ──────────────────────────────────────────────────

    /// Insert one record into its table.
    pub fn insert<T: Table>(&self, record: &T) -> Result<()> {
        record.insert(&self.conn)?;
        Ok(())
    }

    /// Read every record of a table, oldest first.
    pub fn list_all<T: Table>(&self) -> Result<Vec<T>> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY created_at, id",
            T::COLUMNS.join(", "),
            T::NAME
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| T::from_row(row))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Delete every record of a table. Returns the number of rows removed.
    pub fn delete_all<T: Table>(&self) -> Result<usize> {
        let deleted = self
            .conn
            .execute(&format!("DELETE FROM {}", T::NAME), [])?;
        Ok(deleted)
    }

    /// Count the records of a table.
    pub fn count<T: Table>(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", T::NAME),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ── Duplicate Lookup ─────────────────────────────────────────────

    /// Find an existing client whose name and address match after trimming
    /// and case folding. Returns the oldest match.
    pub fn find_duplicate_client(&self, name: &str, address: &str) -> Result<Option<Uuid>> {
        let id: Option<String> = self
            .conn
            .query_row(
                DUPLICATE_CLIENT_SQL,
                params![fold_key(name), fold_key(address)],
                |row| row.get(0),
            )
            .optional()?;

        match id {
            Some(id) => Ok(Some(Uuid::parse_str(&id).map_err(|e| {
                crate::FoodbankError::Persistence(format!("Corrupt client id '{id}': {e}"))
            })?)),
            None => Ok(None),
        }
    }
}

// Served by idx_clients_fold_key, so the expressions must match it exactly.
const DUPLICATE_CLIENT_SQL: &str = "SELECT id FROM clients
     WHERE fold_key(name) = ?1 AND fold_key(address) = ?2
     ORDER BY created_at, id
     LIMIT 1";

/// Normalize a name or address for duplicate matching.
pub fn fold_key(value: &str) -> String {
    value.trim().to_lowercase()
}
