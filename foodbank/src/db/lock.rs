use super::Database;
use crate::error::{FoodbankError, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

/// Holds the single-writer maintenance lock until dropped.
///
/// Import and restore both take this lock so a restore can never interleave
/// with the batches of a running import, even from another connection.
pub struct MaintenanceGuard<'a> {
    db: &'a Database,
    holder: String,
    operation: String,
}

impl std::fmt::Debug for MaintenanceGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaintenanceGuard")
            .field("holder", &self.holder)
            .field("operation", &self.operation)
            .finish()
    }
}

impl Database {
    /// Acquire the maintenance lock for `operation`. Fails with `Busy` when
    /// another writer holds it. A lock older than `stale_after` is reclaimed.
    pub fn acquire_lock(&self, operation: &str, stale_after: Duration) -> Result<MaintenanceGuard<'_>> {
        let holder = Uuid::new_v4().to_string();
        let now = Utc::now();

        let tx = self.begin_immediate()?;

        let current: Option<(String, DateTime<Utc>)> = self
            .conn
            .query_row(
                "SELECT operation, acquired_at FROM maintenance_lock WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        if let Some((held_by, acquired_at)) = current {
            if now - acquired_at < stale_after {
                return Err(FoodbankError::Busy(format!(
                    "'{held_by}' has been running since {}",
                    acquired_at.to_rfc3339()
                )));
            }
            log::warn!(
                "Reclaiming stale maintenance lock held by '{held_by}' since {}",
                acquired_at.to_rfc3339()
            );
            self.conn.execute("DELETE FROM maintenance_lock WHERE id = 1", [])?;
        }

        self.conn.execute(
            "INSERT INTO maintenance_lock (id, holder, operation, acquired_at) VALUES (1, ?1, ?2, ?3)",
            params![holder, operation, now],
        )?;
        tx.commit()?;

        log::debug!("Maintenance lock acquired for '{operation}'");
        Ok(MaintenanceGuard {
            db: self,
            holder,
            operation: operation.to_string(),
        })
    }

    /// The operation currently holding the maintenance lock, if any.
    pub fn lock_holder(&self) -> Result<Option<String>> {
        let operation = self
            .conn
            .query_row(
                "SELECT operation FROM maintenance_lock WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(operation)
    }
}

impl Drop for MaintenanceGuard<'_> {
    fn drop(&mut self) {
        let released = self.db.conn.execute(
            "DELETE FROM maintenance_lock WHERE id = 1 AND holder = ?1",
            params![self.holder],
        );
        match released {
            Ok(_) => log::debug!("Maintenance lock released for '{}'", self.operation),
            Err(e) => log::warn!(
                "Failed to release maintenance lock for '{}': {e}",
                self.operation
            ),
        }
    }
}
