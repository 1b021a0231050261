use crate::models::{
    Attendance, AuditLogEntry, Client, RegistrationRequest, Staff, VerificationCode,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

/// A collection stored one-to-one in a SQLite table.
///
/// `COLUMNS` is both the SELECT/INSERT column order and the field order of
/// the serialized record, so backups and tables never drift apart.
pub trait Table: Sized {
    const NAME: &'static str;
    const COLUMNS: &'static [&'static str];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;

    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize>;
}

fn insert_sql(table: &str, columns: &[&str]) -> String {
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        columns.join(", "),
        placeholders.join(", ")
    )
}

fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        Uuid::parse_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

impl Table for Staff {
    const NAME: &'static str = "staff";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "email",
        "name",
        "role",
        "password_hash",
        "is_active",
        "created_at",
        "updated_at",
    ];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Staff {
            id: uuid_at(row, 0)?,
            email: row.get(1)?,
            name: row.get(2)?,
            role: row.get(3)?,
            password_hash: row.get(4)?,
            is_active: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        let mut stmt = conn.prepare_cached(&insert_sql(Self::NAME, Self::COLUMNS))?;
        stmt.execute(params![
            self.id.to_string(),
            self.email,
            self.name,
            self.role,
            self.password_hash,
            self.is_active,
            self.created_at,
            self.updated_at,
        ])
    }
}

impl Table for Client {
    const NAME: &'static str = "clients";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "barcode_id",
        "name",
        "address",
        "family_size",
        "num_children",
        "children_ages",
        "reason",
        "appointment_day",
        "appointment_time",
        "pref_gluten_free",
        "pref_halal",
        "pref_vegetarian",
        "pref_no_cooking",
        "created_at",
        "updated_at",
        "created_by",
    ];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Client {
            id: uuid_at(row, 0)?,
            barcode_id: row.get(1)?,
            name: row.get(2)?,
            address: row.get(3)?,
            family_size: row.get(4)?,
            num_children: row.get(5)?,
            children_ages: row.get(6)?,
            reason: row.get(7)?,
            appointment_day: row.get(8)?,
            appointment_time: row.get(9)?,
            pref_gluten_free: row.get(10)?,
            pref_halal: row.get(11)?,
            pref_vegetarian: row.get(12)?,
            pref_no_cooking: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
            created_by: opt_uuid_at(row, 16)?,
        })
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        let mut stmt = conn.prepare_cached(&insert_sql(Self::NAME, Self::COLUMNS))?;
        stmt.execute(params![
            self.id.to_string(),
            self.barcode_id,
            self.name,
            self.address,
            self.family_size,
            self.num_children,
            self.children_ages,
            self.reason,
            self.appointment_day,
            self.appointment_time,
            self.pref_gluten_free,
            self.pref_halal,
            self.pref_vegetarian,
            self.pref_no_cooking,
            self.created_at,
            self.updated_at,
            self.created_by.map(|id| id.to_string()),
        ])
    }
}

impl Table for Attendance {
    const NAME: &'static str = "attendance";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "client_id",
        "checked_in_by",
        "checked_in_at",
        "notes",
        "created_at",
    ];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Attendance {
            id: uuid_at(row, 0)?,
            client_id: uuid_at(row, 1)?,
            checked_in_by: opt_uuid_at(row, 2)?,
            checked_in_at: row.get(3)?,
            notes: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        let mut stmt = conn.prepare_cached(&insert_sql(Self::NAME, Self::COLUMNS))?;
        stmt.execute(params![
            self.id.to_string(),
            self.client_id.to_string(),
            self.checked_in_by.map(|id| id.to_string()),
            self.checked_in_at,
            self.notes,
            self.created_at,
        ])
    }
}

impl Table for AuditLogEntry {
    const NAME: &'static str = "audit_log";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "staff_id",
        "action",
        "table_name",
        "record_id",
        "old_values",
        "new_values",
        "created_at",
    ];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(AuditLogEntry {
            id: uuid_at(row, 0)?,
            staff_id: opt_uuid_at(row, 1)?,
            action: row.get(2)?,
            table_name: row.get(3)?,
            record_id: row.get(4)?,
            old_values: row.get(5)?,
            new_values: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        let mut stmt = conn.prepare_cached(&insert_sql(Self::NAME, Self::COLUMNS))?;
        stmt.execute(params![
            self.id.to_string(),
            self.staff_id.map(|id| id.to_string()),
            self.action,
            self.table_name,
            self.record_id,
            self.old_values,
            self.new_values,
            self.created_at,
        ])
    }
}

impl Table for RegistrationRequest {
    const NAME: &'static str = "registration_requests";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "name",
        "email",
        "status",
        "reviewed_by",
        "reviewed_at",
        "created_at",
    ];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(RegistrationRequest {
            id: uuid_at(row, 0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            status: row.get(3)?,
            reviewed_by: opt_uuid_at(row, 4)?,
            reviewed_at: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        let mut stmt = conn.prepare_cached(&insert_sql(Self::NAME, Self::COLUMNS))?;
        stmt.execute(params![
            self.id.to_string(),
            self.name,
            self.email,
            self.status,
            self.reviewed_by.map(|id| id.to_string()),
            self.reviewed_at,
            self.created_at,
        ])
    }
}

impl Table for VerificationCode {
    const NAME: &'static str = "verification_codes";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "request_id",
        "code",
        "expires_at",
        "used",
        "created_at",
    ];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(VerificationCode {
            id: uuid_at(row, 0)?,
            request_id: uuid_at(row, 1)?,
            code: row.get(2)?,
            expires_at: row.get(3)?,
            used: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        let mut stmt = conn.prepare_cached(&insert_sql(Self::NAME, Self::COLUMNS))?;
        stmt.execute(params![
            self.id.to_string(),
            self.request_id.to_string(),
            self.code,
            self.expires_at,
            self.used,
            self.created_at,
        ])
    }
}
