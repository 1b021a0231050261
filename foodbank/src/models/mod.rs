use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A candidate client row as submitted for import. Never stored as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportRow {
    pub row_number: usize,
    pub name: String,
    pub address: String,
    pub family_size: i64,
    pub num_children: i64,
    pub children_ages: String,
    pub reason: String,
    pub appointment_day: Option<String>,
    pub appointment_time: Option<String>,
    pub pref_gluten_free: bool,
    pub pref_halal: bool,
    pub pref_vegetarian: bool,
    pub pref_no_cooking: bool,
}

impl ImportRow {
    /// Build the durable client for this row. Text fields are trimmed and
    /// blank optional fields become `None`.
    pub fn to_client(&self, barcode_id: String, created_by: Uuid, now: DateTime<Utc>) -> Client {
        Client {
            id: Uuid::new_v4(),
            barcode_id,
            name: self.name.trim().to_string(),
            address: self.address.trim().to_string(),
            family_size: self.family_size,
            num_children: self.num_children,
            children_ages: non_blank(Some(&self.children_ages)),
            reason: non_blank(Some(&self.reason)),
            appointment_day: non_blank(self.appointment_day.as_deref()),
            appointment_time: non_blank(self.appointment_time.as_deref()),
            pref_gluten_free: self.pref_gluten_free,
            pref_halal: self.pref_halal,
            pref_vegetarian: self.pref_vegetarian,
            pref_no_cooking: self.pref_no_cooking,
            created_at: now,
            updated_at: now,
            created_by: Some(created_by),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ── Stored collections ──────────────────────────────────────────
//
// Each struct mirrors its table column-for-column so that a backup
// carries every primary and foreign key verbatim.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Staff {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: String,
    pub password_hash: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: Uuid,
    pub barcode_id: String,
    pub name: String,
    pub address: String,
    pub family_size: i64,
    pub num_children: i64,
    pub children_ages: Option<String>,
    pub reason: Option<String>,
    pub appointment_day: Option<String>,
    pub appointment_time: Option<String>,
    pub pref_gluten_free: bool,
    pub pref_halal: bool,
    pub pref_vegetarian: bool,
    pub pref_no_cooking: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attendance {
    pub id: Uuid,
    pub client_id: Uuid,
    pub checked_in_by: Option<Uuid>,
    pub checked_in_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub staff_id: Option<Uuid>,
    pub action: String,
    pub table_name: String,
    pub record_id: Option<String>,
    /// JSON text of the record before the change.
    pub old_values: Option<String>,
    /// JSON text of the record after the change.
    pub new_values: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub status: String,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationCode {
    pub id: Uuid,
    pub request_id: Uuid,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}
