//! ZIP rendering of a backup: one CSV per collection plus a manifest.

use super::{Backup, CollectionCounts};
use crate::db::Table;
use crate::error::{FoodbankError, Result};
use crate::models::{
    Attendance, AuditLogEntry, Client, RegistrationRequest, Staff, VerificationCode,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read, Write};
use zip::{write::FileOptions, CompressionMethod, ZipArchive, ZipWriter};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const MANIFEST: &str = "manifest.json";

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    version: String,
    created_at: DateTime<Utc>,
    created_by: String,
    counts: CollectionCounts,
}

fn entry_name<T: Table>() -> String {
    format!("{}.csv", T::NAME)
}

/// BOM, then the column header (even with no records), then one line per record.
pub(crate) fn write_csv<T: Table + Serialize>(records: &[T]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(UTF8_BOM.to_vec());
    writer.write_record(T::COLUMNS)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer
        .into_inner()
        .map_err(|e| FoodbankError::Io(e.into_error()))
}

pub(crate) fn read_csv<T: Table + DeserializeOwned>(data: &[u8]) -> Result<Vec<T>> {
    let data = data.strip_prefix(UTF8_BOM).unwrap_or(data);
    let mut reader = csv::ReaderBuilder::new().from_reader(data);

    let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if header != T::COLUMNS {
        return Err(FoodbankError::Input(format!(
            "{} has header [{}], expected [{}]",
            entry_name::<T>(),
            header.join(","),
            T::COLUMNS.join(",")
        )));
    }

    let mut records = Vec::new();
    for record in reader.deserialize() {
        records.push(record.map_err(|e| {
            FoodbankError::Input(format!("Invalid record in {}: {e}", entry_name::<T>()))
        })?);
    }
    Ok(records)
}

pub(super) fn write_archive(backup: &Backup) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = Manifest {
        version: backup.version.clone(),
        created_at: backup.created_at,
        created_by: backup.created_by.clone(),
        counts: backup.counts(),
    };
    zip.start_file(MANIFEST, options)?;
    zip.write_all(&serde_json::to_vec_pretty(&manifest)?)?;

    let entries = [
        (entry_name::<Staff>(), write_csv(&backup.staff)?),
        (entry_name::<Client>(), write_csv(&backup.clients)?),
        (entry_name::<Attendance>(), write_csv(&backup.attendance)?),
        (entry_name::<AuditLogEntry>(), write_csv(&backup.audit_log)?),
        (
            entry_name::<RegistrationRequest>(),
            write_csv(&backup.registration_requests)?,
        ),
        (
            entry_name::<VerificationCode>(),
            write_csv(&backup.verification_codes)?,
        ),
    ];
    for (name, content) in entries {
        zip.start_file(name, options)?;
        zip.write_all(&content)?;
    }

    Ok(zip.finish()?.into_inner())
}

fn read_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<Vec<u8>> {
    let mut file = archive
        .by_name(name)
        .map_err(|e| FoodbankError::Input(format!("Backup archive missing {name}: {e}")))?;
    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer)?;
    Ok(buffer)
}

fn read_table<T: Table + DeserializeOwned>(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
) -> Result<Vec<T>> {
    read_csv(&read_entry(archive, &entry_name::<T>())?)
}

pub(super) fn read_archive(data: &[u8]) -> Result<Backup> {
    let mut archive = ZipArchive::new(Cursor::new(data))
        .map_err(|e| FoodbankError::Input(format!("Invalid backup archive: {e}")))?;

    let manifest: Manifest = serde_json::from_slice(&read_entry(&mut archive, MANIFEST)?)
        .map_err(|e| FoodbankError::Input(format!("Invalid {MANIFEST}: {e}")))?;

    let backup = Backup {
        version: manifest.version,
        created_at: manifest.created_at,
        created_by: manifest.created_by,
        staff: read_table(&mut archive)?,
        clients: read_table(&mut archive)?,
        attendance: read_table(&mut archive)?,
        audit_log: read_table(&mut archive)?,
        registration_requests: read_table(&mut archive)?,
        verification_codes: read_table(&mut archive)?,
    };

    if backup.counts() != manifest.counts {
        return Err(FoodbankError::Input(format!(
            "Backup archive holds {} records but its manifest lists {}",
            backup.counts().total(),
            manifest.counts.total()
        )));
    }
    Ok(backup)
}
