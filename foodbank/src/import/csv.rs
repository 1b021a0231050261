//! CSV intake for bulk imports.

use crate::error::{FoodbankError, Result};
use crate::models::ImportRow;
use csv::{ReaderBuilder, StringRecord, Trim};
use std::collections::HashMap;

/// Columns every import file must carry.
pub const REQUIRED_COLUMNS: &[&str] = &["name", "address", "family_size"];

/// Columns an import file may carry.
pub const OPTIONAL_COLUMNS: &[&str] = &[
    "num_children",
    "children_ages",
    "reason",
    "appointment_day",
    "appointment_time",
    "pref_gluten_free",
    "pref_halal",
    "pref_vegetarian",
    "pref_no_cooking",
];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// The downloadable import template: header plus one example row.
pub fn template() -> String {
    let header: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .chain(OPTIONAL_COLUMNS)
        .copied()
        .collect();
    format!(
        "{}\nJane Doe,\"12 Orchard Lane, Springfield\",4,2,\"3, 7\",Reduced hours,Tuesday,10:30,false,false,true,false\n",
        header.join(",")
    )
}

/// Parse an import CSV into rows.
///
/// Columns are matched by header name, case-insensitively and in any order;
/// unknown columns are ignored. Row numbers are spreadsheet line numbers, so
/// the first data row is 2. Fully blank lines are skipped.
pub fn parse_import_csv(data: &[u8]) -> Result<Vec<ImportRow>> {
    let data = data.strip_prefix(UTF8_BOM).unwrap_or(data);
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(data);

    let columns: HashMap<String, usize> = reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(i, h)| (h.trim().to_lowercase(), i))
        .collect();

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .filter(|c| !columns.contains_key(**c))
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(FoodbankError::Input(format!(
            "Missing required column(s): {}",
            missing.join(", ")
        )));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| FoodbankError::Input(format!("Invalid CSV: {e}")))?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        let line = record.position().map(|p| p.line() as usize).unwrap_or(rows.len() + 2);
        rows.push(read_row(&columns, &record, line));
    }

    log::debug!("Parsed {} import rows", rows.len());
    Ok(rows)
}

fn read_row(columns: &HashMap<String, usize>, record: &StringRecord, line: usize) -> ImportRow {
    let field = |name: &str| cell(columns, record, name);
    let optional = |name: &str| Some(cell(columns, record, name))
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    ImportRow {
        row_number: line,
        name: field("name").to_string(),
        address: field("address").to_string(),
        family_size: field("family_size").parse().unwrap_or(0),
        num_children: field("num_children").parse().unwrap_or(0),
        children_ages: field("children_ages").to_string(),
        reason: field("reason").to_string(),
        appointment_day: optional("appointment_day"),
        appointment_time: optional("appointment_time"),
        pref_gluten_free: flag(field("pref_gluten_free")),
        pref_halal: flag(field("pref_halal")),
        pref_vegetarian: flag(field("pref_vegetarian")),
        pref_no_cooking: flag(field("pref_no_cooking")),
    }
}

/// The value under `name`, or "" when the column or cell is absent.
fn cell<'r>(columns: &HashMap<String, usize>, record: &'r StringRecord, name: &str) -> &'r str {
    columns
        .get(name)
        .and_then(|&i| record.get(i))
        .unwrap_or("")
}

fn flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}
