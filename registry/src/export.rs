//! JSON and CSV projections of telemetry records.
//!
//! Both projections see a record as the row `{id, ...fields, timestamp}`,
//! with the timestamp rendered as an ISO-8601 UTC string.

use crate::model::TelemetryRecord;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

/// `2024-05-01T12:00:00.000Z`
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn to_json_row(record: &TelemetryRecord) -> Value {
    let mut row = Map::with_capacity(record.fields.len() + 2);
    row.insert("id".to_string(), Value::String(record.id.clone()));
    for (key, value) in record.fields.iter() {
        row.insert(key.to_string(), value.to_json());
    }
    row.insert(
        "timestamp".to_string(),
        Value::String(format_timestamp(&record.timestamp)),
    );
    Value::Object(row)
}

pub fn to_json_rows(records: &[TelemetryRecord]) -> Vec<Value> {
    records.iter().map(to_json_row).collect()
}

// Cells of one record in row order; `None` is an empty cell.
fn cells(record: &TelemetryRecord) -> Vec<(&str, Option<String>)> {
    let mut cells = Vec::with_capacity(record.fields.len() + 2);
    cells.push(("id", Some(record.id.clone())));
    cells.extend(record.fields.iter().map(|(key, value)| (key, value.to_text())));
    cells.push(("timestamp", Some(format_timestamp(&record.timestamp))));
    cells
}

fn escape_cell(text: &str) -> Cow<'_, str> {
    if text.contains('"') || text.contains(',') {
        Cow::Owned(format!("\"{}\"", text.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(text)
    }
}

/// Renders records as CSV, header first, rows joined by `\n`.
///
/// The header is every column seen across the rows, in first-seen order.
/// An empty record set renders as an empty string rather than a lone header.
pub fn to_csv(records: &[TelemetryRecord]) -> String {
    if records.is_empty() {
        return String::new();
    }

    let rows: Vec<_> = records.iter().map(cells).collect();

    let mut seen = HashSet::new();
    let mut header: Vec<&str> = Vec::new();
    for row in &rows {
        for (key, _) in row {
            if seen.insert(*key) {
                header.push(*key);
            }
        }
    }

    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(
        header
            .iter()
            .map(|column| escape_cell(column))
            .collect::<Vec<_>>()
            .join(","),
    );

    for row in &rows {
        let by_column: HashMap<&str, &Option<String>> =
            row.iter().map(|(key, cell)| (*key, cell)).collect();
        let line = header
            .iter()
            .map(|column| match by_column.get(column) {
                Some(Some(text)) => escape_cell(text).into_owned(),
                _ => String::new(),
            })
            .collect::<Vec<_>>()
            .join(",");
        lines.push(line);
    }

    lines.join("\n")
}
