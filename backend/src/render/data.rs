//! Data exports: merged snapshot rows as CSV or JSON.

use serde_json::Value;

use crate::config::CsvQuoting;
use crate::error::RenderResult;
use crate::models::{Row, VisualizationSnapshot};

/// Concatenate the rows of every snapshot, in snapshot order.
pub fn merge_rows(snapshots: &[VisualizationSnapshot]) -> Vec<Row> {
    snapshots.iter().flat_map(|s| s.data.iter().cloned()).collect()
}

/// Header row for a CSV export: the keys of the first row.
pub fn csv_headers(rows: &[Row]) -> Vec<String> {
    rows.first().map(|r| r.keys().cloned().collect()).unwrap_or_default()
}

/// Serialize rows as CSV. Empty input yields an empty document.
pub fn to_csv(rows: &[Row], quoting: CsvQuoting) -> RenderResult<String> {
    match quoting {
        CsvQuoting::Legacy => Ok(legacy_csv(rows)),
        CsvQuoting::Rfc4180 => rfc4180_csv(rows),
    }
}

/// Pretty-printed JSON array.
pub fn to_json(rows: &[Row]) -> RenderResult<String> {
    Ok(serde_json::to_string_pretty(rows)?)
}

/// Each value JSON-encoded, comma-joined, lines joined by `\n`.
///
/// Headers are written raw and string values keep JSON escaping, so embedded
/// commas inside headers or `\"` sequences are not RFC 4180 compliant. Null
/// and missing values become `""`; `0` and `false` are written as-is.
fn legacy_csv(rows: &[Row]) -> String {
    let headers = csv_headers(rows);
    if headers.is_empty() {
        return String::new();
    }

    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(headers.join(","));
    for row in rows {
        let cells: Vec<String> = headers
            .iter()
            .map(|h| match row.get(h) {
                None | Some(Value::Null) => "\"\"".to_string(),
                Some(value) => value.to_string(),
            })
            .collect();
        lines.push(cells.join(","));
    }
    lines.join("\n")
}

fn rfc4180_csv(rows: &[Row]) -> RenderResult<String> {
    let headers = csv_headers(rows);
    if headers.is_empty() {
        return Ok(String::new());
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&headers)?;
    for row in rows {
        writer.write_record(headers.iter().map(|h| match row.get(h) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| crate::error::RenderError::Serialize(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| crate::error::RenderError::Serialize(e.to_string()))
}
