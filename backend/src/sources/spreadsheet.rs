//! Spreadsheet adapter: first sheet of a workbook, keyed by its header row.
//!
//! Supports `.xlsx`, `.xlsm`, `.xls` and `.ods` through calamine.

use async_trait::async_trait;
use calamine::{open_workbook_auto, Data, Reader};
use serde_json::{Number, Value};
use std::path::{Path, PathBuf};

use super::csv::clean_header;
use super::{ParsedSource, SourceAdapter};
use crate::error::{SourceError, SourceResult};
use crate::models::{Row, SourceKind};

/// Adapter for an uploaded workbook.
#[derive(Debug, Clone)]
pub struct SpreadsheetAdapter {
    path: PathBuf,
}

impl SpreadsheetAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse_blocking(&self) -> SourceResult<ParsedSource> {
        let mut workbook = open_workbook_auto(&self.path)
            .map_err(|e| SourceError::Parse(format!("Cannot open workbook: {}", e)))?;

        let sheet = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| SourceError::Parse("Workbook has no sheets".to_string()))?;

        let range = workbook
            .worksheet_range(&sheet)
            .map_err(|e| SourceError::Parse(format!("Cannot read sheet '{}': {}", sheet, e)))?;

        let mut sheet_rows = range.rows();
        let headers = match sheet_rows.next() {
            Some(header_row) => header_keys(header_row),
            None => Vec::new(),
        };

        let rows = sheet_rows
            .filter_map(|cells| {
                let mut row = Row::new();
                for (header, cell) in headers.iter().zip(cells) {
                    if let (Some(key), Some(value)) = (header, cell_value(cell)) {
                        row.insert(key.clone(), value);
                    }
                }
                (!row.is_empty()).then_some(row)
            })
            .collect();

        Ok(ParsedSource {
            kind: SourceKind::Spreadsheet,
            declared_fields: headers.into_iter().flatten().collect(),
            rows,
        })
    }
}

/// Header keys for each column; empty headers drop their column and repeated
/// names get `_1`, `_2`... suffixes.
fn header_keys(cells: &[Data]) -> Vec<Option<String>> {
    let mut seen: Vec<String> = Vec::new();
    cells
        .iter()
        .map(|cell| {
            let base = clean_header(&cell_text(cell));
            if base.is_empty() {
                return None;
            }
            let mut key = base.clone();
            let mut n = 1;
            while seen.contains(&key) {
                key = format!("{}_{}", base, n);
                n += 1;
            }
            seen.push(key.clone());
            Some(key)
        })
        .collect()
}

fn cell_text(cell: &Data) -> String {
    match cell_value(cell) {
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// JSON value for a cell; `None` for empty cells.
fn cell_value(cell: &Data) -> Option<Value> {
    match cell {
        Data::Empty => None,
        Data::String(s) => Some(Value::String(s.trim().to_string())),
        Data::Int(i) => Some(Value::from(*i)),
        Data::Float(f) => Some(float_value(*f)),
        Data::Bool(b) => Some(Value::Bool(*b)),
        Data::DateTime(dt) => Some(float_value(dt.as_f64())),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Some(Value::String(s.clone())),
        Data::Error(e) => Some(Value::String(e.to_string())),
    }
}

/// Whole floats become integers, matching how spreadsheets display them.
fn float_value(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Value::from(f as i64)
    } else {
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }
}

#[async_trait]
impl SourceAdapter for SpreadsheetAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Spreadsheet
    }

    async fn parse(&self) -> SourceResult<ParsedSource> {
        let adapter = self.clone();
        tokio::task::spawn_blocking(move || adapter.parse_blocking())
            .await
            .map_err(|e| SourceError::Parse(format!("Spreadsheet worker failed: {}", e)))?
    }
}
