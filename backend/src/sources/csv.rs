//! CSV adapter with encoding and delimiter auto-detection.
//!
//! Rows are exposed as a lazy, finite iterator ([`CsvRows`]); each call to
//! [`CsvAdapter::rows`] reopens the file, so the sequence can be restarted.
//!
//! Cleaning rules:
//! - headers are trimmed and a leading byte-order mark is stripped
//! - columns whose cleaned header is empty are dropped
//! - values are trimmed
//! - rows left without any cell are dropped

use async_trait::async_trait;
use serde_json::Value;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::{Path, PathBuf};

use super::{ParsedSource, SourceAdapter};
use crate::error::{SourceError, SourceResult};
use crate::models::{Row, SourceKind};

const BOM: char = '\u{feff}';

/// Bytes inspected for encoding and delimiter detection.
const SAMPLE_BYTES: usize = 64 * 1024;

/// Detect the encoding of raw bytes using chardet
pub fn detect_encoding(bytes: &[u8]) -> String {
    let result = chardet::detect(bytes);
    let charset = result.0;

    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" | "" => "utf-8".to_string(),
        "iso-8859-1" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "iso-8859-15" | "latin-9" | "latin9" => "iso-8859-15".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        _ => charset,
    }
}

/// Decode bytes to a string using the given encoding.
///
/// ISO-8859-1 is decoded as windows-1252, its WHATWG definition. Unknown
/// encodings fall back to lossy UTF-8.
pub fn decode_content(bytes: &[u8], encoding: &str) -> String {
    match encoding.to_lowercase().as_str() {
        "iso-8859-1" | "latin-1" | "latin1" | "windows-1252" | "cp1252" => {
            encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned()
        }
        "iso-8859-15" | "latin-9" | "latin9" => encoding_rs::ISO_8859_15.decode(bytes).0.into_owned(),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Detect the delimiter by counting occurrences in the first line.
///
/// Comma wins ties, including the no-separator case.
pub fn detect_delimiter(content: &str) -> u8 {
    let first_line = content.lines().next().unwrap_or("");

    let separators = [b',', b';', b'\t', b'|'];
    let mut best_sep = b',';
    let mut best_count = 0;

    for &sep in &separators {
        let count = first_line.matches(sep as char).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

/// Trim a header and strip a leading byte-order mark.
pub fn clean_header(raw: &str) -> String {
    raw.trim().trim_start_matches(BOM).trim().to_string()
}

/// Lazy iterator over cleaned CSV rows.
pub struct CsvRows {
    headers: Vec<Option<String>>,
    records: csv::StringRecordsIntoIter<Box<dyn Read + Send>>,
}

impl CsvRows {
    /// Build from any reader; the first record is the header row.
    pub fn from_reader(reader: Box<dyn Read + Send>, delimiter: u8) -> SourceResult<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .has_headers(true)
            .from_reader(reader);

        let headers = rdr
            .headers()
            .map_err(|e| SourceError::Parse(format!("Cannot read header: {}", e)))?
            .iter()
            .map(|h| {
                let cleaned = clean_header(h);
                (!cleaned.is_empty()).then_some(cleaned)
            })
            .collect();

        Ok(Self {
            headers,
            records: rdr.into_records(),
        })
    }

    /// Cleaned, non-empty headers in column order.
    pub fn fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = Vec::new();
        for header in self.headers.iter().flatten() {
            if !fields.contains(header) {
                fields.push(header.clone());
            }
        }
        fields
    }
}

impl Iterator for CsvRows {
    type Item = SourceResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let record = match self.records.next()? {
                Ok(record) => record,
                Err(e) => {
                    let line = e.position().map(|p| p.line()).unwrap_or(0);
                    return Some(Err(SourceError::Parse(format!("Line {}: {}", line, e))));
                }
            };

            let mut row = Row::new();
            for (header, value) in self.headers.iter().zip(record.iter()) {
                if let Some(key) = header {
                    row.insert(key.clone(), Value::String(value.trim().to_string()));
                }
            }

            if !row.is_empty() {
                return Some(Ok(row));
            }
        }
    }
}

/// Adapter for an uploaded CSV file.
#[derive(Debug, Clone)]
pub struct CsvAdapter {
    path: PathBuf,
}

impl CsvAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a fresh row sequence over the file.
    ///
    /// UTF-8 input is streamed from disk; other encodings are decoded in memory.
    pub fn rows(&self) -> SourceResult<CsvRows> {
        let mut sample = Vec::with_capacity(SAMPLE_BYTES);
        File::open(&self.path)?
            .take(SAMPLE_BYTES as u64)
            .read_to_end(&mut sample)?;

        let encoding = detect_encoding(&sample);
        if encoding == "utf-8" {
            let head = String::from_utf8_lossy(&sample);
            let delimiter = detect_delimiter(head.trim_start_matches(BOM));
            return rows_from_utf8_file(&self.path, delimiter);
        }

        rows_from_bytes(std::fs::read(&self.path)?)
    }

    fn parse_blocking(&self) -> SourceResult<ParsedSource> {
        let rows = self.rows()?;
        let declared_fields = rows.fields();
        let rows = rows.collect::<SourceResult<Vec<Row>>>()?;
        Ok(ParsedSource {
            kind: SourceKind::Csv,
            declared_fields,
            rows,
        })
    }
}

/// Build a row sequence from raw bytes, detecting encoding and delimiter.
pub fn rows_from_bytes(bytes: Vec<u8>) -> SourceResult<CsvRows> {
    let encoding = detect_encoding(&bytes);
    let content = decode_content(&bytes, &encoding);
    let delimiter = detect_delimiter(content.trim_start_matches(BOM));
    tracing::debug!(%encoding, delimiter = %(delimiter as char), "csv input detected");
    CsvRows::from_reader(Box::new(Cursor::new(content.into_bytes())), delimiter)
}

/// Stream rows straight from a UTF-8 file without buffering it.
pub fn rows_from_utf8_file(path: &Path, delimiter: u8) -> SourceResult<CsvRows> {
    let file = File::open(path)?;
    CsvRows::from_reader(Box::new(BufReader::new(file)), delimiter)
}

#[async_trait]
impl SourceAdapter for CsvAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Csv
    }

    async fn parse(&self) -> SourceResult<ParsedSource> {
        let adapter = self.clone();
        tokio::task::spawn_blocking(move || adapter.parse_blocking())
            .await
            .map_err(|e| SourceError::Parse(format!("CSV worker failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse_str(csv: &str) -> (Vec<String>, Vec<Row>) {
        let rows = rows_from_bytes(csv.as_bytes().to_vec()).unwrap();
        let fields = rows.fields();
        let rows = rows.collect::<SourceResult<Vec<_>>>().unwrap();
        (fields, rows)
    }

    #[test]
    fn test_headers_trimmed_and_values_cleaned() {
        let (fields, rows) = parse_str("Region, Amount\nEast,100\nWest , 200 \n");

        assert_eq!(fields, vec!["Region", "Amount"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Region"], "East");
        assert_eq!(rows[1]["Region"], "West");
        assert_eq!(rows[1]["Amount"], "200");
    }

    #[test]
    fn test_bom_stripped() {
        let (fields, rows) = parse_str("\u{feff}name,age\nAlice,30");

        assert_eq!(fields, vec!["name", "age"]);
        assert_eq!(rows[0]["name"], "Alice");
    }

    #[test]
    fn test_empty_header_column_dropped() {
        let (fields, rows) = parse_str("a,,b\n1,ignored,2");

        assert_eq!(fields, vec!["a", "b"]);
        assert_eq!(rows[0], json!({ "a": "1", "b": "2" }).as_object().cloned().unwrap());
    }

    #[test]
    fn test_row_keys_subset_of_fields() {
        let (fields, rows) = parse_str("a,b,c\n1,2\n4,5,6,7\n");

        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert!(row.keys().all(|k| fields.contains(k)));
        }
        assert!(rows[0].get("c").is_none());
    }

    #[test]
    fn test_duplicate_headers_collapse() {
        let (fields, rows) = parse_str("a,b,a\n1,2,3");

        assert_eq!(fields, vec!["a", "b"]);
        assert_eq!(rows[0].len(), 2);
        assert_eq!(rows[0].keys().next().map(String::as_str), Some("a"));
    }

    #[test]
    fn test_rows_without_named_cells_dropped() {
        let (fields, rows) = parse_str(" ,\nx,y\n");

        assert!(fields.is_empty());
        assert!(rows.is_empty());
    }

    #[test]
    fn test_empty_input_has_no_fields() {
        let (fields, rows) = parse_str("");
        assert!(fields.is_empty());
        assert!(rows.is_empty());
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter("a;b;c\n1;2;3"), b';');
        assert_eq!(detect_delimiter("a,b,c\n1,2,3"), b',');
        assert_eq!(detect_delimiter("a\tb\tc"), b'\t');
        assert_eq!(detect_delimiter("a|b|c"), b'|');
        assert_eq!(detect_delimiter("single"), b',');
    }

    #[test]
    fn test_semicolon_file() {
        let (fields, rows) = parse_str("name;age\nAlice;30\nBob;25");

        assert_eq!(fields, vec!["name", "age"]);
        assert_eq!(rows[1]["age"], "25");
    }

    #[test]
    fn test_latin1_decoding() {
        // "Société" in ISO-8859-1
        let bytes: &[u8] = &[0x53, 0x6F, 0x63, 0x69, 0xE9, 0x74, 0xE9];
        let decoded = decode_content(bytes, "iso-8859-1");
        assert_eq!(decoded, "Société");
    }

    #[test]
    fn test_latin1_differs_from_latin9() {
        let bytes: &[u8] = &[0xA4, 0xA6, 0xBD];
        assert_eq!(decode_content(bytes, "iso-8859-1"), "¤¦½");
        assert_eq!(decode_content(bytes, "iso-8859-15"), "€Šœ");
    }

    #[test]
    fn test_rows_restartable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "a,b\n1,2\n3,4\n").unwrap();

        let adapter = CsvAdapter::new(&path);
        let first: Vec<_> = adapter.rows().unwrap().collect();
        let second: Vec<_> = adapter.rows().unwrap().collect();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);

        let streamed = rows_from_utf8_file(&path, b',').unwrap().count();
        assert_eq!(streamed, 2);
    }

    #[tokio::test]
    async fn test_parse_reports_declared_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sales.csv");
        std::fs::write(&path, "Region, Amount\nEast,100\nWest,200\n").unwrap();

        let parsed = CsvAdapter::new(&path).parse().await.unwrap();
        assert_eq!(parsed.kind, SourceKind::Csv);
        assert_eq!(parsed.declared_fields, vec!["Region", "Amount"]);
        assert_eq!(parsed.rows.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let err = CsvAdapter::new("/definitely/not/here.csv").parse().await.unwrap_err();
        assert!(matches!(err, SourceError::Io(_)));
    }
}
