//! Schema normalizer: derive the canonical field list for a DataSource.
//!
//! Field order is order of first appearance: declared headers first, then
//! the keys of the first row, then keys first seen in later rows. Duplicates
//! collapse to one entry. Because rows keep insertion order, iterating a row
//! yields keys in the same relative order as `fields`, so table views and
//! export CSV headers are column-stable.

use crate::error::{SourceError, SourceResult};
use crate::models::{Row, SourceKind};
use crate::sources::ParsedSource;

/// Adapter output with its canonical schema.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSource {
    pub kind: SourceKind,
    pub fields: Vec<String>,
    pub rows: Vec<Row>,
}

/// Build the canonical, de-duplicated field list.
///
/// Fails with a schema error when no field can be derived; a DataSource is
/// never stored without fields.
pub fn normalize(parsed: ParsedSource) -> SourceResult<NormalizedSource> {
    let mut rows = parsed.rows;
    for row in rows.iter_mut() {
        if row.keys().any(|k| k.trim().is_empty()) {
            *row = std::mem::take(row)
                .into_iter()
                .filter(|(k, _)| !k.trim().is_empty())
                .collect();
        }
    }

    let mut fields: Vec<String> = Vec::new();
    let mut push = |key: &str| {
        if !key.trim().is_empty() && !fields.iter().any(|f| f == key) {
            fields.push(key.to_string());
        }
    };

    for declared in &parsed.declared_fields {
        push(declared);
    }
    for row in &rows {
        for key in row.keys() {
            push(key);
        }
    }

    if fields.is_empty() {
        return Err(SourceError::Schema(format!(
            "No fields could be derived from the {} input",
            parsed.kind.as_str()
        )));
    }

    Ok(NormalizedSource {
        kind: parsed.kind,
        fields,
        rows,
    })
}

/// Column values for a table view, in field order.
pub fn table_row<'a>(fields: &'a [String], row: &'a Row) -> impl Iterator<Item = Option<&'a serde_json::Value>> + 'a {
    fields.iter().map(move |f| row.get(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn parsed(declared: &[&str], rows: Vec<Row>) -> ParsedSource {
        ParsedSource {
            kind: SourceKind::Api,
            declared_fields: declared.iter().map(|s| s.to_string()).collect(),
            rows,
        }
    }

    #[test]
    fn test_first_row_order_not_sorted() {
        let input = parsed(&[], vec![row(json!({ "zeta": 1, "alpha": 2, "mid": 3 }))]);
        let out = normalize(input).unwrap();
        assert_eq!(out.fields, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_declared_fields_come_first_and_dedupe() {
        let input = parsed(
            &["b", "a", "b"],
            vec![row(json!({ "a": 1 })), row(json!({ "c": 2, "b": 3 }))],
        );
        let out = normalize(input).unwrap();
        assert_eq!(out.fields, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_every_row_key_is_a_field() {
        let input = parsed(
            &[],
            vec![row(json!({ "x": 1 })), row(json!({ "x": 2, "extra": true }))],
        );
        let out = normalize(input).unwrap();
        for r in &out.rows {
            assert!(r.keys().all(|k| out.fields.contains(k)));
        }
    }

    #[test]
    fn test_empty_schema_rejected() {
        let err = normalize(parsed(&[], vec![])).unwrap_err();
        assert!(matches!(err, SourceError::Schema(_)));

        let err = normalize(parsed(&["  "], vec![row(json!({ "": 1 }))])).unwrap_err();
        assert!(matches!(err, SourceError::Schema(_)));
    }

    #[test]
    fn test_blank_keys_removed_from_rows() {
        let out = normalize(parsed(&[], vec![row(json!({ "": 1, "a": 2 }))])).unwrap();
        assert_eq!(out.fields, vec!["a"]);
        assert_eq!(out.rows[0].len(), 1);
    }

    #[test]
    fn test_table_row_follows_fields() {
        let fields = vec!["b".to_string(), "a".to_string()];
        let r = row(json!({ "a": 1, "b": 2 }));
        let cells: Vec<_> = table_row(&fields, &r).collect();
        assert_eq!(cells, vec![Some(&json!(2)), Some(&json!(1))]);
    }
}
