//! Free-text adapter: one analysis row per submitted text.

use async_trait::async_trait;
use serde_json::Value;

use super::{ParsedSource, SourceAdapter};
use crate::error::{SourceError, SourceResult};
use crate::models::{Row, SourceKind};

/// Analyze a text into `{originalText, wordCount, characterCount, lineCount}`.
///
/// Words are whitespace-delimited tokens.
pub fn analyze_text(text: &str) -> SourceResult<Row> {
    if text.trim().is_empty() {
        return Err(SourceError::Validation(
            "Text is required and must be a non-empty string".to_string(),
        ));
    }

    let mut row = Row::new();
    row.insert("originalText".into(), Value::String(text.to_string()));
    row.insert("wordCount".into(), Value::from(text.split_whitespace().count()));
    row.insert("characterCount".into(), Value::from(text.chars().count()));
    row.insert("lineCount".into(), Value::from(text.lines().count()));
    Ok(row)
}

/// Adapter for inline text.
#[derive(Debug, Clone)]
pub struct TextAdapter {
    text: String,
}

impl TextAdapter {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl SourceAdapter for TextAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Text
    }

    async fn parse(&self) -> SourceResult<ParsedSource> {
        let row = analyze_text(&self.text)?;
        Ok(ParsedSource {
            kind: SourceKind::Text,
            declared_fields: Vec::new(),
            rows: vec![row],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_count() {
        let row = analyze_text("  the quick\tbrown\n\nfox  ").unwrap();
        assert_eq!(row["wordCount"], 4);
        assert_eq!(row["lineCount"], 3);
        assert_eq!(row["originalText"], "  the quick\tbrown\n\nfox  ");
    }

    #[test]
    fn test_field_order() {
        let row = analyze_text("hello").unwrap();
        let keys: Vec<&str> = row.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["originalText", "wordCount", "characterCount", "lineCount"]);
    }

    #[test]
    fn test_blank_text_rejected() {
        assert!(matches!(analyze_text(""), Err(SourceError::Validation(_))));
        assert!(matches!(analyze_text(" \n\t"), Err(SourceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_adapter_produces_single_row() {
        let parsed = TextAdapter::new("one two three").parse().await.unwrap();
        assert_eq!(parsed.kind, SourceKind::Text);
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0]["wordCount"], 3);
    }
}
