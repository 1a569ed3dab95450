//! Source adapters: turn a raw input into `(fields, rows)`.
//!
//! Every adapter implements [`SourceAdapter`], so the schema normalizer and
//! the ingestion pipeline never depend on kind-specific logic.
//!
//! | Kind          | Adapter                | Input                     |
//! |---------------|------------------------|---------------------------|
//! | `csv`         | [`CsvAdapter`]         | uploaded `.csv` file      |
//! | `spreadsheet` | [`SpreadsheetAdapter`] | uploaded workbook         |
//! | `api`         | [`ApiAdapter`]         | HTTP GET returning JSON   |
//! | `text`        | [`TextAdapter`]        | free-form string          |

pub mod api;
pub mod csv;
pub mod spreadsheet;
pub mod text;

use async_trait::async_trait;

use crate::error::SourceResult;
use crate::models::{Row, SourceKind};

pub use self::api::ApiAdapter;
pub use self::csv::{CsvAdapter, CsvRows};
pub use self::spreadsheet::SpreadsheetAdapter;
pub use self::text::{analyze_text, TextAdapter};

/// Raw adapter output, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSource {
    pub kind: SourceKind,
    /// Columns the input declares up front (CSV and spreadsheet headers).
    /// Empty when the input has no header concept.
    pub declared_fields: Vec<String>,
    pub rows: Vec<Row>,
}

/// Capability shared by every source kind.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Source kind recorded on the resulting DataSource.
    fn kind(&self) -> SourceKind;

    /// Parse the whole input.
    async fn parse(&self) -> SourceResult<ParsedSource>;
}
