//! Domain models for the ingestion and export pipelines.
//!
//! - [`DataSource`] - Normalized rows plus provenance and status
//! - [`Visualization`] - Chart specification bound to one DataSource
//! - [`ExportLayoutItem`] - Grid rectangle for one visualization
//! - [`VisualizationSnapshot`] - Immutable copy of a chart and its rows
//! - [`Export`] - Snapshot set, layout and artifact pointer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// One ingested record. Key order is insertion order.
pub type Row = Map<String, Value>;

// =============================================================================
// Source Kind
// =============================================================================

/// Origin category of ingested data.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Csv,
    Spreadsheet,
    Api,
    Text,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Spreadsheet => "spreadsheet",
            Self::Api => "api",
            Self::Text => "text",
        }
    }

    /// Detect a file-based kind from an uploaded file name.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())?;
        match ext.as_str() {
            "csv" => Some(Self::Csv),
            "xlsx" | "xlsm" | "xls" | "ods" => Some(Self::Spreadsheet),
            _ => None,
        }
    }

    /// Whether records of this kind keep a local backing file.
    pub fn is_file_based(&self) -> bool {
        matches!(self, Self::Csv | Self::Spreadsheet)
    }
}

/// Kind-specific provenance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SourceDetails {
    /// Uploaded file kept on disk.
    #[serde(rename_all = "camelCase")]
    File {
        file_path: PathBuf,
        original_name: String,
    },
    /// Remote API endpoint.
    Url { url: String },
    /// Free text submitted inline.
    Inline,
}

/// Processing status of a DataSource.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataSourceStatus {
    #[default]
    Pending,
    Processing,
    Processed,
}

// =============================================================================
// DataSource
// =============================================================================

/// Normalized tabular data with provenance.
///
/// `fields` is non-empty once the status leaves `Pending`, and every row's
/// keys are a subset of `fields`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub source_kind: SourceKind,
    pub source_details: SourceDetails,
    pub fields: Vec<String>,
    pub rows: Vec<Row>,
    #[serde(default)]
    pub status: DataSourceStatus,
    pub created_at: DateTime<Utc>,
}

impl DataSource {
    /// Backing file to remove on deletion, for file-based kinds only.
    pub fn backing_file(&self) -> Option<&Path> {
        if !self.source_kind.is_file_based() {
            return None;
        }
        match &self.source_details {
            SourceDetails::File { file_path, .. } => Some(file_path.as_path()),
            _ => None,
        }
    }
}

// =============================================================================
// Visualization
// =============================================================================

/// Supported chart types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    #[default]
    Bar,
    Line,
    Pie,
    Scatter,
    Area,
}

impl ChartType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bar => "bar",
            Self::Line => "line",
            Self::Pie => "pie",
            Self::Scatter => "scatter",
            Self::Area => "area",
        }
    }
}

/// A chart specification bound to one DataSource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visualization {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub chart_type: ChartType,
    pub x_field: String,
    pub y_field: String,
    /// Free-form render options.
    #[serde(default)]
    pub config: Value,
    pub datasource_id: String,
    #[serde(default)]
    pub collaborator_ids: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Visualization {
    /// Owner or invited collaborator.
    pub fn is_accessible_by(&self, user_id: &str) -> bool {
        self.owner_id == user_id || self.collaborator_ids.contains(user_id)
    }
}

// =============================================================================
// Export
// =============================================================================

/// Requested artifact format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Png,
    Pdf,
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Pdf => "pdf",
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }

    /// Rendered through the headless browser rather than serialized.
    pub fn is_document(&self) -> bool {
        matches!(self, Self::Png | Self::Pdf)
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "pdf" => Ok(Self::Pdf),
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(format!("Invalid export format '{}'", other)),
        }
    }
}

/// Grid rectangle in the 12-column system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExportLayoutItem {
    pub visualization_id: String,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// Copy of a visualization and its bound rows taken at export time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VisualizationSnapshot {
    pub visualization_id: String,
    pub chart_type: ChartType,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub x_field: String,
    pub y_field: String,
    #[serde(default)]
    pub config: Value,
    pub data: Vec<Row>,
}

impl VisualizationSnapshot {
    pub fn capture(visualization: &Visualization, rows: &[Row]) -> Self {
        Self {
            visualization_id: visualization.id.clone(),
            chart_type: visualization.chart_type,
            title: visualization.title.clone(),
            description: visualization.description.clone(),
            x_field: visualization.x_field.clone(),
            y_field: visualization.y_field.clone(),
            config: visualization.config.clone(),
            data: rows.to_vec(),
        }
    }
}

/// A persisted export with its artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Export {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub format: ExportFormat,
    pub visualizations: Vec<VisualizationSnapshot>,
    pub layout: Vec<ExportLayoutItem>,
    pub artifact_path: PathBuf,
    pub file_name: String,
    pub download_link: String,
    pub created_at: DateTime<Utc>,
}
