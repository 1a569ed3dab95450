//! Error types for the ingestion and export pipelines.
//!
//! This module defines one error enum per layer:
//!
//! - [`SourceError`] - Source adapter errors (CSV, spreadsheet, remote API, text)
//! - [`LayoutError`] - Grid layout validation errors
//! - [`RenderError`] - Export rendering errors (headless browser and data files)
//! - [`StoreError`] - Record store errors
//! - [`ConfigError`] - Environment configuration errors
//! - [`AppError`] - Top-level orchestration errors
//!
//! Error conversion is automatic via `From` implementations, allowing `?` to
//! work across error boundaries. [`AppError::kind`] collapses every failure
//! into one of the seven user-visible [`ErrorKind`]s while the wrapped error
//! stays reachable through [`std::error::Error::source`].

use serde::Serialize;
use thiserror::Error;

// =============================================================================
// Source Adapter Errors
// =============================================================================

/// Errors raised while turning a raw input into `(fields, rows)`.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The input stream or workbook could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The remote API was unreachable or answered with an HTTP error.
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// The derived schema is empty or the payload has the wrong shape.
    #[error("Schema error: {0}")]
    Schema(String),

    /// The request itself is malformed (empty text, bad URL, unknown extension).
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Failed to read the input.
    #[error("Failed to read input: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Layout Errors
// =============================================================================

/// Errors while placing or validating grid layout items.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    /// Item footprint cannot fit the grid.
    #[error("Invalid item size {w}x{h}: width must be 1..={columns} and height 1..={rows}")]
    InvalidSize { w: u32, h: u32, columns: u32, rows: u32 },

    /// Item extends past the right or bottom edge of the grid.
    #[error("Item for visualization '{0}' extends past the grid")]
    OutOfBounds(String),

    /// No free position is left for the item.
    #[error("No free {w}x{h} position within {rows} grid rows")]
    GridFull { w: u32, h: u32, rows: u32 },

    /// Two items occupy at least one common cell.
    #[error("Layout items for '{first}' and '{second}' overlap")]
    Overlap { first: String, second: String },

    /// Item references a visualization that is not part of the export.
    #[error("Layout references unknown visualization '{0}'")]
    UnknownVisualization(String),

    /// More than one item for the same visualization.
    #[error("Visualization '{0}' appears more than once in the layout")]
    DuplicateItem(String),
}

// =============================================================================
// Render Errors
// =============================================================================

/// Errors from the export renderer.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The off-screen engine could not be started.
    #[error("Failed to launch render engine: {0}")]
    Launch(String),

    /// The composed document could not be loaded.
    #[error("Failed to load document: {0}")]
    Load(String),

    /// The chart completion signal never fired.
    #[error("Charts did not finish drawing within {secs} seconds")]
    Timeout { secs: u64 },

    /// A chart failed inside the rendered document.
    #[error("Chart script failed: {0}")]
    Script(String),

    /// Capturing the PDF or screenshot failed.
    #[error("Failed to capture output: {0}")]
    Capture(String),

    /// No rendering engine is compiled in or configured.
    #[error("Render engine unavailable: {0}")]
    Unavailable(String),

    /// The renderer finished but no file exists at the artifact path.
    #[error("Artifact missing after render: {0}")]
    MissingArtifact(String),

    /// Data serialization failed.
    #[error("Serialization failed: {0}")]
    Serialize(String),

    /// Writing the artifact failed.
    #[error("Artifact IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for RenderError {
    fn from(err: serde_json::Error) -> Self {
        RenderError::Serialize(err.to_string())
    }
}

impl From<csv::Error> for RenderError {
    fn from(err: csv::Error) -> Self {
        RenderError::Serialize(err.to_string())
    }
}

// =============================================================================
// Store Errors
// =============================================================================

/// Errors from the record stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error.
    #[error("Store IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("Store JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Config Errors
// =============================================================================

/// Errors while reading configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed.
    #[error("Invalid value for {key}: '{value}'")]
    Invalid { key: String, value: String },
}

// =============================================================================
// Application Errors (top-level)
// =============================================================================

/// The seven failure kinds surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Authorization,
    Schema,
    Fetch,
    Render,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "notFound",
            ErrorKind::Authorization => "authorization",
            ErrorKind::Schema => "schema",
            ErrorKind::Fetch => "fetch",
            ErrorKind::Render => "render",
            ErrorKind::Io => "io",
        }
    }
}

/// Top-level orchestration errors.
///
/// This is the error returned by the ingestion, visualization and export
/// services. Lower-level errors are wrapped as-is so the original cause is
/// kept for logging.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or malformed request fields.
    #[error("{0}")]
    Validation(String),

    /// A DataSource, Visualization, Export or file does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The caller does not own (or collaborate on) the resource.
    #[error("{0}")]
    Authorization(String),

    /// Source adapter error.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Layout validation error.
    #[error(transparent)]
    Layout(#[from] LayoutError),

    /// Render error.
    #[error(transparent)]
    Render(#[from] RenderError),

    /// Store error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// File system error outside the stores.
    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        AppError::Authorization(msg.into())
    }

    /// The user-visible kind of this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Authorization(_) => ErrorKind::Authorization,
            AppError::Source(err) => match err {
                SourceError::Parse(_) | SourceError::Validation(_) => ErrorKind::Validation,
                SourceError::Fetch(_) => ErrorKind::Fetch,
                SourceError::Schema(_) => ErrorKind::Schema,
                SourceError::Io(_) => ErrorKind::Io,
            },
            AppError::Layout(_) => ErrorKind::Validation,
            AppError::Render(_) => ErrorKind::Render,
            AppError::Store(_) | AppError::Io(_) => ErrorKind::Io,
        }
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for source adapters.
pub type SourceResult<T> = Result<T, SourceError>;

/// Result type for rendering.
pub type RenderResult<T> = Result<T, RenderError>;

/// Result type for record stores.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for services.
pub type AppResult<T> = Result<T, AppError>;
