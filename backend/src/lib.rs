//! # Chartforge - data ingestion and chart export backend
//!
//! Chartforge ingests heterogeneous tabular data (CSV and spreadsheet uploads,
//! remote JSON APIs, free text) into normalized DataSources, binds chart
//! specifications to them, and renders multi-chart exports as PNG, PDF, CSV
//! or JSON files.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Sources   │────▶│ Normalizer  │────▶│ DataSource  │────▶│Visualization│
//! │ csv/xlsx/.. │     │  (fields)   │     │    store    │     │   binder    │
//! └─────────────┘     └─────────────┘     └─────────────┘     └──────┬──────┘
//!                                                                    │
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐            │
//! │  Artifact   │◀────│  Renderer   │◀────│   Layout    │◀───────────┘
//! │ png/pdf/csv │     │ (Chromium)  │     │ (12 cols)   │   snapshots
//! └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use chartforge::{build_router, AppConfig, AppState};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = AppConfig::from_env().unwrap();
//!     let state = AppState::from_config(&config).await.unwrap();
//!     let app = build_router(state);
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Error types per layer
//! - [`models`] - Domain models (DataSource, Visualization, Export)
//! - [`config`] - Environment configuration
//! - [`sources`] - Source adapters with encoding and delimiter detection
//! - [`schema`] - Field list normalization
//! - [`store`] - Repository traits and the JSON file store
//! - [`ingest`] - Ingestion pipeline
//! - [`visualization`] - Visualization binder
//! - [`layout`] - 12-column grid composer
//! - [`render`] - Export renderer (headless browser and data files)
//! - [`exports`] - Export store
//! - [`api`] - HTTP API server

// Core modules
pub mod config;
pub mod error;
pub mod models;

// Ingestion
pub mod ingest;
pub mod schema;
pub mod sources;

// Storage
pub mod store;

// Visualizations and exports
pub mod exports;
pub mod layout;
pub mod render;
pub mod visualization;

// HTTP API
pub mod api;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    AppError, AppResult, ConfigError, ErrorKind, LayoutError, RenderError, RenderResult, SourceError,
    SourceResult, StoreError, StoreResult,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{
    ChartType, DataSource, DataSourceStatus, Export, ExportFormat, ExportLayoutItem, Row, SourceDetails,
    SourceKind, Visualization, VisualizationSnapshot,
};

// =============================================================================
// Re-exports - Configuration
// =============================================================================

pub use config::{AppConfig, CsvQuoting};

// =============================================================================
// Re-exports - Sources
// =============================================================================

pub use schema::{normalize, NormalizedSource};
pub use sources::{
    analyze_text, ApiAdapter, CsvAdapter, ParsedSource, SourceAdapter, SpreadsheetAdapter, TextAdapter,
};

// =============================================================================
// Re-exports - Services
// =============================================================================

pub use exports::{DownloadFile, ExportRequest, ExportService, SweepReport};
pub use ingest::{IngestService, SchemaView};
pub use store::{DataSourceRepository, ExportRepository, JsonStore, VisualizationRepository};
pub use visualization::{NewVisualization, VisualizationPatch, VisualizationService};

// =============================================================================
// Re-exports - Layout and rendering
// =============================================================================

pub use layout::{compose, place, GRID_COLUMNS};
pub use render::{default_engine, ExportRenderer, RenderEngine, RenderJob, RenderSession};

// =============================================================================
// Re-exports - API
// =============================================================================

pub use api::server::{build_router, start_server, AppState};
pub use api::types::{ApiResponse, ErrorBody, ExportView, Owner};
