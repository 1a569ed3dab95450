//! Ingestion pipeline: source adapter → schema normalizer → DataSource store.
//!
//! A DataSource is persisted once, fully populated, or not at all. Uploaded
//! files are kept under the upload directory as the backing file of the
//! record; when ingestion fails the saved upload is removed before the error
//! is returned.

use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::logs::{log_info, log_info_indent, log_success, log_warning};
use crate::error::{AppError, AppResult, SourceError};
use crate::models::{DataSource, DataSourceStatus, Row, SourceDetails, SourceKind};
use crate::schema::normalize;
use crate::sources::api::validate_url;
use crate::sources::{ApiAdapter, CsvAdapter, SourceAdapter, SpreadsheetAdapter, TextAdapter};
use crate::store::DataSourceRepository;

/// Rows returned by [`IngestService::schema`].
pub const SAMPLE_ROWS: usize = 10;

/// Schema view of a DataSource.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaView {
    pub fields: Vec<String>,
    pub sample_data: Vec<Row>,
}

/// Orchestrates adapters, normalization and persistence.
#[derive(Clone)]
pub struct IngestService {
    repo: Arc<dyn DataSourceRepository>,
    upload_dir: PathBuf,
    client: reqwest::Client,
    max_upload_bytes: usize,
}

impl IngestService {
    pub fn new(repo: Arc<dyn DataSourceRepository>, upload_dir: impl Into<PathBuf>, client: reqwest::Client) -> Self {
        Self {
            repo,
            upload_dir: upload_dir.into(),
            client,
            max_upload_bytes: usize::MAX,
        }
    }

    pub fn with_max_upload_bytes(mut self, bytes: usize) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    // -------------------------------------------------------------------------
    // Ingestion
    // -------------------------------------------------------------------------

    /// Ingest an uploaded CSV or spreadsheet.
    pub async fn ingest_file(
        &self,
        owner_id: &str,
        name: &str,
        original_name: &str,
        bytes: &[u8],
    ) -> AppResult<DataSource> {
        let name = required("name", name)?;
        let kind = SourceKind::from_file_name(original_name).ok_or_else(|| {
            AppError::validation(format!(
                "Unsupported file type for '{}'. Supported types are: csv, xlsx, xlsm, xls, ods",
                original_name
            ))
        })?;
        if bytes.len() > self.max_upload_bytes {
            return Err(AppError::validation(format!(
                "Upload of {} bytes exceeds the {} byte limit",
                bytes.len(),
                self.max_upload_bytes
            )));
        }

        log_info(format!("Receiving {} ({} bytes)", original_name, bytes.len()));
        let path = self.save_upload(original_name, bytes).await?;

        let details = SourceDetails::File {
            file_path: path.clone(),
            original_name: original_name.to_string(),
        };
        let result = match kind {
            SourceKind::Spreadsheet => {
                self.run(owner_id, name, details, &SpreadsheetAdapter::new(&path)).await
            }
            _ => self.run(owner_id, name, details, &CsvAdapter::new(&path)).await,
        };

        if result.is_err() {
            remove_quietly(&path).await;
        }
        result
    }

    /// Ingest the JSON array returned by a remote endpoint.
    pub async fn ingest_api(&self, owner_id: &str, name: &str, url: &str) -> AppResult<DataSource> {
        let name = required("name", name)?;
        let url = required("apiUrl", url)?;
        validate_url(url)?;

        log_info(format!("Fetching {}", url));
        let adapter = ApiAdapter::with_client(self.client.clone(), url);
        let details = SourceDetails::Url { url: url.to_string() };
        self.run(owner_id, name, details, &adapter).await
    }

    /// Ingest a free-text analysis row.
    pub async fn ingest_text(&self, owner_id: &str, name: &str, text: &str) -> AppResult<DataSource> {
        let name = required("name", name)?;
        self.run(owner_id, name, SourceDetails::Inline, &TextAdapter::new(text)).await
    }

    async fn run(
        &self,
        owner_id: &str,
        name: &str,
        details: SourceDetails,
        adapter: &dyn SourceAdapter,
    ) -> AppResult<DataSource> {
        let kind = adapter.kind();
        let parsed = adapter.parse().await.map_err(|e| {
            log_warning(format!("{} source '{}' failed: {}", kind.as_str(), name, e));
            e
        })?;
        log_info_indent(format!("Parsed {} rows", parsed.rows.len()), 1);

        let normalized = normalize(parsed)?;
        log_info_indent(format!("Fields: {}", normalized.fields.join(", ")), 1);

        let mut source = DataSource {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            source_kind: normalized.kind,
            source_details: details,
            fields: Vec::new(),
            rows: Vec::new(),
            status: DataSourceStatus::Pending,
            created_at: Utc::now(),
        };
        source.fields = normalized.fields;
        source.rows = normalized.rows;
        source.status = DataSourceStatus::Processed;

        let source = self.repo.insert(source).await?;
        log_success(format!(
            "Stored {} source '{}' ({} fields, {} rows)",
            kind.as_str(),
            source.name,
            source.fields.len(),
            source.rows.len()
        ));
        tracing::info!(id = %source.id, owner = %owner_id, kind = kind.as_str(), "datasource created");
        Ok(source)
    }

    /// Write upload bytes to `{millis}-{random}{ext}` under the upload dir.
    async fn save_upload(&self, original_name: &str, bytes: &[u8]) -> AppResult<PathBuf> {
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        let ext = Path::new(original_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_default();
        let random = Uuid::new_v4().as_u128() % 1_000_000_000;
        let file_name = format!("{}-{}{}", Utc::now().timestamp_millis(), random, ext);
        let path = self.upload_dir.join(file_name);
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub async fn get(&self, id: &str) -> AppResult<DataSource> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Data source '{}' not found", id)))
    }

    /// Fetch a DataSource the caller owns.
    pub async fn get_owned(&self, owner_id: &str, id: &str) -> AppResult<DataSource> {
        let source = self.get(id).await?;
        if source.owner_id != owner_id {
            return Err(AppError::unauthorized(format!(
                "Data source '{}' belongs to another user",
                id
            )));
        }
        Ok(source)
    }

    /// Newest first.
    pub async fn list(&self, owner_id: &str) -> AppResult<Vec<DataSource>> {
        Ok(self.repo.list_by_owner(owner_id).await?)
    }

    pub async fn schema(&self, owner_id: &str, id: &str) -> AppResult<SchemaView> {
        let source = self.get_owned(owner_id, id).await?;
        if source.fields.is_empty() {
            return Err(SourceError::Schema(format!("Data source '{}' has no schema", id)).into());
        }
        Ok(SchemaView {
            fields: source.fields,
            sample_data: source.rows.into_iter().take(SAMPLE_ROWS).collect(),
        })
    }

    // -------------------------------------------------------------------------
    // Deletion
    // -------------------------------------------------------------------------

    /// Delete an owned DataSource and its backing file, if any.
    ///
    /// A backing file that is already gone does not fail the deletion.
    pub async fn delete(&self, owner_id: &str, id: &str) -> AppResult<DataSource> {
        let source = self.get_owned(owner_id, id).await?;

        if let Some(path) = source.backing_file() {
            match tokio::fs::remove_file(path).await {
                Ok(()) => log_info_indent(format!("Removed {}", path.display()), 1),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(path = %path.display(), "backing file already absent");
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.repo.remove(id).await?;
        log_success(format!("Deleted data source '{}'", source.name));
        Ok(source)
    }
}

fn required<'a>(field: &str, value: &'a str) -> AppResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation(format!("{} is required", field)));
    }
    Ok(trimmed)
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove upload");
        }
    }
}
