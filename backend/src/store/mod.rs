//! Record stores for DataSources, Visualizations and Exports.
//!
//! Services depend on the repository traits ([`DataSourceRepository`],
//! [`VisualizationRepository`], [`ExportRepository`]) and receive a store
//! handle at construction; there is no module-level connection state.
//!
//! [`JsonStore`] is the bundled implementation: one pretty-printed
//! `{id}.json` file per record under a directory, loaded into memory on open.
//! Writes go to a temporary file first and are renamed into place.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::error::StoreResult;
use crate::models::{DataSource, Export, Visualization};

// =============================================================================
// Repository traits
// =============================================================================

#[async_trait]
pub trait DataSourceRepository: Send + Sync {
    async fn insert(&self, source: DataSource) -> StoreResult<DataSource>;
    async fn get(&self, id: &str) -> StoreResult<Option<DataSource>>;
    /// Newest first.
    async fn list_by_owner(&self, owner_id: &str) -> StoreResult<Vec<DataSource>>;
    /// Returns whether a record was removed.
    async fn remove(&self, id: &str) -> StoreResult<bool>;
}

#[async_trait]
pub trait VisualizationRepository: Send + Sync {
    async fn insert(&self, visualization: Visualization) -> StoreResult<Visualization>;
    async fn get(&self, id: &str) -> StoreResult<Option<Visualization>>;
    async fn list_by_owner(&self, owner_id: &str) -> StoreResult<Vec<Visualization>>;
    async fn list_shared_with(&self, user_id: &str) -> StoreResult<Vec<Visualization>>;
    /// Replace an existing record.
    async fn update(&self, visualization: Visualization) -> StoreResult<Visualization>;
    async fn remove(&self, id: &str) -> StoreResult<bool>;
}

#[async_trait]
pub trait ExportRepository: Send + Sync {
    async fn insert(&self, export: Export) -> StoreResult<Export>;
    async fn get(&self, id: &str) -> StoreResult<Option<Export>>;
    async fn list_by_owner(&self, owner_id: &str) -> StoreResult<Vec<Export>>;
    /// Every record, used by the reconciliation sweep.
    async fn list_all(&self) -> StoreResult<Vec<Export>>;
    async fn remove(&self, id: &str) -> StoreResult<bool>;
}

// =============================================================================
// Stored record
// =============================================================================

/// A record persisted by [`JsonStore`].
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn id(&self) -> &str;
    fn owner_id(&self) -> &str;
    fn created_at(&self) -> DateTime<Utc>;
}

impl Record for DataSource {
    fn id(&self) -> &str {
        &self.id
    }
    fn owner_id(&self) -> &str {
        &self.owner_id
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Record for Visualization {
    fn id(&self) -> &str {
        &self.id
    }
    fn owner_id(&self) -> &str {
        &self.owner_id
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Record for Export {
    fn id(&self) -> &str {
        &self.id
    }
    fn owner_id(&self) -> &str {
        &self.owner_id
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

// =============================================================================
// JSON file store
// =============================================================================

/// Directory of JSON records with an in-memory index.
pub struct JsonStore<T: Record> {
    /// `None` keeps records in memory only.
    dir: Option<PathBuf>,
    records: RwLock<HashMap<String, T>>,
}

impl<T: Record> JsonStore<T> {
    /// Open a store, loading every readable `*.json` record in `dir`.
    ///
    /// Unreadable files are skipped with a warning so one corrupt record does
    /// not take the whole store down.
    pub async fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let mut records = HashMap::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.extension().is_some_and(|e| e == "json") {
                continue;
            }
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable record");
                    continue;
                }
            };
            match serde_json::from_str::<T>(&content) {
                Ok(record) => {
                    records.insert(record.id().to_string(), record);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping malformed record");
                }
            }
        }

        tracing::debug!(dir = %dir.display(), count = records.len(), "record store opened");
        Ok(Self {
            dir: Some(dir),
            records: RwLock::new(records),
        })
    }

    /// Store without a backing directory.
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    fn record_path(dir: &Path, id: &str) -> PathBuf {
        dir.join(format!("{}.json", id))
    }

    async fn persist(&self, record: &T) -> StoreResult<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let path = Self::record_path(dir, record.id());
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(record)?;
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Insert or replace a record.
    pub async fn put(&self, record: T) -> StoreResult<T> {
        let mut records = self.records.write().await;
        self.persist(&record).await?;
        records.insert(record.id().to_string(), record.clone());
        Ok(record)
    }

    pub async fn find(&self, id: &str) -> Option<T> {
        self.records.read().await.get(id).cloned()
    }

    /// Records matching `pred`, newest first.
    pub async fn filter(&self, pred: impl Fn(&T) -> bool) -> Vec<T> {
        let records = self.records.read().await;
        let mut out: Vec<T> = records.values().filter(|r| pred(r)).cloned().collect();
        out.sort_by(|a, b| b.created_at().cmp(&a.created_at()).then_with(|| a.id().cmp(b.id())));
        out
    }

    /// Remove a record and its file. A missing file is not an error.
    pub async fn delete(&self, id: &str) -> StoreResult<bool> {
        let mut records = self.records.write().await;
        if records.remove(id).is_none() {
            return Ok(false);
        }
        if let Some(dir) = &self.dir {
            match tokio::fs::remove_file(Self::record_path(dir, id)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl DataSourceRepository for JsonStore<DataSource> {
    async fn insert(&self, source: DataSource) -> StoreResult<DataSource> {
        self.put(source).await
    }

    async fn get(&self, id: &str) -> StoreResult<Option<DataSource>> {
        Ok(self.find(id).await)
    }

    async fn list_by_owner(&self, owner_id: &str) -> StoreResult<Vec<DataSource>> {
        Ok(self.filter(|s| s.owner_id == owner_id).await)
    }

    async fn remove(&self, id: &str) -> StoreResult<bool> {
        self.delete(id).await
    }
}

#[async_trait]
impl VisualizationRepository for JsonStore<Visualization> {
    async fn insert(&self, visualization: Visualization) -> StoreResult<Visualization> {
        self.put(visualization).await
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Visualization>> {
        Ok(self.find(id).await)
    }

    async fn list_by_owner(&self, owner_id: &str) -> StoreResult<Vec<Visualization>> {
        Ok(self.filter(|v| v.owner_id == owner_id).await)
    }

    async fn list_shared_with(&self, user_id: &str) -> StoreResult<Vec<Visualization>> {
        Ok(self.filter(|v| v.collaborator_ids.contains(user_id)).await)
    }

    async fn update(&self, visualization: Visualization) -> StoreResult<Visualization> {
        self.put(visualization).await
    }

    async fn remove(&self, id: &str) -> StoreResult<bool> {
        self.delete(id).await
    }
}

#[async_trait]
impl ExportRepository for JsonStore<Export> {
    async fn insert(&self, export: Export) -> StoreResult<Export> {
        self.put(export).await
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Export>> {
        Ok(self.find(id).await)
    }

    async fn list_by_owner(&self, owner_id: &str) -> StoreResult<Vec<Export>> {
        Ok(self.filter(|e| e.owner_id == owner_id).await)
    }

    async fn list_all(&self) -> StoreResult<Vec<Export>> {
        Ok(self.filter(|_| true).await)
    }

    async fn remove(&self, id: &str) -> StoreResult<bool> {
        self.delete(id).await
    }
}
