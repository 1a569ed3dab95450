//! Export store: snapshots, layout, artifact and record lifecycle.
//!
//! An Export is created with a rendered artifact or not at all: render
//! failures persist nothing, and when persisting the record fails the fresh
//! artifact is removed. Snapshots copy the visualization and its rows at
//! creation time, so later edits never reach an existing Export.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::api::logs::{log_error, log_info, log_info_indent, log_success, log_warning};
use crate::error::{AppError, AppResult, LayoutError};
use crate::layout::{self, DEFAULT_ITEM_HEIGHT, DEFAULT_ITEM_WIDTH};
use crate::models::{Export, ExportFormat, ExportLayoutItem, Visualization, VisualizationSnapshot};
use crate::render::{ExportRenderer, RenderJob};
use crate::store::{DataSourceRepository, ExportRepository, VisualizationRepository};

/// Request body for creating an export.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportRequest {
    pub title: String,
    pub description: String,
    #[serde(alias = "exportFormat")]
    pub format: String,
    pub visualization_ids: Vec<String>,
    pub layout: Vec<ExportLayoutItem>,
}

/// A file ready to be streamed to a client.
#[derive(Debug, Clone)]
pub struct DownloadFile {
    pub path: PathBuf,
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
}

/// Outcome of a reconciliation sweep.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Orphan artifact files that were removed.
    pub removed_files: Vec<String>,
    /// Exports whose artifact file no longer exists.
    pub missing_artifacts: Vec<String>,
}

#[derive(Clone)]
pub struct ExportService {
    exports: Arc<dyn ExportRepository>,
    visualizations: Arc<dyn VisualizationRepository>,
    sources: Arc<dyn DataSourceRepository>,
    renderer: ExportRenderer,
    download_prefix: String,
}

impl ExportService {
    pub fn new(
        exports: Arc<dyn ExportRepository>,
        visualizations: Arc<dyn VisualizationRepository>,
        sources: Arc<dyn DataSourceRepository>,
        renderer: ExportRenderer,
    ) -> Self {
        Self {
            exports,
            visualizations,
            sources,
            renderer,
            download_prefix: "/api/v1/exports/download".to_string(),
        }
    }

    pub fn with_download_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.download_prefix = prefix.into().trim_end_matches('/').to_string();
        self
    }

    pub fn export_dir(&self) -> &Path {
        self.renderer.export_dir()
    }

    // -------------------------------------------------------------------------
    // Create
    // -------------------------------------------------------------------------

    pub async fn create(&self, owner_id: &str, request: ExportRequest) -> AppResult<Export> {
        let format: ExportFormat = request.format.parse().map_err(AppError::Validation)?;

        let mut seen = HashSet::new();
        let ids: Vec<String> = request
            .visualization_ids
            .iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty() && seen.insert(id.clone()))
            .collect();
        if ids.is_empty() {
            return Err(AppError::validation("At least one visualization is required"));
        }

        let mut visualizations = Vec::with_capacity(ids.len());
        for id in &ids {
            visualizations.push(self.accessible_visualization(owner_id, id).await?);
        }

        let layout = reconcile_layout(&ids, request.layout)?;

        let mut snapshots = Vec::with_capacity(visualizations.len());
        for visualization in &visualizations {
            snapshots.push(self.snapshot(visualization).await?);
        }

        let title = request.title.trim().to_string();
        log_info(format!(
            "Exporting '{}' as {} ({} visualization(s))",
            if title.is_empty() { "export" } else { title.as_str() },
            format.extension(),
            snapshots.len()
        ));

        let artifact = self
            .renderer
            .render(RenderJob {
                title: &title,
                description: &request.description,
                format,
                snapshots: &snapshots,
                layout: &layout,
            })
            .await
            .map_err(|e| {
                log_error(format!("Export render failed: {}", e));
                e
            })?;

        let export = Export {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            title,
            description: request.description,
            format,
            visualizations: snapshots,
            layout,
            download_link: format!("{}/{}", self.download_prefix, artifact.file_name),
            artifact_path: artifact.path.clone(),
            file_name: artifact.file_name,
            created_at: Utc::now(),
        };

        match self.exports.insert(export).await {
            Ok(export) => {
                log_success(format!("Export ready: {}", export.download_link));
                Ok(export)
            }
            Err(e) => {
                if let Err(cleanup) = remove_file_if_present(&artifact.path).await {
                    log_warning(format!(
                        "Could not remove artifact {}: {}",
                        artifact.path.display(),
                        cleanup
                    ));
                }
                Err(e.into())
            }
        }
    }

    async fn accessible_visualization(&self, user_id: &str, id: &str) -> AppResult<Visualization> {
        let visualization = self
            .visualizations
            .get(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Visualization '{}' not found", id)))?;
        if !visualization.is_accessible_by(user_id) {
            return Err(AppError::unauthorized(format!("No access to visualization '{}'", id)));
        }
        Ok(visualization)
    }

    /// Copy the visualization and its bound rows. A DataSource deleted since
    /// binding yields an empty snapshot.
    async fn snapshot(&self, visualization: &Visualization) -> AppResult<VisualizationSnapshot> {
        match self.sources.get(&visualization.datasource_id).await? {
            Some(source) => Ok(VisualizationSnapshot::capture(visualization, &source.rows)),
            None => {
                log_warning(format!(
                    "Data source '{}' of visualization '{}' no longer exists; exporting it empty",
                    visualization.datasource_id, visualization.title
                ));
                Ok(VisualizationSnapshot::capture(visualization, &[]))
            }
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub async fn get(&self, owner_id: &str, id: &str) -> AppResult<Export> {
        let export = self
            .exports
            .get(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Export '{}' not found", id)))?;
        if export.owner_id != owner_id {
            return Err(AppError::unauthorized(format!("Export '{}' belongs to another user", id)));
        }
        Ok(export)
    }

    /// Newest first.
    pub async fn list(&self, owner_id: &str) -> AppResult<Vec<Export>> {
        Ok(self.exports.list_by_owner(owner_id).await?)
    }

    // -------------------------------------------------------------------------
    // Delete / download
    // -------------------------------------------------------------------------

    /// Remove the artifact (tolerating its absence), then the record.
    pub async fn delete(&self, owner_id: &str, id: &str) -> AppResult<Export> {
        let export = self.get(owner_id, id).await?;
        if !remove_file_if_present(&export.artifact_path).await? {
            log_info_indent(format!("Artifact {} was already gone", export.file_name), 1);
        }
        self.exports.remove(id).await?;
        log_info(format!("Deleted export '{}'", export.title));
        Ok(export)
    }

    /// Resolve an artifact by file name under the export root.
    pub async fn download(&self, file_name: &str) -> AppResult<DownloadFile> {
        if file_name.is_empty()
            || file_name.contains('/')
            || file_name.contains('\\')
            || file_name.contains("..")
        {
            return Err(AppError::validation(format!("Invalid file name '{}'", file_name)));
        }

        let path = self.export_dir().join(file_name);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(AppError::not_found(format!("File '{}' not found", file_name))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::not_found(format!("File '{}' not found", file_name)))
            }
            Err(e) => return Err(e.into()),
        };

        let content_type = mime_guess::from_path(&path).first_or_octet_stream().to_string();
        Ok(DownloadFile {
            path,
            file_name: file_name.to_string(),
            content_type,
            size: metadata.len(),
        })
    }

    // -------------------------------------------------------------------------
    // Reconciliation
    // -------------------------------------------------------------------------

    /// Remove unreferenced artifact files older than `min_age` and report
    /// records whose artifact is missing.
    pub async fn sweep(&self, min_age: Duration) -> AppResult<SweepReport> {
        let records = self.exports.list_all().await?;
        let referenced: HashSet<&str> = records.iter().map(|e| e.file_name.as_str()).collect();
        let mut report = SweepReport::default();

        for export in &records {
            if !tokio::fs::try_exists(&export.artifact_path).await.unwrap_or(false) {
                log_warning(format!("Export '{}' has no artifact at {}", export.id, export.artifact_path.display()));
                report.missing_artifacts.push(export.id.clone());
            }
        }

        let mut entries = match tokio::fs::read_dir(self.export_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
            Err(e) => return Err(e.into()),
        };

        let now = SystemTime::now();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if referenced.contains(name.as_str()) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let age = metadata
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age < min_age {
                continue;
            }
            if remove_file_if_present(&entry.path()).await? {
                report.removed_files.push(name);
            }
        }

        report.removed_files.sort();
        if !report.removed_files.is_empty() {
            log_info(format!("Removed {} orphan artifact(s)", report.removed_files.len()));
        }
        Ok(report)
    }
}

/// Final layout for `ids`: composed when empty, otherwise validated and
/// completed with default-size items for visualizations it does not place.
pub fn reconcile_layout(ids: &[String], requested: Vec<ExportLayoutItem>) -> AppResult<Vec<ExportLayoutItem>> {
    if requested.is_empty() {
        return Ok(layout::compose(ids.iter().cloned(), DEFAULT_ITEM_WIDTH, DEFAULT_ITEM_HEIGHT)?);
    }

    if let Some(unknown) = requested.iter().find(|i| !ids.contains(&i.visualization_id)) {
        return Err(LayoutError::UnknownVisualization(unknown.visualization_id.clone()).into());
    }
    layout::validate(&requested)?;

    let mut layout = requested;
    for id in ids {
        if !layout.iter().any(|i| &i.visualization_id == id) {
            layout::append(&mut layout, id.clone(), DEFAULT_ITEM_WIDTH, DEFAULT_ITEM_HEIGHT)?;
        }
    }
    Ok(layout)
}

/// Returns whether a file was removed.
async fn remove_file_if_present(path: &Path) -> AppResult<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, RenderError, StoreError, StoreResult};
    use crate::models::{ChartType, DataSource, DataSourceStatus, Row, SourceDetails, SourceKind};
    use crate::render::mock::{Behavior, MockEngine};
    use crate::store::JsonStore;
    use serde_json::json;
    use std::collections::BTreeSet;

    struct Fixture {
        dir: tempfile::TempDir,
        sources: Arc<JsonStore<DataSource>>,
        exports: Arc<JsonStore<Export>>,
        visualizations: Arc<JsonStore<Visualization>>,
        engine: MockEngine,
        service: ExportService,
    }

    fn rows(value: serde_json::Value) -> Vec<Row> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().cloned().unwrap())
            .collect()
    }

    async fn fixture(behavior: Behavior) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let sources = Arc::new(JsonStore::<DataSource>::in_memory());
        let visualizations = Arc::new(JsonStore::<Visualization>::in_memory());
        let exports = Arc::new(JsonStore::<Export>::in_memory());

        for (n, data) in [(1, json!([{ "a": 1 }])), (2, json!([{ "a": 2 }]))] {
            sources
                .insert(DataSource {
                    id: format!("ds{}", n),
                    owner_id: "owner".into(),
                    name: format!("source {}", n),
                    source_kind: SourceKind::Api,
                    source_details: SourceDetails::Url { url: "http://example.com".into() },
                    fields: vec!["a".into()],
                    rows: rows(data),
                    status: DataSourceStatus::Processed,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
            let now = Utc::now();
            visualizations
                .insert(Visualization {
                    id: format!("v{}", n),
                    owner_id: "owner".into(),
                    title: format!("Chart {}", n),
                    description: String::new(),
                    chart_type: ChartType::Bar,
                    x_field: "a".into(),
                    y_field: "a".into(),
                    config: json!({}),
                    datasource_id: format!("ds{}", n),
                    collaborator_ids: BTreeSet::from(["friend".to_string()]),
                    created_at: now,
                    updated_at: now,
                })
                .await
                .unwrap();
        }

        let engine = MockEngine::new(behavior);
        let renderer = ExportRenderer::new(dir.path().join("exports"), Arc::new(engine.clone()), Duration::from_secs(30));
        let service = ExportService::new(exports.clone(), visualizations.clone(), sources.clone(), renderer);
        Fixture {
            dir,
            sources,
            exports,
            visualizations,
            engine,
            service,
        }
    }

    /// Export store whose inserts always fail. With `lock_artifact` the
    /// artifact is swapped for a non-empty directory first, so removing it
    /// fails too.
    struct RejectingExports {
        lock_artifact: bool,
    }

    #[async_trait::async_trait]
    impl ExportRepository for RejectingExports {
        async fn insert(&self, export: Export) -> StoreResult<Export> {
            if self.lock_artifact {
                std::fs::remove_file(&export.artifact_path).unwrap();
                std::fs::create_dir(&export.artifact_path).unwrap();
                std::fs::write(export.artifact_path.join("keep"), "x").unwrap();
            }
            Err(StoreError::Io(std::io::Error::other("disk full")))
        }
        async fn get(&self, _id: &str) -> StoreResult<Option<Export>> {
            Ok(None)
        }
        async fn list_by_owner(&self, _owner_id: &str) -> StoreResult<Vec<Export>> {
            Ok(Vec::new())
        }
        async fn list_all(&self) -> StoreResult<Vec<Export>> {
            Ok(Vec::new())
        }
        async fn remove(&self, _id: &str) -> StoreResult<bool> {
            Ok(false)
        }
    }

    fn rejecting_service(f: &Fixture, lock_artifact: bool) -> ExportService {
        let renderer = ExportRenderer::new(
            f.dir.path().join("exports"),
            Arc::new(f.engine.clone()),
            Duration::from_secs(30),
        );
        ExportService::new(
            Arc::new(RejectingExports { lock_artifact }),
            f.visualizations.clone(),
            f.sources.clone(),
            renderer,
        )
    }

    fn request(format: &str, ids: &[&str]) -> ExportRequest {
        ExportRequest {
            title: "Team report".into(),
            format: format.into(),
            visualization_ids: ids.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_csv_export_merges_rows() {
        let f = fixture(Behavior::Completes(0)).await;
        let export = f.service.create("owner", request("csv", &["v1", "v2"])).await.unwrap();

        let content = std::fs::read_to_string(&export.artifact_path).unwrap();
        assert_eq!(content.lines().collect::<Vec<_>>(), vec!["a", "1", "2"]);
        assert!(export.file_name.ends_with("_Team_report.csv"));
        assert_eq!(export.download_link, format!("/api/v1/exports/download/{}", export.file_name));
        assert_eq!(f.engine.launched.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_snapshots_are_copies() {
        let f = fixture(Behavior::Completes(0)).await;
        let export = f.service.create("owner", request("json", &["v1"])).await.unwrap();

        let mut viz = VisualizationRepository::get(f.visualizations.as_ref(), "v1").await.unwrap().unwrap();
        viz.title = "Renamed".into();
        f.visualizations.update(viz).await.unwrap();

        let stored = f.service.get("owner", &export.id).await.unwrap();
        assert_eq!(stored.visualizations[0].title, "Chart 1");
        assert_eq!(stored.visualizations[0].data, rows(json!([{ "a": 1 }])));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_render_persists_nothing() {
        let f = fixture(Behavior::Hangs).await;
        let err = f.service.create("owner", request("pdf", &["v1"])).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Render);
        assert!(matches!(err, AppError::Render(RenderError::Timeout { .. })));
        assert_eq!(f.engine.active(), 0);
        assert!(f.exports.is_empty().await);
        let leftover = std::fs::read_dir(f.service.export_dir()).map(|d| d.count()).unwrap_or(0);
        assert_eq!(leftover, 0);
    }

    #[tokio::test]
    async fn test_png_export_composes_layout() {
        let f = fixture(Behavior::Completes(1)).await;
        let export = f.service.create("owner", request("png", &["v1", "v2", "v1"])).await.unwrap();

        assert_eq!(export.visualizations.len(), 2);
        let positions: Vec<(u32, u32)> = export.layout.iter().map(|i| (i.x, i.y)).collect();
        assert_eq!(positions, vec![(0, 0), (4, 0)]);
        assert!(export.artifact_path.exists());
        assert_eq!(f.engine.active(), 0);
    }

    #[tokio::test]
    async fn test_access_rules() {
        let f = fixture(Behavior::Completes(0)).await;

        let err = f.service.create("stranger", request("json", &["v1"])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        let err = f.service.create("owner", request("json", &["v1", "missing"])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = f.service.create("owner", request("gif", &["v1"])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        assert!(f.service.create("friend", request("json", &["v1"])).await.is_ok());
        assert!(f.exports.list_by_owner("owner").await.unwrap().is_empty());
    }

    #[test]
    fn test_reconcile_layout() {
        let ids = vec!["v1".to_string(), "v2".to_string()];
        let item = |id: &str, x, y| ExportLayoutItem {
            visualization_id: id.into(),
            x,
            y,
            w: 6,
            h: 4,
        };

        let overlapping = vec![item("v1", 0, 0), item("v2", 3, 2)];
        assert!(matches!(
            reconcile_layout(&ids, overlapping),
            Err(AppError::Layout(LayoutError::Overlap { .. }))
        ));

        let unknown = vec![item("v9", 0, 0)];
        let err = reconcile_layout(&ids, unknown).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut tall = item("v1", 0, 0);
        tall.h = 2_000_000;
        assert!(matches!(
            reconcile_layout(&ids, vec![tall]),
            Err(AppError::Layout(LayoutError::InvalidSize { .. }))
        ));

        let partial = reconcile_layout(&ids, vec![item("v1", 0, 0)]).unwrap();
        assert_eq!(partial.len(), 2);
        assert_eq!((partial[1].x, partial[1].y), (8, 0));
        assert!(layout::validate(&partial).is_ok());
    }

    #[tokio::test]
    async fn test_failed_persist_removes_artifact() {
        let f = fixture(Behavior::Completes(0)).await;
        let service = rejecting_service(&f, false);

        let err = service.create("owner", request("json", &["v1"])).await.unwrap_err();
        assert!(matches!(err, AppError::Store(StoreError::Io(_))), "{:?}", err);
        let leftovers = std::fs::read_dir(f.dir.path().join("exports")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_failed_cleanup_keeps_persist_error() {
        let f = fixture(Behavior::Completes(0)).await;
        let service = rejecting_service(&f, true);

        let err = service.create("owner", request("json", &["v1"])).await.unwrap_err();
        assert!(matches!(err, AppError::Store(StoreError::Io(_))), "{:?}", err);
        assert!(err.to_string().contains("disk full"));
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_artifact() {
        let f = fixture(Behavior::Completes(0)).await;
        let first = f.service.create("owner", request("json", &["v1"])).await.unwrap();
        let second = f.service.create("owner", request("json", &["v2"])).await.unwrap();

        let err = f.service.delete("stranger", &first.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        f.service.delete("owner", &first.id).await.unwrap();
        assert!(!first.artifact_path.exists());

        std::fs::remove_file(&second.artifact_path).unwrap();
        f.service.delete("owner", &second.id).await.unwrap();
        assert!(f.exports.is_empty().await);
    }

    #[tokio::test]
    async fn test_download() {
        let f = fixture(Behavior::Completes(0)).await;
        let export = f.service.create("owner", request("csv", &["v1"])).await.unwrap();

        let file = f.service.download(&export.file_name).await.unwrap();
        assert_eq!(file.content_type, "text/csv");
        assert_eq!(file.size, std::fs::metadata(&export.artifact_path).unwrap().len());

        let err = f.service.download("../secrets.txt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = f.service.download("nope.pdf").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_sweep_removes_orphans_and_reports_missing() {
        let f = fixture(Behavior::Completes(0)).await;
        let kept = f.service.create("owner", request("json", &["v1"])).await.unwrap();
        let lost = f.service.create("owner", request("json", &["v2"])).await.unwrap();
        std::fs::remove_file(&lost.artifact_path).unwrap();
        std::fs::write(f.service.export_dir().join("orphan.png"), b"x").unwrap();

        let report = f.service.sweep(Duration::ZERO).await.unwrap();
        assert_eq!(report.removed_files, vec!["orphan.png"]);
        assert_eq!(report.missing_artifacts, vec![lost.id.clone()]);
        assert!(kept.artifact_path.exists());

        std::fs::write(f.service.export_dir().join("fresh.png"), b"x").unwrap();
        let report = f.service.sweep(Duration::from_secs(3600)).await.unwrap();
        assert!(report.removed_files.is_empty());
        assert!(f.dir.path().join("exports").join("fresh.png").exists());
    }
}
