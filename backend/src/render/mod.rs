//! Export renderer.
//!
//! Two paths keyed by format:
//!
//! - `png` / `pdf`: compose an HTML document ([`document`]), load it in an
//!   off-screen engine, wait for the in-page completion barrier, capture.
//! - `csv` / `json`: merge snapshot rows and serialize in process ([`data`]).
//!
//! The engine sits behind [`RenderEngine`] / [`RenderSession`]. A session is
//! always closed, whether rendering succeeded, failed or timed out. The render
//! timeout is one deadline covering launch, load, barrier and capture. Both
//! paths only return once a file exists at the artifact path.

pub mod data;
pub mod document;

#[cfg(feature = "browser")]
pub mod chromium;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::api::logs::{log_info_indent, log_warning};
use crate::config::CsvQuoting;
use crate::error::{RenderError, RenderResult};
use crate::models::{ExportFormat, ExportLayoutItem, VisualizationSnapshot};

/// Interval between completion barrier polls.
const BARRIER_POLL: Duration = Duration::from_millis(100);

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

// =============================================================================
// Engine abstraction
// =============================================================================

/// State of the in-page completion barrier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BarrierState {
    Pending,
    Done,
    Failed(String),
}

/// Starts off-screen rendering sessions.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Acquire a fresh session (one browser process per export).
    async fn launch(&self) -> RenderResult<Box<dyn RenderSession>>;
}

/// One acquired engine instance.
#[async_trait]
pub trait RenderSession: Send {
    /// Load a complete HTML document.
    async fn load(&mut self, html: &str) -> RenderResult<()>;

    /// Probe the completion barrier.
    async fn barrier(&mut self) -> RenderResult<BarrierState>;

    /// Capture the loaded document to `path` as `format`.
    async fn capture(&mut self, format: ExportFormat, path: &Path) -> RenderResult<()>;

    /// Release every resource held by the session.
    async fn close(self: Box<Self>) -> RenderResult<()>;
}

/// Engine used when no browser is available.
#[derive(Debug, Clone)]
pub struct DisabledEngine {
    reason: String,
}

impl DisabledEngine {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[async_trait]
impl RenderEngine for DisabledEngine {
    async fn launch(&self) -> RenderResult<Box<dyn RenderSession>> {
        Err(RenderError::Unavailable(self.reason.clone()))
    }
}

/// Default engine for this build.
#[cfg(feature = "browser")]
pub fn default_engine(chrome_path: Option<PathBuf>) -> Arc<dyn RenderEngine> {
    Arc::new(chromium::ChromiumEngine::new(chrome_path))
}

/// Default engine for this build.
#[cfg(not(feature = "browser"))]
pub fn default_engine(_chrome_path: Option<PathBuf>) -> Arc<dyn RenderEngine> {
    Arc::new(DisabledEngine::new(
        "built without the `browser` feature; png and pdf exports are disabled",
    ))
}

// =============================================================================
// Renderer
// =============================================================================

/// Everything needed to produce one artifact.
#[derive(Debug, Clone, Copy)]
pub struct RenderJob<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub format: ExportFormat,
    pub snapshots: &'a [VisualizationSnapshot],
    pub layout: &'a [ExportLayoutItem],
}

/// A produced file under the export root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub file_name: String,
}

/// `{uuid}_{title}.{ext}` with whitespace runs turned into `_`.
pub fn artifact_file_name(title: &str, format: ExportFormat) -> String {
    let slug = WHITESPACE
        .replace_all(title.trim(), "_")
        .replace(['/', '\\'], "_");
    let slug = if slug.is_empty() { "export".to_string() } else { slug };
    format!("{}_{}.{}", Uuid::new_v4(), slug, format.extension())
}

#[derive(Clone)]
pub struct ExportRenderer {
    export_dir: PathBuf,
    engine: Arc<dyn RenderEngine>,
    render_timeout: Duration,
    csv_quoting: CsvQuoting,
}

impl ExportRenderer {
    pub fn new(export_dir: impl Into<PathBuf>, engine: Arc<dyn RenderEngine>, render_timeout: Duration) -> Self {
        Self {
            export_dir: export_dir.into(),
            engine,
            render_timeout,
            csv_quoting: CsvQuoting::default(),
        }
    }

    pub fn with_csv_quoting(mut self, quoting: CsvQuoting) -> Self {
        self.csv_quoting = quoting;
        self
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    /// Produce the artifact for `job`.
    pub async fn render(&self, job: RenderJob<'_>) -> RenderResult<Artifact> {
        tokio::fs::create_dir_all(&self.export_dir).await?;
        let file_name = artifact_file_name(job.title, job.format);
        let path = self.export_dir.join(&file_name);

        let result = if job.format.is_document() {
            self.render_document(&job, &path).await
        } else {
            self.write_data(&job, &path).await
        };

        if let Err(e) = result {
            remove_partial(&path).await;
            return Err(e);
        }

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(RenderError::MissingArtifact(path.display().to_string()));
        }

        Ok(Artifact { path, file_name })
    }

    async fn write_data(&self, job: &RenderJob<'_>, path: &Path) -> RenderResult<()> {
        let rows = data::merge_rows(job.snapshots);
        let content = match job.format {
            ExportFormat::Csv => data::to_csv(&rows, self.csv_quoting)?,
            _ => data::to_json(&rows)?,
        };
        tokio::fs::write(path, content).await?;
        log_info_indent(format!("Wrote {} rows as {}", rows.len(), job.format.extension()), 1);
        Ok(())
    }

    async fn render_document(&self, job: &RenderJob<'_>, path: &Path) -> RenderResult<()> {
        let html = document::compose_document(job.title, job.description, job.snapshots, job.layout)?;

        let deadline = Instant::now() + self.render_timeout;
        let mut session = self.within(deadline, self.engine.launch()).await?;
        log_info_indent("Render engine started", 1);

        let outcome = self.drive(&mut *session, &html, job, path, deadline).await;

        // Released on every path. Close failures are logged, never returned.
        let closed = session.close().await;
        match (outcome, closed) {
            (Err(e), Err(close_err)) => {
                log_warning(format!("Render engine did not close cleanly: {}", close_err));
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(()), Err(close_err)) => {
                log_warning(format!("Render engine did not close cleanly: {}", close_err));
                Ok(())
            }
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    async fn drive(
        &self,
        session: &mut dyn RenderSession,
        html: &str,
        job: &RenderJob<'_>,
        path: &Path,
        deadline: Instant,
    ) -> RenderResult<()> {
        let charts = job.snapshots.len();
        self.within(deadline, wait_until_drawn(&mut *session, html)).await?;
        log_info_indent(format!("{} chart(s) drawn", charts), 1);

        self.within(deadline, session.capture(job.format, path)).await
    }

    async fn within<T>(&self, deadline: Instant, step: impl Future<Output = RenderResult<T>>) -> RenderResult<T> {
        tokio::time::timeout_at(deadline, step)
            .await
            .unwrap_or(Err(RenderError::Timeout {
                secs: self.render_timeout.as_secs(),
            }))
    }
}

/// Load the document and poll the completion barrier until it settles.
async fn wait_until_drawn(session: &mut dyn RenderSession, html: &str) -> RenderResult<()> {
    session.load(html).await?;
    loop {
        match session.barrier().await? {
            BarrierState::Done => return Ok(()),
            BarrierState::Failed(msg) => return Err(RenderError::Script(msg)),
            BarrierState::Pending => tokio::time::sleep(BARRIER_POLL).await,
        }
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "removed partial artifact"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove partial artifact"),
    }
}


#[cfg(test)]
mod tests {
    use super::mock::{Behavior, MockEngine};
    use super::*;
    use crate::models::ChartType;
    use serde_json::json;

    fn snapshots() -> Vec<VisualizationSnapshot> {
        vec![VisualizationSnapshot {
            visualization_id: "v1".into(),
            chart_type: ChartType::Bar,
            title: "Sales".into(),
            description: String::new(),
            x_field: "Region".into(),
            y_field: "Amount".into(),
            config: json!({}),
            data: vec![json!({ "Region": "East", "Amount": 100 }).as_object().cloned().unwrap()],
        }]
    }

    fn job<'a>(format: ExportFormat, snaps: &'a [VisualizationSnapshot]) -> RenderJob<'a> {
        RenderJob {
            title: "Quarterly  report",
            description: "",
            format,
            snapshots: snaps,
            layout: &[],
        }
    }

    fn renderer(dir: &Path, engine: MockEngine, timeout: Duration) -> ExportRenderer {
        ExportRenderer::new(dir, Arc::new(engine), timeout)
    }

    fn files(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    fn test_artifact_file_name() {
        let name = artifact_file_name("Quarterly  sales report", ExportFormat::Pdf);
        assert!(name.ends_with("_Quarterly_sales_report.pdf"), "{}", name);
        assert_eq!(name.len(), 36 + "_Quarterly_sales_report.pdf".len());

        assert!(artifact_file_name("   ", ExportFormat::Csv).ends_with("_export.csv"));
        assert!(artifact_file_name("a/b", ExportFormat::Json).ends_with("_a_b.json"));
    }

    #[tokio::test]
    async fn test_pdf_render_closes_session() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockEngine::new(Behavior::Completes(2));
        let r = renderer(dir.path(), engine.clone(), Duration::from_secs(5));

        let snaps = snapshots();
        let artifact = r.render(job(ExportFormat::Pdf, &snaps)).await.unwrap();
        assert!(artifact.path.exists());
        assert!(artifact.file_name.ends_with("_Quarterly_report.pdf"));
        assert_eq!(engine.active(), 0);

        let html = engine.loaded_html.lock().unwrap().clone().unwrap();
        assert!(html.contains("chart-0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_barrier_times_out_and_releases_engine() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockEngine::new(Behavior::Hangs);
        let r = renderer(dir.path(), engine.clone(), Duration::from_secs(30));

        let snaps = snapshots();
        let err = r.render(job(ExportFormat::Pdf, &snaps)).await.unwrap_err();
        assert!(matches!(err, RenderError::Timeout { secs: 30 }), "{:?}", err);
        assert_eq!(engine.launched.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(engine.active(), 0);
        assert_eq!(files(dir.path()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_launch_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockEngine::new(Behavior::LaunchHangs);
        let r = renderer(dir.path(), engine.clone(), Duration::from_secs(30));

        let snaps = snapshots();
        let err = r.render(job(ExportFormat::Png, &snaps)).await.unwrap_err();
        assert!(matches!(err, RenderError::Timeout { secs: 30 }), "{:?}", err);
        assert_eq!(engine.launched.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(engine.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_capture_times_out_and_releases_engine() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockEngine::new(Behavior::CaptureHangs);
        let r = renderer(dir.path(), engine.clone(), Duration::from_secs(30));

        let snaps = snapshots();
        let err = r.render(job(ExportFormat::Pdf, &snaps)).await.unwrap_err();
        assert!(matches!(err, RenderError::Timeout { secs: 30 }), "{:?}", err);
        assert_eq!(engine.launched.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(engine.active(), 0);
        assert_eq!(files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_script_failure_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockEngine::new(Behavior::ScriptFails);
        let r = renderer(dir.path(), engine.clone(), Duration::from_secs(30));

        let snaps = snapshots();
        let err = r.render(job(ExportFormat::Png, &snaps)).await.unwrap_err();
        assert!(matches!(err, RenderError::Script(_)));
        assert_eq!(engine.active(), 0);
    }

    #[tokio::test]
    async fn test_missing_capture_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockEngine::new(Behavior::SkipsCapture);
        let r = renderer(dir.path(), engine.clone(), Duration::from_secs(5));

        let snaps = snapshots();
        let err = r.render(job(ExportFormat::Png, &snaps)).await.unwrap_err();
        assert!(matches!(err, RenderError::MissingArtifact(_)));
        assert_eq!(engine.active(), 0);
    }

    #[tokio::test]
    async fn test_data_exports_skip_engine() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockEngine::new(Behavior::LaunchFails);
        let r = renderer(dir.path(), engine.clone(), Duration::from_secs(5));

        let snaps = snapshots();
        let artifact = r.render(job(ExportFormat::Json, &snaps)).await.unwrap();
        let content = std::fs::read_to_string(&artifact.path).unwrap();
        assert!(content.contains("\"Region\": \"East\""));

        let err = r.render(job(ExportFormat::Png, &snaps)).await.unwrap_err();
        assert!(matches!(err, RenderError::Launch(_)));
        assert_eq!(engine.launched.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disabled_engine() {
        let err = DisabledEngine::new("off").launch().await.err().unwrap();
        assert!(matches!(err, RenderError::Unavailable(_)));
    }
}
