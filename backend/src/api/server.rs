//! HTTP server for the chartforge API.
//!
//! Caller identity comes from the upstream auth layer as the `x-user-id`
//! header (see [`Owner`]).
//!
//! # API Endpoints
//!
//! | Method     | Path                                      | Description                       |
//! |------------|-------------------------------------------|-----------------------------------|
//! | GET        | `/health`                                 | Health check                      |
//! | GET        | `/api/logs`                               | SSE stream of pipeline events     |
//! | POST       | `/api/v1/data/upload-file`                | Multipart CSV/spreadsheet upload  |
//! | POST       | `/api/v1/data/upload-api`                 | Ingest a remote JSON endpoint     |
//! | POST       | `/api/v1/data/upload-text`                | Ingest free text                  |
//! | GET        | `/api/v1/data/data-sources`               | Caller's data sources             |
//! | GET/DELETE | `/api/v1/data/data-sources/{id}`          | One data source                   |
//! | GET        | `/api/v1/data/{id}/schema`                | Fields and sample rows            |
//! | POST/GET   | `/api/v1/visualizations`                  | Create / list visualizations      |
//! | GET        | `/api/v1/visualizations/shared-with-me`   | Visualizations shared with caller |
//! | GET/PUT/DELETE | `/api/v1/visualizations/{id}`         | One visualization                 |
//! | POST       | `/api/v1/visualizations/{id}/invite`      | Add a collaborator                |
//! | POST       | `/api/v1/exports/save`                    | Render and store an export        |
//! | GET        | `/api/v1/exports/list`                    | Caller's exports                  |
//! | GET/DELETE | `/api/v1/exports/{id}`                    | One export                        |
//! | GET        | `/api/v1/exports/download/{fileName}`     | Stream an artifact                |
//! | POST       | `/api/v1/exports/layout/place`            | Next free grid position           |

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderName, Method},
    response::{sse::Event, IntoResponse, Json, Response, Sse},
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tokio_util::io::ReaderStream;
use tower_http::cors::CorsLayer;

use super::logs::LOG_BROADCASTER;
use super::types::{
    ApiResponse, ExportView, InviteRequest, Owner, PlaceRequest, Position, UploadApiRequest, UploadTextRequest,
    USER_ID_HEADER,
};
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::exports::{ExportRequest, ExportService, SweepReport};
use crate::ingest::{IngestService, SchemaView};
use crate::layout::{self, DEFAULT_ITEM_HEIGHT, DEFAULT_ITEM_WIDTH};
use crate::models::{DataSource, Export, Visualization};
use crate::render::{default_engine, ExportRenderer};
use crate::sources::api::build_client;
use crate::store::JsonStore;
use crate::visualization::{NewVisualization, VisualizationPatch, VisualizationService};

/// Room for multipart framing and the `name` field on top of the file cap.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Orphan artifacts younger than this survive the startup sweep.
const STARTUP_SWEEP_MIN_AGE: Duration = Duration::from_secs(60 * 60);

/// Services shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub ingest: Arc<IngestService>,
    pub visualizations: Arc<VisualizationService>,
    pub exports: Arc<ExportService>,
}

impl AppState {
    pub fn new(ingest: IngestService, visualizations: VisualizationService, exports: ExportService) -> Self {
        Self {
            ingest: Arc::new(ingest),
            visualizations: Arc::new(visualizations),
            exports: Arc::new(exports),
        }
    }

    /// Open the record stores and wire the services from configuration.
    pub async fn from_config(config: &AppConfig) -> AppResult<Self> {
        let sources = Arc::new(JsonStore::<DataSource>::open(config.datasource_dir()).await?);
        let visualizations = Arc::new(JsonStore::<Visualization>::open(config.visualization_dir()).await?);
        let exports = Arc::new(JsonStore::<Export>::open(config.export_record_dir()).await?);

        let client = build_client(config.fetch_timeout)?;
        let renderer = ExportRenderer::new(
            &config.export_dir,
            default_engine(config.chrome_path.clone()),
            config.render_timeout,
        )
        .with_csv_quoting(config.csv_quoting);

        let ingest = IngestService::new(sources.clone(), &config.upload_dir, client)
            .with_max_upload_bytes(config.max_upload_bytes);
        let binder = VisualizationService::new(visualizations.clone(), sources.clone());
        let store = ExportService::new(exports, visualizations, sources, renderer)
            .with_download_prefix(config.download_prefix.clone());

        Ok(Self::new(ingest, binder, store))
    }
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let upload_limit = state.ingest.max_upload_bytes().saturating_add(MULTIPART_OVERHEAD);

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(USER_ID_HEADER),
        ])
        .expose_headers([header::CONTENT_TYPE, header::CONTENT_DISPOSITION]);

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/logs", get(sse_logs))
        // Data sources
        .route(
            "/api/v1/data/upload-file",
            post(upload_file).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/v1/data/upload-api", post(upload_api))
        .route("/api/v1/data/upload-text", post(upload_text))
        .route("/api/v1/data/data-sources", get(list_sources))
        .route("/api/v1/data/data-sources/{id}", get(get_source).delete(delete_source))
        .route("/api/v1/data/{id}/schema", get(source_schema))
        // Visualizations
        .route("/api/v1/visualizations", post(create_visualization).get(list_visualizations))
        .route("/api/v1/visualizations/shared-with-me", get(shared_visualizations))
        .route(
            "/api/v1/visualizations/{id}",
            get(get_visualization).put(update_visualization).delete(delete_visualization),
        )
        .route("/api/v1/visualizations/{id}/invite", post(invite_collaborator))
        // Exports
        .route("/api/v1/exports/save", post(save_export))
        .route("/api/v1/exports/list", get(list_exports))
        .route("/api/v1/exports/layout/place", post(place_item))
        .route("/api/v1/exports/download/{file_name}", get(download_export))
        .route("/api/v1/exports/{id}", get(get_export).delete(delete_export))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let state = AppState::from_config(&config).await?;

    match state.exports.sweep(STARTUP_SWEEP_MIN_AGE).await {
        Ok(report) => log_sweep(&report),
        Err(e) => tracing::warn!(error = %e, "startup sweep failed"),
    }

    let app = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, exports = %config.export_dir.display(), "chartforge server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn log_sweep(report: &SweepReport) {
    tracing::info!(
        removed = report.removed_files.len(),
        missing = report.missing_artifacts.len(),
        "startup sweep finished"
    );
}

/// Health check endpoint
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "chartforge",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// SSE endpoint for real-time log streaming
async fn sse_logs() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = LOG_BROADCASTER.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(entry) => {
            let json = serde_json::to_string(&entry).ok()?;
            Some(Ok(Event::default().data(json)))
        }
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

// =============================================================================
// Data sources
// =============================================================================

async fn upload_file(
    State(state): State<AppState>,
    owner: Owner,
    mut multipart: Multipart,
) -> AppResult<ApiResponse<DataSource>> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut name = String::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::validation(format!("Multipart error: {}", e)))?
    {
        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::validation(format!("Read error: {}", e)))?;
                file = Some((file_name, bytes.to_vec()));
            }
            "name" => {
                name = field
                    .text()
                    .await
                    .map_err(|e| AppError::validation(format!("Read error: {}", e)))?;
            }
            _ => {}
        }
    }

    let (file_name, bytes) = file.ok_or_else(|| AppError::validation("No file provided"))?;
    let source = state.ingest.ingest_file(owner.id(), &name, &file_name, &bytes).await?;
    Ok(ApiResponse::created(source, "Data source created"))
}

async fn upload_api(
    State(state): State<AppState>,
    owner: Owner,
    Json(body): Json<UploadApiRequest>,
) -> AppResult<ApiResponse<DataSource>> {
    let source = state.ingest.ingest_api(owner.id(), &body.name, &body.api_url).await?;
    Ok(ApiResponse::created(source, "Data source created"))
}

async fn upload_text(
    State(state): State<AppState>,
    owner: Owner,
    Json(body): Json<UploadTextRequest>,
) -> AppResult<ApiResponse<DataSource>> {
    let source = state.ingest.ingest_text(owner.id(), &body.name, &body.text).await?;
    Ok(ApiResponse::created(source, "Data source created"))
}

async fn list_sources(State(state): State<AppState>, owner: Owner) -> AppResult<ApiResponse<Vec<DataSource>>> {
    let sources = state.ingest.list(owner.id()).await?;
    Ok(ApiResponse::ok(sources, "Data sources retrieved"))
}

async fn get_source(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<DataSource>> {
    let source = state.ingest.get_owned(owner.id(), &id).await?;
    Ok(ApiResponse::ok(source, "Data source retrieved"))
}

async fn delete_source(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Value>> {
    state.ingest.delete(owner.id(), &id).await?;
    Ok(ApiResponse::ok(json!({ "id": id }), "Data source deleted"))
}

async fn source_schema(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<SchemaView>> {
    let schema = state.ingest.schema(owner.id(), &id).await?;
    Ok(ApiResponse::ok(schema, "Schema retrieved"))
}

// =============================================================================
// Visualizations
// =============================================================================

async fn create_visualization(
    State(state): State<AppState>,
    owner: Owner,
    Json(body): Json<NewVisualization>,
) -> AppResult<ApiResponse<Visualization>> {
    let visualization = state.visualizations.create(owner.id(), body).await?;
    Ok(ApiResponse::created(visualization, "Visualization created"))
}

async fn list_visualizations(
    State(state): State<AppState>,
    owner: Owner,
) -> AppResult<ApiResponse<Vec<Visualization>>> {
    let list = state.visualizations.list(owner.id()).await?;
    Ok(ApiResponse::ok(list, "Visualizations retrieved"))
}

async fn shared_visualizations(
    State(state): State<AppState>,
    owner: Owner,
) -> AppResult<ApiResponse<Vec<Visualization>>> {
    let list = state.visualizations.shared_with(owner.id()).await?;
    Ok(ApiResponse::ok(list, "Shared visualizations retrieved"))
}

async fn get_visualization(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Visualization>> {
    let visualization = state.visualizations.get(owner.id(), &id).await?;
    Ok(ApiResponse::ok(visualization, "Visualization retrieved"))
}

async fn update_visualization(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<String>,
    Json(patch): Json<VisualizationPatch>,
) -> AppResult<ApiResponse<Visualization>> {
    let visualization = state.visualizations.update(owner.id(), &id, patch).await?;
    Ok(ApiResponse::ok(visualization, "Visualization updated"))
}

async fn delete_visualization(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Value>> {
    state.visualizations.delete(owner.id(), &id).await?;
    Ok(ApiResponse::ok(json!({ "id": id }), "Visualization deleted"))
}

async fn invite_collaborator(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<String>,
    Json(body): Json<InviteRequest>,
) -> AppResult<ApiResponse<Visualization>> {
    let visualization = state.visualizations.invite(owner.id(), &id, &body.user_id).await?;
    Ok(ApiResponse::ok(visualization, "Collaborator added"))
}

// =============================================================================
// Exports
// =============================================================================

async fn save_export(
    State(state): State<AppState>,
    owner: Owner,
    Json(body): Json<ExportRequest>,
) -> AppResult<ApiResponse<ExportView>> {
    let export = state.exports.create(owner.id(), body).await?;
    Ok(ApiResponse::created(export.into(), "Export created"))
}

async fn list_exports(State(state): State<AppState>, owner: Owner) -> AppResult<ApiResponse<Vec<ExportView>>> {
    let list = state.exports.list(owner.id()).await?;
    Ok(ApiResponse::ok(
        list.into_iter().map(ExportView::from).collect(),
        "Exports retrieved",
    ))
}

async fn get_export(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<ExportView>> {
    let export = state.exports.get(owner.id(), &id).await?;
    Ok(ApiResponse::ok(export.into(), "Export retrieved"))
}

async fn delete_export(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Value>> {
    state.exports.delete(owner.id(), &id).await?;
    Ok(ApiResponse::ok(json!({ "id": id }), "Export deleted"))
}

/// Stream an artifact from disk.
async fn download_export(
    State(state): State<AppState>,
    _owner: Owner,
    Path(file_name): Path<String>,
) -> AppResult<Response> {
    let file = state.exports.download(&file_name).await?;
    let handle = tokio::fs::File::open(&file.path).await?;
    let body = Body::from_stream(ReaderStream::new(handle));

    let disposition = format!("attachment; filename=\"{}\"", file.file_name.replace('"', ""));
    Ok((
        [
            (header::CONTENT_TYPE, file.content_type),
            (header::CONTENT_LENGTH, file.size.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

async fn place_item(_owner: Owner, Json(body): Json<PlaceRequest>) -> AppResult<ApiResponse<Position>> {
    layout::validate(&body.layout)?;
    let (x, y) = layout::place(
        &body.layout,
        body.w.unwrap_or(DEFAULT_ITEM_WIDTH),
        body.h.unwrap_or(DEFAULT_ITEM_HEIGHT),
    )?;
    Ok(ApiResponse::ok(Position { x, y }, "Position found"))
}
