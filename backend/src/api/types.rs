//! REST API types: response envelopes, request bodies and caller identity.
//!
//! Every response is wrapped in an envelope. Success:
//!
//! ```json
//! { "success": true, "statusCode": 200, "data": { ... }, "message": "..." }
//! ```
//!
//! Failure:
//!
//! ```json
//! { "success": false, "statusCode": 404, "kind": "notFound", "message": "..." }
//! ```

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, ErrorKind};
use chrono::{DateTime, Utc};

use crate::models::{Export, ExportFormat, ExportLayoutItem, VisualizationSnapshot};

/// Header carrying the caller identity set by the upstream auth layer.
pub const USER_ID_HEADER: &str = "x-user-id";

// =============================================================================
// Envelopes
// =============================================================================

/// Successful response envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub status_code: u16,
    pub data: T,
    pub message: String,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::OK, data, message)
    }

    pub fn created(data: T, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::CREATED, data, message)
    }

    fn with_status(status: StatusCode, data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            status_code: status.as_u16(),
            data,
            message: message.into(),
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

/// Failure envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub success: bool,
    pub status_code: u16,
    pub kind: String,
    pub message: String,
}

/// HTTP status for a failure kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation | ErrorKind::Schema => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Authorization => StatusCode::FORBIDDEN,
        ErrorKind::Fetch => StatusCode::BAD_GATEWAY,
        ErrorKind::Render | ErrorKind::Io => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = status_for(kind);
        if status.is_server_error() {
            tracing::error!(kind = kind.as_str(), error = ?self, "request failed");
        } else {
            tracing::debug!(kind = kind.as_str(), error = %self, "request rejected");
        }

        let body = ErrorBody {
            success: false,
            status_code: status.as_u16(),
            kind: kind.as_str().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Caller identity
// =============================================================================

/// Authenticated caller, taken from the `x-user-id` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub String);

impl Owner {
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Owner(v.to_string()))
            .ok_or_else(|| AppError::unauthorized("Missing caller identity"))
    }
}

// =============================================================================
// Request bodies
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadApiRequest {
    pub name: String,
    #[serde(alias = "url")]
    pub api_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UploadTextRequest {
    pub name: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InviteRequest {
    pub user_id: String,
}

/// Body of the layout placement helper.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlaceRequest {
    pub layout: Vec<ExportLayoutItem>,
    pub w: Option<u32>,
    pub h: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Position {
    pub x: u32,
    pub y: u32,
}

/// Export as returned to clients; the artifact is reachable only through
/// `downloadLink`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportView {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub description: String,
    pub format: ExportFormat,
    pub visualizations: Vec<VisualizationSnapshot>,
    pub layout: Vec<ExportLayoutItem>,
    pub file_name: String,
    pub download_link: String,
    pub created_at: DateTime<Utc>,
}

impl From<Export> for ExportView {
    fn from(export: Export) -> Self {
        Self {
            id: export.id,
            owner_id: export.owner_id,
            title: export.title,
            description: export.description,
            format: export.format,
            visualizations: export.visualizations,
            layout: export.layout,
            file_name: export.file_name,
            download_link: export.download_link,
            created_at: export.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::Validation), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::Authorization), StatusCode::FORBIDDEN);
        assert_eq!(status_for(ErrorKind::Fetch), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(ErrorKind::Render), StatusCode::INTERNAL_SERVER_ERROR);

        let response = AppError::from(SourceError::Schema("no fields".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_envelope_shape() {
        let value = serde_json::to_value(ApiResponse::created(vec![1, 2], "Created")).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["statusCode"], 201);
        assert_eq!(value["data"], serde_json::json!([1, 2]));
    }

    #[test]
    fn test_api_request_accepts_url_alias() {
        let req: UploadApiRequest = serde_json::from_str(r#"{"name":"n","url":"http://x"}"#).unwrap();
        assert_eq!(req.api_url, "http://x");
    }
}
