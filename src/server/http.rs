//! HTTP surface for the gateway.
//!
//! | Method | Path | Body / reply |
//! |---|---|---|
//! | POST | `/process` | multipart `text`, `file`, `user_id`, `stream`; JSON or a text stream |
//! | GET | `/health` | `{"status": "ok", "version": ..}` |
//! | GET | `/cache/stats` | hits, misses, hit rate, entry count |
//! | GET | `/models` | models reported by the backend |
//!
//! Errors use `{"error": {"type", "code", "message"}}` with 429 for
//! admission denial, 413 for oversized uploads, 400 for malformed requests,
//! 502 when the backend cannot be reached and 500 otherwise.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::debug;

use crate::gateway::RequestGateway;
use crate::types::{ANONYMOUS_IDENTITY, Attachment, GatewayReply, GatewayRequest};
use crate::version::PKG_VERSION;
use crate::MuninnError;

pub const PROCESS_ENDPOINT: &str = "/process";
pub const HEALTH_ENDPOINT: &str = "/health";
pub const CACHE_STATS_ENDPOINT: &str = "/cache/stats";
pub const MODELS_ENDPOINT: &str = "/models";

/// Room for form fields and multipart framing on top of the upload limit.
const FORM_OVERHEAD_BYTES: usize = 1024 * 1024;

const STREAM_CONTENT_TYPE: &str = "text/event-stream";
const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Build the router serving `gateway`.
pub fn router(gateway: Arc<RequestGateway>) -> Router {
    let body_limit = gateway
        .max_upload_bytes()
        .saturating_add(FORM_OVERHEAD_BYTES);
    Router::new()
        .route(PROCESS_ENDPOINT, post(handle_process))
        .route(HEALTH_ENDPOINT, get(handle_health))
        .route(CACHE_STATS_ENDPOINT, get(handle_cache_stats))
        .route(MODELS_ENDPOINT, get(handle_models))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(gateway)
}

/// JSON error reply.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    fn from_multipart(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::payload_too_large(err.body_text())
        } else {
            Self::bad_request(err.body_text())
        }
    }
}

impl From<MuninnError> for ApiError {
    fn from(err: MuninnError) -> Self {
        match &err {
            MuninnError::AdmissionDenied { .. } => {
                Self::new(StatusCode::TOO_MANY_REQUESTS, "rate_limited", err.to_string())
            }
            MuninnError::PayloadTooLarge { .. } => Self::payload_too_large(err.to_string()),
            MuninnError::InvalidInput(_) => Self::bad_request(err.to_string()),
            e if e.is_upstream() => {
                Self::new(StatusCode::BAD_GATEWAY, "backend_unavailable", err.to_string())
            }
            _ => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                err.to_string(),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_type = if self.status.is_client_error() {
            "invalid_request_error"
        } else {
            "server_error"
        };
        (
            self.status,
            Json(json!({
                "error": {
                    "type": error_type,
                    "code": self.code,
                    "message": self.message,
                }
            })),
        )
            .into_response()
    }
}

async fn handle_process(
    State(gateway): State<Arc<RequestGateway>>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let limit = gateway.max_upload_bytes();
    let mut text = None;
    let mut identity = None;
    let mut stream = false;
    let mut attachment = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(ApiError::from_multipart)?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "text" => text = Some(field_text(field).await?),
            "user_id" => identity = Some(field_text(field).await?),
            "stream" => stream = parse_flag(&field_text(field).await?),
            "file" => attachment = read_attachment(field, limit).await?,
            other => debug!(field = other, "ignoring unknown form field"),
        }
    }

    let identity = identity
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| ANONYMOUS_IDENTITY.to_string());
    let request = GatewayRequest {
        identity,
        text,
        attachment,
        stream,
    };

    Ok(match gateway.handle(request).await? {
        GatewayReply::Buffered(reply) => Json(reply).into_response(),
        GatewayReply::Streaming(chunks) => (
            [(header::CONTENT_TYPE, STREAM_CONTENT_TYPE)],
            Body::from_stream(chunks),
        )
            .into_response(),
    })
}

async fn field_text(field: Field<'_>) -> Result<String, ApiError> {
    field.text().await.map_err(ApiError::from_multipart)
}

/// Read an uploaded file chunk by chunk, failing as soon as it exceeds `limit`.
async fn read_attachment(mut field: Field<'_>, limit: usize) -> Result<Option<Attachment>, ApiError> {
    let filename = field.file_name().unwrap_or_default().to_string();
    let mime_type = field
        .content_type()
        .unwrap_or(DEFAULT_MIME_TYPE)
        .to_string();

    let mut data = Vec::new();
    while let Some(chunk) = field.chunk().await.map_err(ApiError::from_multipart)? {
        let size = data.len() + chunk.len();
        if size > limit {
            return Err(MuninnError::PayloadTooLarge { size, limit }.into());
        }
        data.extend_from_slice(&chunk);
    }

    // browsers send an empty, unnamed file part when nothing was selected
    if filename.is_empty() && data.is_empty() {
        return Ok(None);
    }
    let filename = if filename.is_empty() {
        "upload".to_string()
    } else {
        filename
    };
    Ok(Some(Attachment::new(filename, mime_type, data)))
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": PKG_VERSION }))
}

async fn handle_cache_stats(State(gateway): State<Arc<RequestGateway>>) -> Response {
    match gateway.cache_stats() {
        Some(stats) => Json(stats).into_response(),
        None => Json(json!({ "enabled": false })).into_response(),
    }
}

async fn handle_models(
    State(gateway): State<Arc<RequestGateway>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let models = gateway.probe().await?;
    Ok(Json(json!({ "models": models })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_accept_form_spellings() {
        assert!(parse_flag("true"));
        assert!(parse_flag(" True "));
        assert!(parse_flag("1"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
    }

    #[test]
    fn errors_map_to_statuses() {
        let status = |e: MuninnError| ApiError::from(e).status();
        assert_eq!(
            status(MuninnError::AdmissionDenied {
                identity: "a".into()
            }),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status(MuninnError::PayloadTooLarge { size: 2, limit: 1 }),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            status(MuninnError::InvalidInput("empty".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(MuninnError::Upstream("refused".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status(MuninnError::Persistence("disk full".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
