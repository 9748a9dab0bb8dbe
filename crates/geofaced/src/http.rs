//! HTTP interface of the daemon.
//!
//! `POST /identificar` (alias `/identify`) and `POST /analyze` take a
//! multipart upload in the `face_image` field. `POST /sync-database` rebuilds
//! the gallery. `GET /health` reports readiness.

use crate::engine::EngineHandle;
use crate::gallery_sync::{GallerySync, GallerySyncError};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use geoface_core::gallery::Gallery;
use geoface_core::{EmbeddingCache, Identification, IdentifyError};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

pub const IMAGE_FIELD: &str = "face_image";

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub gallery: Arc<RwLock<Gallery>>,
    pub cache: Arc<EmbeddingCache>,
    pub sync: Arc<GallerySync>,
    pub identify_timeout: Duration,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/identificar", post(identify))
        .route("/identify", post(identify))
        .route("/analyze", post(analyze))
        .route("/sync-database", post(sync_database))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

/// Body of every identification response.
#[derive(Debug, Serialize, PartialEq)]
pub struct IdentifyResponse {
    #[serde(rename = "empleadoId")]
    pub employee_id: Option<String>,
    pub error: Option<String>,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasons: Option<Vec<String>>,
}

impl IdentifyResponse {
    fn failure(code: &'static str, error: impl Into<String>) -> Self {
        Self {
            employee_id: None,
            error: Some(error.into()),
            code,
            distance: None,
            score: None,
            reasons: None,
        }
    }
}

/// Status code and body for a pipeline outcome.
pub fn identification_response(outcome: Identification) -> (StatusCode, IdentifyResponse) {
    let code = outcome.code();
    match outcome {
        Identification::Employee { employee_id, distance } => (
            StatusCode::OK,
            IdentifyResponse {
                employee_id: Some(employee_id),
                error: None,
                code,
                distance: Some(distance),
                score: None,
                reasons: None,
            },
        ),
        Identification::Unknown => (
            StatusCode::NOT_FOUND,
            IdentifyResponse::failure(code, "employee not recognized"),
        ),
        Identification::SpoofRejected { score, reasons } => (
            StatusCode::FORBIDDEN,
            IdentifyResponse {
                score: Some(score),
                error: Some(format!("spoof detected: {}", reasons.join("; "))),
                reasons: Some(reasons),
                ..IdentifyResponse::failure(code, "")
            },
        ),
        Identification::Error(e) => {
            let status = match e {
                IdentifyError::Decode(_) => StatusCode::BAD_REQUEST,
                IdentifyError::NoFaceDetected => StatusCode::UNPROCESSABLE_ENTITY,
                IdentifyError::CapabilityUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                IdentifyError::SearchFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, IdentifyResponse::failure(code, e.to_string()))
        }
    }
}

#[derive(Debug)]
enum UploadError {
    Missing,
    Empty,
    Malformed(String),
}

impl UploadError {
    fn into_identify_response(self) -> (StatusCode, IdentifyResponse) {
        let response = match self {
            UploadError::Missing => IdentifyResponse::failure("missing_image", "no image file was sent"),
            UploadError::Empty => IdentifyResponse::failure("invalid_upload", "empty or invalid image file"),
            UploadError::Malformed(e) => IdentifyResponse::failure("invalid_upload", e),
        };
        (StatusCode::BAD_REQUEST, response)
    }
}

/// Bytes of the `face_image` field.
async fn read_image(multipart: &mut Multipart) -> Result<Vec<u8>, UploadError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| UploadError::Malformed(e.body_text()))?
    {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let bytes = field.bytes().await.map_err(|e| UploadError::Malformed(e.body_text()))?;
        if bytes.is_empty() {
            return Err(UploadError::Empty);
        }
        return Ok(bytes.to_vec());
    }
    Err(UploadError::Missing)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let database_synced = state.gallery.read().await.is_synced();
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "database_synced": database_synced,
        "search_available": state.engine.search_available(),
        "sync_source_configured": state.sync.has_source(),
        "workers": state.engine.workers(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn identify(State(state): State<AppState>, mut multipart: Multipart) -> (StatusCode, Json<IdentifyResponse>) {
    let image = match read_image(&mut multipart).await {
        Ok(image) => image,
        Err(e) => {
            tracing::warn!(error = ?e, "identify: rejected upload");
            let (status, body) = e.into_identify_response();
            return (status, Json(body));
        }
    };
    tracing::info!(bytes = image.len(), "identify requested");

    let gallery = Arc::clone(&state.gallery);
    let engine = state.engine.clone();
    let run = async move {
        let guard = gallery.read_owned().await;
        engine.identify(image, guard).await
    };

    let (status, body) = match tokio::time::timeout(state.identify_timeout, run).await {
        Ok(Ok(outcome)) => identification_response(outcome),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "identify: engine unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                IdentifyResponse::failure("engine_unavailable", "identification engine is not running"),
            )
        }
        Err(_) => {
            tracing::warn!(timeout_secs = state.identify_timeout.as_secs(), "identify: deadline exceeded");
            (
                StatusCode::GATEWAY_TIMEOUT,
                IdentifyResponse::failure("timeout", "identification timed out"),
            )
        }
    };
    (status, Json(body))
}

async fn analyze(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let image = match read_image(&mut multipart).await {
        Ok(image) => image,
        Err(e) => {
            let (status, body) = e.into_identify_response();
            return (status, Json(json!({"error": body.error, "code": body.code}))).into_response();
        }
    };

    match state.engine.analyze(image).await {
        Ok(analysis) => {
            let status = if analysis.evaluated { StatusCode::OK } else { StatusCode::BAD_REQUEST };
            (status, Json(analysis)).into_response()
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": e.to_string(), "code": "engine_unavailable"})),
        )
            .into_response(),
    }
}

async fn sync_database(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    tracing::info!("sync requested");
    match state.sync.run(&state.gallery, &state.cache).await {
        Ok(report) => (StatusCode::OK, Json(json!({"status": "ok", "report": report}))),
        Err(e) => {
            let (status, code) = match &e {
                GallerySyncError::NoSource => (StatusCode::SERVICE_UNAVAILABLE, "no_record_source"),
                GallerySyncError::Busy => (StatusCode::CONFLICT, "sync_in_progress"),
                GallerySyncError::Sync(_) => (StatusCode::INTERNAL_SERVER_ERROR, "sync_failed"),
            };
            tracing::error!(error = %e, "sync failed");
            (status, Json(json!({"status": "error", "error": e.to_string(), "code": code})))
        }
    }
}
