//! HTTP front end: `POST /api/zip` and `GET /health`.

mod errors;
pub mod validation;

pub use validation::ZipFileRequest;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::engine::ZipService;
use errors::ApiError;

/// Shared state for request handlers
pub struct AppState {
    pub zips: Arc<ZipService>,
    /// Cancelled when the server shuts down; each request runs on a child token
    pub shutdown: CancellationToken,
}

/// Successful response body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZipFileResponse {
    pub zip_file_path: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/zip", post(zip_files))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve the API until `shutdown` is cancelled
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    let shutdown = state.shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn zip_files(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ZipFileRequest>, JsonRejection>,
) -> Result<Json<ZipFileResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::bad_request(vec![rejection.body_text()]))?;
    let paths = validation::validate(&request).map_err(ApiError::validation)?;

    info!("Zipping {} files.", paths.len());

    let cancel = state.shutdown.child_token();
    let output = state.zips.zip_files(&paths, &cancel).await.map_err(|err| {
        error!(error = %err, kind = ?err.kind(), "zip request failed");
        ApiError::internal()
    })?;

    info!("Zipped {} files.", paths.len());

    Ok(Json(ZipFileResponse {
        zip_file_path: output.into_string(),
    }))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
