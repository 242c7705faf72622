//! HTTP routes for the export subsystem

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use lives_common::Locality;
use serde_json::json;
use std::sync::Arc;
use tokio_util::io::ReaderStream;

use crate::error::AppError;

use super::cache::ExportCache;

/// Shared state for export routes
#[derive(Clone)]
pub struct ExportState {
    pub cache: Arc<ExportCache>,
}

/// Routes owned by the export subsystem:
///
/// - `GET /export/{locality}` — snapshot metadata, triggering a rebuild when
///   the snapshot is absent or outdated
/// - `GET /export/{locality}.archive` — the published archive bytes
/// - `GET /exports` — listing of all published archives
pub fn export_routes() -> Router<ExportState> {
    Router::new()
        .route("/export/:target", get(export_entry))
        .route("/exports", get(list_exports))
}

/// Dispatch on the `.archive` suffix: axum path segments cannot carry suffix
/// patterns, so both endpoints share one segment.
#[tracing::instrument(skip(state))]
async fn export_entry(
    State(state): State<ExportState>,
    Path(target): Path<String>,
) -> Result<Response, AppError> {
    match target.strip_suffix(".archive") {
        Some(stem) => serve_archive(&state, &Locality::new(stem)).await,
        None => serve_metadata(&state, &Locality::new(&target)).await,
    }
}

async fn serve_metadata(state: &ExportState, locality: &Locality) -> Result<Response, AppError> {
    let meta = state.cache.get_or_trigger(locality).await?;

    // An unrecognized locality keeps the same body shape so callers always
    // get the suggestion list.
    let status = if meta.available {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };

    Ok((status, Json(meta)).into_response())
}

async fn serve_archive(state: &ExportState, locality: &Locality) -> Result<Response, AppError> {
    let Ok(path) = state.cache.artifact_path(locality) else {
        let body = Json(json!({
            "message": format!(
                "Archive for '{locality}' is not available. See /export/{locality} to request one."
            ),
        }));
        return Ok((StatusCode::NOT_FOUND, body).into_response());
    };

    let file = tokio::fs::File::open(&path).await?;
    let size = file.metadata().await?.len();
    let body = Body::from_stream(ReaderStream::new(file));

    let headers = [
        (
            header::CONTENT_TYPE,
            "application/octet-stream".to_string(),
        ),
        (header::CONTENT_LENGTH, size.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}.zip\"", locality.slug()),
        ),
    ];

    Ok((headers, body).into_response())
}

async fn list_exports(State(state): State<ExportState>) -> Json<serde_json::Value> {
    Json(json!({ "exports": state.cache.list_artifacts() }))
}
