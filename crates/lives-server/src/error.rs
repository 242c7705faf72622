//! Server-specific error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::source::SourceError;

/// Result type alias for request handlers
pub type AppResult<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Data source error: {0}")]
    Source(#[from] SourceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("LIVES error: {0}")]
    Lives(#[from] lives_common::LivesError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Source(ref e) => {
                tracing::error!("Data source error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A data source error occurred".to_string(),
                )
            },
            AppError::Io(ref e) => {
                tracing::error!("IO error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An IO error occurred".to_string(),
                )
            },
            AppError::Lives(ref e) => {
                tracing::error!("LIVES error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            },
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}
