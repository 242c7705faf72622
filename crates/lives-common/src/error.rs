//! Error types for the LIVES export service

use thiserror::Error;

/// Result type alias for LIVES operations
pub type Result<T> = std::result::Result<T, LivesError>;

/// Main error type shared across the workspace
#[derive(Error, Debug)]
pub enum LivesError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No artifact published for locality: {0}")]
    ArtifactNotFound(String),
}
