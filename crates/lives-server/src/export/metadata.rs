//! Externally visible snapshot metadata
//!
//! Pure transformation from internal export state to the response shape; no
//! I/O and no side effects, so it is trivially unit-testable.

use chrono::{DateTime, Utc};
use lives_common::Locality;
use serde::{Deserialize, Serialize};

use super::store::Artifact;

/// Snapshot description returned by `GET /export/{locality}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportMetadata {
    /// Whether the locality exists in the data source at all.
    pub available: bool,
    pub is_stale: bool,
    pub is_building: bool,
    pub artifact_url: Option<String>,
    pub generated_at: Option<DateTime<Utc>>,
    /// The live distinct-locality set; also the suggestion list on misses.
    pub available_localities: Vec<String>,
}

/// Entry in the `GET /exports` listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub locality: String,
    pub size_bytes: u64,
    pub record_count: u64,
    pub generated_at: DateTime<Utc>,
}

impl From<Artifact> for ArtifactSummary {
    fn from(artifact: Artifact) -> Self {
        Self {
            locality: artifact.locality.as_str().to_string(),
            size_bytes: artifact.size_bytes,
            record_count: artifact.record_count,
            generated_at: artifact.generated_at,
        }
    }
}

/// Metadata for a locality the data source does not know.
pub fn unknown_locality(localities: &[Locality]) -> ExportMetadata {
    ExportMetadata {
        available: false,
        is_stale: false,
        is_building: false,
        artifact_url: None,
        generated_at: None,
        available_localities: locality_names(localities),
    }
}

/// Metadata snapshot for a recognized locality.
pub fn snapshot(
    locality: &Locality,
    artifact: Option<&Artifact>,
    is_stale: bool,
    is_building: bool,
    localities: &[Locality],
    base_url: &str,
) -> ExportMetadata {
    ExportMetadata {
        available: true,
        is_stale,
        is_building,
        artifact_url: artifact.map(|_| archive_url(base_url, locality)),
        generated_at: artifact.map(|a| a.generated_at),
        available_localities: locality_names(localities),
    }
}

/// Download URL for a locality's archive.
///
/// The locality is percent-encoded so multi-word names produce a valid
/// path segment; axum decodes it back on the way in.
pub fn archive_url(base_url: &str, locality: &Locality) -> String {
    format!(
        "{}/export/{}.archive",
        base_url,
        urlencoding::encode(locality.as_str())
    )
}

fn locality_names(localities: &[Locality]) -> Vec<String> {
    localities.iter().map(|l| l.as_str().to_string()).collect()
}
