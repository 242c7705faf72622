//! Persisted artifact registry
//!
//! One archive per normalized locality lives under the export directory as
//! `{slug}.zip`, with a `{slug}.meta.json` sidecar carrying the metadata the
//! archive itself cannot (generation time, watermark, record count). Only the
//! latest artifact is kept; a rebuild replaces both files in place.
//!
//! Publication is atomic: content is staged in a temp file on the same
//! filesystem and renamed over the canonical path, so a reader holding the
//! old file keeps a complete old archive and a new open always sees a
//! complete new one. The sidecar is swapped the same way, after the archive,
//! which keeps the pair consistent for a startup scan even if the process
//! dies between the two renames (the stale sidecar merely under-reports the
//! watermark and the next evaluation rebuilds).

use chrono::{DateTime, Utc};
use lives_common::{LivesError, Locality};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Sidecar file suffix, alongside `{slug}.zip`.
const META_SUFFIX: &str = ".meta.json";

/// The published build output for one locality
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub locality: Locality,
    /// Archive file name inside the export directory.
    pub file_name: String,
    pub size_bytes: u64,
    pub record_count: u64,
    pub generated_at: DateTime<Utc>,
    /// Maximum source inspection timestamp at generation time.
    pub watermark: Option<DateTime<Utc>>,
}

/// Registry of published artifacts backed by the export directory
pub struct ArtifactStore {
    root: PathBuf,
    artifacts: RwLock<HashMap<Locality, Artifact>>,
}

impl ArtifactStore {
    /// Open the store rooted at `root`, creating the directory if needed,
    /// sweeping abandoned staging files, and loading previously published
    /// artifacts from their sidecars.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, LivesError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        let mut artifacts = HashMap::new();

        for entry in std::fs::read_dir(&root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();

            // Leftover staging files from an interrupted build.
            if name.starts_with(".tmp") {
                warn!(file = %name, "Sweeping abandoned staging file");
                let _ = std::fs::remove_file(entry.path());
                continue;
            }

            if !name.ends_with(META_SUFFIX) {
                continue;
            }

            match Self::load_sidecar(&root, &entry.path()) {
                Ok(artifact) => {
                    debug!(locality = %artifact.locality, "Loaded published artifact");
                    artifacts.insert(artifact.locality.clone(), artifact);
                },
                Err(e) => {
                    warn!(file = %name, error = %e, "Skipping unreadable artifact sidecar");
                },
            }
        }

        info!(
            root = %root.display(),
            artifacts = artifacts.len(),
            "Artifact store opened"
        );

        Ok(Self {
            root,
            artifacts: RwLock::new(artifacts),
        })
    }

    fn load_sidecar(root: &Path, sidecar: &Path) -> Result<Artifact, LivesError> {
        let raw = std::fs::read(sidecar)?;
        let artifact: Artifact = serde_json::from_slice(&raw)?;

        // Only artifacts whose archive actually exists count as published.
        let archive = root.join(&artifact.file_name);
        if !archive.is_file() {
            return Err(LivesError::ArtifactNotFound(
                artifact.locality.as_str().to_string(),
            ));
        }

        Ok(artifact)
    }

    /// The export directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Currently published artifact for the locality, if any.
    pub fn get(&self, locality: &Locality) -> Option<Artifact> {
        let artifacts = self.artifacts.read().unwrap_or_else(|e| e.into_inner());
        artifacts.get(locality).cloned()
    }

    /// Absolute path of the locality's published archive.
    pub fn artifact_path(&self, locality: &Locality) -> Option<PathBuf> {
        self.get(locality).map(|a| self.root.join(a.file_name))
    }

    /// All published artifacts, ordered by locality.
    pub fn list(&self) -> Vec<Artifact> {
        let artifacts = self.artifacts.read().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<Artifact> = artifacts.values().cloned().collect();
        list.sort_by(|a, b| a.locality.as_str().cmp(b.locality.as_str()));
        list
    }

    /// Publish a staged archive as the locality's current artifact.
    ///
    /// Renames the staged file over `{slug}.zip`, then swaps the metadata
    /// sidecar the same way. The previous artifact (if any) is replaced
    /// wholesale; on error nothing is published and the staging files are
    /// dropped.
    pub fn publish(
        &self,
        locality: &Locality,
        staged: NamedTempFile,
        record_count: u64,
        watermark: Option<DateTime<Utc>>,
    ) -> Result<Artifact, LivesError> {
        let slug = locality.slug();
        let file_name = format!("{slug}.zip");
        let size_bytes = staged.as_file().metadata()?.len();

        let artifact = Artifact {
            locality: locality.clone(),
            file_name: file_name.clone(),
            size_bytes,
            record_count,
            generated_at: Utc::now(),
            watermark,
        };

        staged
            .persist(self.root.join(&file_name))
            .map_err(|e| e.error)?;

        let mut sidecar = NamedTempFile::new_in(&self.root)?;
        sidecar.write_all(&serde_json::to_vec_pretty(&artifact)?)?;
        sidecar
            .persist(self.root.join(format!("{slug}{META_SUFFIX}")))
            .map_err(|e| e.error)?;

        let mut artifacts = self.artifacts.write().unwrap_or_else(|e| e.into_inner());
        artifacts.insert(locality.clone(), artifact.clone());

        Ok(artifact)
    }
}
