//! Export cache orchestration
//!
//! Ties the data source, coordinator, builder, and store together behind the
//! two operations the HTTP layer needs: a non-blocking metadata fetch that
//! triggers rebuilds as a side effect, and a lookup of the published archive
//! path. A triggered build runs as a detached task; its completion is only
//! ever observed by a later evaluation.

use lives_common::{LivesError, Locality};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};
use uuid::Uuid;

use crate::source::DataSource;

use super::builder::{ArchiveBuilder, BuildError};
use super::coordinator::{is_stale, BuildCoordinator, BuildOutcome, LocalityState};
use super::metadata::{self, ArtifactSummary, ExportMetadata};
use super::store::{Artifact, ArtifactStore};

/// Orchestrator for locality export snapshots
pub struct ExportCache {
    source: Arc<dyn DataSource>,
    store: Arc<ArtifactStore>,
    coordinator: Arc<BuildCoordinator>,
    builder: ArchiveBuilder,
    base_url: String,
}

impl ExportCache {
    pub fn new(
        source: Arc<dyn DataSource>,
        store: Arc<ArtifactStore>,
        build_lease: Duration,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            source,
            builder: ArchiveBuilder::new(Arc::clone(&store)),
            store,
            coordinator: Arc::new(BuildCoordinator::new(build_lease)),
            base_url: base_url.into(),
        }
    }

    /// Current snapshot metadata for the locality, scheduling a background
    /// rebuild when the snapshot is absent or outdated.
    ///
    /// Never waits on a build: the returned metadata reflects the state at
    /// the moment of the call (including `is_building=true` when this call
    /// won the trigger race).
    pub async fn get_or_trigger(
        &self,
        locality: &Locality,
    ) -> Result<ExportMetadata, crate::source::SourceError> {
        let localities = self.source.distinct_localities().await?;
        if !localities.contains(locality) {
            return Ok(metadata::unknown_locality(&localities));
        }

        let watermark = self.source.watermark(locality).await?;
        let state = self
            .coordinator
            .evaluate(locality, self.store.get(locality).as_ref(), watermark);

        if matches!(state, LocalityState::Absent | LocalityState::Stale) {
            if let Some(owner) = self.coordinator.try_acquire(locality) {
                self.spawn_build(locality.clone(), owner);
            }
        }

        // Snapshot after the acquire attempt so a caller that just won the
        // race already sees its own build in flight.
        let artifact = self.store.get(locality);
        Ok(metadata::snapshot(
            locality,
            artifact.as_ref(),
            is_stale(artifact.as_ref(), watermark),
            self.coordinator.is_building(locality),
            &localities,
            &self.base_url,
        ))
    }

    /// Path of the locality's currently published archive, independent of
    /// staleness. A stale-but-present artifact is still servable.
    pub fn artifact_path(&self, locality: &Locality) -> Result<std::path::PathBuf, LivesError> {
        self.store
            .artifact_path(locality)
            .ok_or_else(|| LivesError::ArtifactNotFound(locality.as_str().to_string()))
    }

    /// Published artifact for the locality, if any.
    pub fn artifact(&self, locality: &Locality) -> Option<Artifact> {
        self.store.get(locality)
    }

    /// All published artifacts, ordered by locality.
    pub fn list_artifacts(&self) -> Vec<ArtifactSummary> {
        self.store
            .list()
            .into_iter()
            .map(ArtifactSummary::from)
            .collect()
    }

    /// Run the build for a locality whose lock this caller already holds,
    /// fire-and-forget. The lock is released on both success and failure; a
    /// failed build leaves the locality stale for the next request to
    /// re-trigger.
    fn spawn_build(&self, locality: Locality, owner: Uuid) {
        let source = Arc::clone(&self.source);
        let builder = self.builder.clone();
        let coordinator = Arc::clone(&self.coordinator);

        tokio::spawn(async move {
            let started = Instant::now();
            info!(locality = %locality, "Export build started");

            match run_build(&source, &builder, &locality).await {
                Ok(artifact) => {
                    info!(
                        locality = %locality,
                        size_bytes = artifact.size_bytes,
                        records = artifact.record_count,
                        duration_s = started.elapsed().as_secs_f64(),
                        "Export build completed"
                    );
                    coordinator.release(&locality, owner, BuildOutcome::Success);
                },
                Err(e) => {
                    error!(
                        locality = %locality,
                        error = %e,
                        duration_s = started.elapsed().as_secs_f64(),
                        "Export build failed"
                    );
                    coordinator.release(&locality, owner, BuildOutcome::Failure);
                },
            }
        });
    }
}

async fn run_build(
    source: &Arc<dyn DataSource>,
    builder: &ArchiveBuilder,
    locality: &Locality,
) -> Result<Artifact, BuildError> {
    let records = source.query(locality).await?;
    builder.build(locality, records).await
}
