//! Locality export subsystem
//!
//! The cache behind `/export/{locality}`: materializes a downloadable LIVES
//! archive per locality on demand, detects when a published snapshot has
//! fallen behind the live dataset, and collapses concurrent rebuild triggers
//! into a single build.
//!
//! # Structure
//!
//! - [`coordinator`] — per-locality state machine and single-flight build lock
//! - [`builder`] — CSV/zip serialization of a locality's records
//! - [`store`] — persisted artifact registry with atomic publication
//! - [`cache`] — the orchestrator the HTTP layer talks to
//! - [`metadata`] — pure internal-state-to-response transformation
//! - [`routes`] — axum route handlers

pub mod builder;
pub mod cache;
pub mod coordinator;
pub mod metadata;
pub mod routes;
pub mod store;

pub use builder::{ArchiveBuilder, BuildError};
pub use cache::ExportCache;
pub use coordinator::{BuildCoordinator, BuildOutcome, LocalityState};
pub use metadata::{ArtifactSummary, ExportMetadata};
pub use routes::{export_routes, ExportState};
pub use store::{Artifact, ArtifactStore};
