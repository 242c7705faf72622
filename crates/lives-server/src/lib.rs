//! LIVES Export Server Library
//!
//! HTTP service exporting health-inspection vendor records as downloadable
//! LIVES archive snapshots, one per geographic locality.
//!
//! # Overview
//!
//! The read side of the vendor dataset lives elsewhere; this service owns the
//! locality export subsystem:
//!
//! - **Source Access**: read-only [`source::DataSource`] over the vendor
//!   record store (PostgreSQL in production, in-memory for tests)
//! - **Export Cache**: on-demand archive snapshots with staleness detection,
//!   single-flight rebuild coordination, and atomic publication
//! - **Configuration**: environment-based configuration management
//! - **Middleware**: CORS, request tracing, response compression
//!
//! # Architecture
//!
//! A request for `/export/{locality}` never waits for a build. The handler
//! evaluates the locality's snapshot state, fires a detached background build
//! task when the snapshot is absent or outdated, and immediately returns the
//! current metadata. The build publishes its archive with a rename swap, so
//! the download endpoint only ever serves complete files.
//!
//! ## Framework Stack
//!
//! - **Axum**: HTTP routing and extraction
//! - **SQLx**: asynchronous PostgreSQL access
//! - **Tower**: middleware and service abstractions
//! - **zip / csv**: LIVES archive serialization

pub mod config;
pub mod error;
pub mod export;
pub mod middleware;
pub mod source;

// Re-export commonly used types
pub use error::{AppError, AppResult};
