//! Read-only access to the inspected-vendor record store
//!
//! The export subsystem consumes the store exclusively through the
//! [`DataSource`] trait: per-locality record queries, the distinct locality
//! set, and the per-locality inspection watermark. All ad-hoc filtering
//! (category, text, date-range search) belongs to the query façade that sits
//! in front of the same store and is not part of this service.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lives_common::Locality;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryDataSource;
pub use postgres::PgDataSource;

/// Errors raised by data source implementations
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Malformed record {id}: {reason}")]
    MalformedRecord { id: Uuid, reason: String },
}

/// A single violation observed during an inspection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub code: Option<String>,
    pub observation: Option<String>,
}

/// One inspection event for a vendor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inspection {
    pub inspected_at: DateTime<Utc>,
    pub violations: Vec<Violation>,
}

/// A vendor document with its embedded inspection history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorRecord {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub city: String,
    pub locality: String,
    pub category: Option<String>,
    pub vendor_type: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub inspections: Vec<Inspection>,
}

impl VendorRecord {
    /// Timestamp of the vendor's most recent inspection, if any.
    pub fn latest_inspection(&self) -> Option<DateTime<Utc>> {
        self.inspections.iter().map(|i| i.inspected_at).max()
    }
}

/// Maximum inspection timestamp across a set of records.
pub fn max_watermark(records: &[VendorRecord]) -> Option<DateTime<Utc>> {
    records.iter().filter_map(|r| r.latest_inspection()).max()
}

/// Read-only accessor over the vendor record store.
///
/// Implementations must be side-effect free: `query` returns an empty vector
/// (not an error) for a recognized locality with no current records.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// All records belonging to the given locality.
    async fn query(&self, locality: &Locality) -> Result<Vec<VendorRecord>, SourceError>;

    /// The distinct set of localities currently present in the store.
    async fn distinct_localities(&self) -> Result<Vec<Locality>, SourceError>;

    /// Maximum inspection timestamp among the locality's current records,
    /// `None` when the locality has no inspections.
    async fn watermark(&self, locality: &Locality) -> Result<Option<DateTime<Utc>>, SourceError>;
}
