//! In-memory data source
//!
//! Backs integration tests and local development without a database. Records
//! can be appended after construction to simulate the live dataset moving;
//! `query_count` exposes how many times `query` ran, which is what
//! single-flight tests assert on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lives_common::Locality;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use super::{max_watermark, DataSource, SourceError, VendorRecord};

/// Mutable in-memory data source for tests and local development
pub struct MemoryDataSource {
    records: RwLock<Vec<VendorRecord>>,
    query_calls: AtomicUsize,
}

impl MemoryDataSource {
    pub fn new(records: Vec<VendorRecord>) -> Self {
        Self {
            records: RwLock::new(records),
            query_calls: AtomicUsize::new(0),
        }
    }

    /// Append a record, advancing the owning locality's watermark when the
    /// record carries newer inspections.
    pub fn push(&self, record: VendorRecord) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.push(record);
    }

    /// Number of times `query` has been invoked.
    pub fn query_count(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    fn matching(&self, locality: &Locality) -> Vec<VendorRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records
            .iter()
            .filter(|r| &Locality::new(&r.locality) == locality)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DataSource for MemoryDataSource {
    async fn query(&self, locality: &Locality) -> Result<Vec<VendorRecord>, SourceError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.matching(locality))
    }

    async fn distinct_localities(&self) -> Result<Vec<Locality>, SourceError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut localities: Vec<Locality> = records
            .iter()
            .map(|r| Locality::new(&r.locality))
            .collect();
        localities.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        localities.dedup();
        Ok(localities)
    }

    async fn watermark(&self, locality: &Locality) -> Result<Option<DateTime<Utc>>, SourceError> {
        Ok(max_watermark(&self.matching(locality)))
    }
}
