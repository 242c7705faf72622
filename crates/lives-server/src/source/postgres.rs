//! PostgreSQL-backed data source
//!
//! Queries use the runtime `sqlx` API (`query_as`/`query_scalar`) rather than
//! the compile-time checked macros, so the crate builds without a live
//! database. The schema lives in the workspace `migrations/` directory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lives_common::Locality;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use uuid::Uuid;

use super::{DataSource, Inspection, SourceError, VendorRecord, Violation};

/// Data source over the production PostgreSQL store
#[derive(Clone)]
pub struct PgDataSource {
    pool: PgPool,
}

#[derive(Debug, FromRow)]
struct VendorRow {
    id: Uuid,
    name: String,
    address: String,
    city: String,
    locality: String,
    category: Option<String>,
    vendor_type: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[derive(Debug, FromRow)]
struct InspectionRow {
    id: Uuid,
    vendor_id: Uuid,
    inspected_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct ViolationRow {
    inspection_id: Uuid,
    code: Option<String>,
    observation: Option<String>,
}

impl PgDataSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DataSource for PgDataSource {
    async fn query(&self, locality: &Locality) -> Result<Vec<VendorRecord>, SourceError> {
        let vendors: Vec<VendorRow> = sqlx::query_as(
            r#"
            SELECT id, name, address, city, locality, category, vendor_type,
                   latitude, longitude
            FROM vendors
            WHERE lower(locality) = $1
            ORDER BY name
            "#,
        )
        .bind(locality.as_str())
        .fetch_all(&self.pool)
        .await?;

        if vendors.is_empty() {
            return Ok(Vec::new());
        }

        let inspections: Vec<InspectionRow> = sqlx::query_as(
            r#"
            SELECT i.id, i.vendor_id, i.inspected_at
            FROM inspections i
            JOIN vendors v ON v.id = i.vendor_id
            WHERE lower(v.locality) = $1
            ORDER BY i.inspected_at
            "#,
        )
        .bind(locality.as_str())
        .fetch_all(&self.pool)
        .await?;

        let violations: Vec<ViolationRow> = sqlx::query_as(
            r#"
            SELECT vl.inspection_id, vl.code, vl.observation
            FROM violations vl
            JOIN inspections i ON i.id = vl.inspection_id
            JOIN vendors v ON v.id = i.vendor_id
            WHERE lower(v.locality) = $1
            "#,
        )
        .bind(locality.as_str())
        .fetch_all(&self.pool)
        .await?;

        // Stitch the three result sets back into embedded documents.
        let mut violations_by_inspection: HashMap<Uuid, Vec<Violation>> = HashMap::new();
        for row in violations {
            violations_by_inspection
                .entry(row.inspection_id)
                .or_default()
                .push(Violation {
                    code: row.code,
                    observation: row.observation,
                });
        }

        let mut inspections_by_vendor: HashMap<Uuid, Vec<Inspection>> = HashMap::new();
        for row in inspections {
            inspections_by_vendor
                .entry(row.vendor_id)
                .or_default()
                .push(Inspection {
                    inspected_at: row.inspected_at,
                    violations: violations_by_inspection.remove(&row.id).unwrap_or_default(),
                });
        }

        let records = vendors
            .into_iter()
            .map(|v| VendorRecord {
                inspections: inspections_by_vendor.remove(&v.id).unwrap_or_default(),
                id: v.id,
                name: v.name,
                address: v.address,
                city: v.city,
                locality: v.locality,
                category: v.category,
                vendor_type: v.vendor_type,
                latitude: v.latitude,
                longitude: v.longitude,
            })
            .collect();

        Ok(records)
    }

    async fn distinct_localities(&self) -> Result<Vec<Locality>, SourceError> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT lower(locality) FROM vendors ORDER BY 1")
                .fetch_all(&self.pool)
                .await?;

        Ok(names.iter().map(|n| Locality::new(n)).collect())
    }

    async fn watermark(&self, locality: &Locality) -> Result<Option<DateTime<Utc>>, SourceError> {
        let watermark: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT MAX(i.inspected_at)
            FROM inspections i
            JOIN vendors v ON v.id = i.vendor_id
            WHERE lower(v.locality) = $1
            "#,
        )
        .bind(locality.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(watermark)
    }
}
