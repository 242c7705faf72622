//! LIVES archive serialization
//!
//! Builds the downloadable archive for one locality: three CSV tables
//! (businesses, inspections, violations) deflated into a single zip file.
//! The archive is written to a staging temp file inside the export directory
//! and handed to the store for its rename-swap publication; any failure
//! drops the temp file and publishes nothing.
//!
//! Serialization is synchronous CPU/IO work, so it runs on the blocking
//! thread pool rather than a runtime worker.

use lives_common::Locality;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::source::{max_watermark, SourceError, VendorRecord};

use super::store::{Artifact, ArtifactStore};

/// Inspection dates in LIVES files use compact day precision.
const LIVES_DATE_FORMAT: &str = "%Y%m%d";

/// Failures inside a build attempt
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV serialization error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Data source error: {0}")]
    Source(#[from] SourceError),

    #[error("Publish error: {0}")]
    Publish(#[from] lives_common::LivesError),

    #[error("Build task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Serializes locality record sets into published archive artifacts
#[derive(Clone)]
pub struct ArchiveBuilder {
    store: Arc<ArtifactStore>,
}

impl ArchiveBuilder {
    pub fn new(store: Arc<ArtifactStore>) -> Self {
        Self { store }
    }

    /// Build and publish the locality's archive from the given records.
    ///
    /// Zero records is a valid build and produces an empty archive (headers
    /// only) with no watermark.
    pub async fn build(
        &self,
        locality: &Locality,
        records: Vec<VendorRecord>,
    ) -> Result<Artifact, BuildError> {
        let store = Arc::clone(&self.store);
        let locality = locality.clone();

        let artifact = tokio::task::spawn_blocking(move || -> Result<Artifact, BuildError> {
            let watermark = max_watermark(&records);
            let staged = write_archive(store.root(), &records)?;
            let artifact = store.publish(&locality, staged, records.len() as u64, watermark)?;
            Ok(artifact)
        })
        .await??;

        debug!(
            locality = %artifact.locality,
            size_bytes = artifact.size_bytes,
            records = artifact.record_count,
            "Archive written"
        );

        Ok(artifact)
    }
}

/// Write the three LIVES tables into a staged zip file.
fn write_archive(dir: &Path, records: &[VendorRecord]) -> Result<NamedTempFile, BuildError> {
    let staged = NamedTempFile::new_in(dir)?;

    let mut zip = ZipWriter::new(staged.as_file());
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file("businesses.csv", options)?;
    zip.write_all(&businesses_csv(records)?)?;

    zip.start_file("inspections.csv", options)?;
    zip.write_all(&inspections_csv(records)?)?;

    zip.start_file("violations.csv", options)?;
    zip.write_all(&violations_csv(records)?)?;

    zip.finish()?;

    Ok(staged)
}

fn businesses_csv(records: &[VendorRecord]) -> Result<Vec<u8>, BuildError> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record([
        "business_id",
        "name",
        "address",
        "city",
        "locality",
        "category",
        "type",
        "latitude",
        "longitude",
    ])?;

    for record in records {
        wtr.write_record([
            record.id.to_string(),
            record.name.clone(),
            record.address.clone(),
            record.city.clone(),
            record.locality.clone(),
            record.category.clone().unwrap_or_default(),
            record.vendor_type.clone().unwrap_or_default(),
            record.latitude.map(|v| v.to_string()).unwrap_or_default(),
            record.longitude.map(|v| v.to_string()).unwrap_or_default(),
        ])?;
    }

    Ok(wtr.into_inner().map_err(|e| e.into_error())?)
}

fn inspections_csv(records: &[VendorRecord]) -> Result<Vec<u8>, BuildError> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(["business_id", "date", "violation_count"])?;

    for record in records {
        for inspection in &record.inspections {
            wtr.write_record([
                record.id.to_string(),
                inspection.inspected_at.format(LIVES_DATE_FORMAT).to_string(),
                inspection.violations.len().to_string(),
            ])?;
        }
    }

    Ok(wtr.into_inner().map_err(|e| e.into_error())?)
}

fn violations_csv(records: &[VendorRecord]) -> Result<Vec<u8>, BuildError> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(["business_id", "date", "code", "description"])?;

    for record in records {
        for inspection in &record.inspections {
            for violation in &inspection.violations {
                wtr.write_record([
                    record.id.to_string(),
                    inspection.inspected_at.format(LIVES_DATE_FORMAT).to_string(),
                    violation.code.clone().unwrap_or_default(),
                    violation.observation.clone().unwrap_or_default(),
                ])?;
            }
        }
    }

    Ok(wtr.into_inner().map_err(|e| e.into_error())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Inspection, Violation};
    use chrono::{TimeZone, Utc};
    use std::io::Read;
    use uuid::Uuid;

    fn sample_records() -> Vec<VendorRecord> {
        let date = Utc.with_ymd_and_hms(2024, 5, 15, 9, 30, 0).unwrap();
        vec![VendorRecord {
            id: Uuid::new_v4(),
            name: "Corner Deli".to_string(),
            address: "42 Granby St".to_string(),
            city: "Norfolk".to_string(),
            locality: "norfolk".to_string(),
            category: Some("Restaurant".to_string()),
            vendor_type: Some("Fast Food".to_string()),
            latitude: Some(36.85),
            longitude: Some(-76.28),
            inspections: vec![Inspection {
                inspected_at: date,
                violations: vec![Violation {
                    code: Some("3-501.16".to_string()),
                    observation: Some("Cold holding above 41F".to_string()),
                }],
            }],
        }]
    }

    fn read_entry(path: &std::path::Path, name: &str) -> String {
        let file = std::fs::File::open(path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let mut entry = archive.by_name(name).unwrap();
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        content
    }

    #[tokio::test]
    async fn test_build_publishes_complete_archive() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::open(dir.path()).unwrap());
        let builder = ArchiveBuilder::new(Arc::clone(&store));
        let locality = Locality::new("norfolk");

        let artifact = builder.build(&locality, sample_records()).await.unwrap();

        assert_eq!(artifact.record_count, 1);
        assert_eq!(
            artifact.watermark,
            Some(Utc.with_ymd_and_hms(2024, 5, 15, 9, 30, 0).unwrap())
        );

        let path = store.artifact_path(&locality).unwrap();
        let businesses = read_entry(&path, "businesses.csv");
        assert!(businesses.contains("Corner Deli"));
        assert!(businesses.contains("36.85"));

        let inspections = read_entry(&path, "inspections.csv");
        assert!(inspections.contains("20240515"));

        let violations = read_entry(&path, "violations.csv");
        assert!(violations.contains("3-501.16"));
        assert!(violations.contains("Cold holding above 41F"));
    }

    #[tokio::test]
    async fn test_zero_records_is_a_valid_empty_archive() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::open(dir.path()).unwrap());
        let builder = ArchiveBuilder::new(Arc::clone(&store));
        let locality = Locality::new("ghost-town");

        let artifact = builder.build(&locality, vec![]).await.unwrap();

        assert_eq!(artifact.record_count, 0);
        assert_eq!(artifact.watermark, None);

        let path = store.artifact_path(&locality).unwrap();
        let businesses = read_entry(&path, "businesses.csv");
        // Header row only.
        assert_eq!(businesses.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_no_staging_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::open(dir.path()).unwrap());
        let builder = ArchiveBuilder::new(Arc::clone(&store));

        builder
            .build(&Locality::new("norfolk"), sample_records())
            .await
            .unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
