//! Upstream listing sources.
//!
//! The pipeline only needs "give me the rows of this partition". The
//! bundled [`CsvDirSource`] reads pre-scraped exports named
//! `{city}_{district}_{industry}.csv`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use shop_map_listing_models::catalog::PartitionLabels;
use shop_map_listing_models::{PartitionKey, RawRecord};

use crate::PipelineError;

/// Produces the raw listing rows of one partition.
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Fetches every row of `key`. An empty result means the partition has
    /// no listings.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Source`] if the rows cannot be fetched.
    async fn fetch(
        &self,
        key: &PartitionKey,
        labels: &PartitionLabels,
    ) -> Result<Vec<RawRecord>, PipelineError>;

    /// Human-readable name for log messages.
    fn name(&self) -> String;
}

/// Reads partitions from `{dir}/{city}_{district}_{industry}.csv`.
///
/// Columns are matched by header, either the feed's Chinese headers
/// (`特店名稱`, `地址`, `電話`, `行政區`, `縣市`, `行業別`) or the record's
/// field names. Blank city, district, and industry cells fall back to the
/// partition's display names. A missing file is an empty partition.
#[derive(Debug, Clone)]
pub struct CsvDirSource {
    dir: PathBuf,
}

impl CsvDirSource {
    /// Creates a source reading from `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The file holding `key`'s rows.
    #[must_use]
    pub fn path(&self, key: &PartitionKey) -> PathBuf {
        self.dir.join(format!("{key}.csv"))
    }
}

#[derive(Deserialize)]
struct CsvRow {
    #[serde(default, alias = "特店名稱")]
    name: String,
    #[serde(default, alias = "地址")]
    address: String,
    #[serde(default, alias = "電話")]
    phone: String,
    #[serde(default, alias = "行政區")]
    district: String,
    #[serde(default, alias = "縣市")]
    city: String,
    #[serde(default, alias = "行業別")]
    industry_label: String,
}

#[async_trait]
impl ListingSource for CsvDirSource {
    async fn fetch(
        &self,
        key: &PartitionKey,
        labels: &PartitionLabels,
    ) -> Result<Vec<RawRecord>, PipelineError> {
        let path = self.path(key);
        if !path.is_file() {
            log::info!("No source file {}", path.display());
            return Ok(Vec::new());
        }
        read_rows(&path, labels)
    }

    fn name(&self) -> String {
        format!("csv:{}", self.dir.display())
    }
}

fn read_rows(path: &Path, labels: &PartitionLabels) -> Result<Vec<RawRecord>, PipelineError> {
    let source_error = |e: csv::Error| PipelineError::Source {
        message: format!("{}: {e}", path.display()),
    };

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(source_error)?;

    let mut records = Vec::new();
    for row in reader.deserialize::<CsvRow>() {
        let row = row.map_err(source_error)?;
        records.push(RawRecord {
            name: row.name,
            address: row.address,
            phone: row.phone,
            district: or_label(row.district, &labels.district),
            city: or_label(row.city, &labels.city),
            industry_label: or_label(row.industry_label, &labels.industry),
        });
    }

    log::debug!("Read {} rows from {}", records.len(), path.display());
    Ok(records)
}

fn or_label(value: String, label: &str) -> String {
    if value.trim().is_empty() {
        label.to_string()
    } else {
        value
    }
}
