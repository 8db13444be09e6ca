#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Per-partition enrichment pipeline.
//!
//! A partition runs strictly in order: fetch, clean and dedup, geocode, tag,
//! write the `raw` snapshot, enrich, write the `final` snapshot. A partition
//! whose `final` snapshot exists is skipped entirely, which is what makes a
//! crashed or interrupted run resumable: rerunning the same selection only
//! does the partitions that never finished.

pub mod commands;
pub mod config;
pub mod interactive;
pub mod parallel;
pub mod source;

use std::collections::BTreeMap;
use std::sync::Arc;

use shop_map_enrich::{EnrichError, Enricher, create_provider};
use shop_map_geocoder::{GeocodeError, Geocoder, create_service, default_call_delay};
use shop_map_listing_models::catalog::{Catalog, catalog};
use shop_map_listing_models::progress::{ProgressCallback, null_progress};
use shop_map_listing_models::{
    EnrichedRecord, PartitionKey, PartitionKeyError, PreparedRecord, SnapshotRole,
};
use shop_map_merge::MergeError;
use shop_map_normalize::tags::annotate;
use shop_map_normalize::clean_records;
use shop_map_r2::{R2CacheBackend, R2Client, R2Error};
use shop_map_retry::RetryPolicy;
use shop_map_storage::paths::ensure_dir;
use shop_map_storage::{
    CacheBackend, FileLock, GeoCacheStore, LocalBackend, PartitionStore, StorageError,
};
use thiserror::Error;

pub use config::{CacheLocation, PipelineConfig, Tunables};
pub use source::{CsvDirSource, ListingSource};

/// Errors from the pipeline and its commands.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The upstream listing source failed.
    #[error("Source error: {message}")]
    Source {
        /// Description of the failure.
        message: String,
    },

    /// Snapshot or cache storage failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Building the geocoding service failed.
    #[error("Geocoding error: {0}")]
    Geocode(#[from] GeocodeError),

    /// Building the generative provider failed.
    #[error("Enrichment error: {0}")]
    Enrich(#[from] EnrichError),

    /// Merging snapshots failed.
    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    /// Blob store operation failed.
    #[error("Blob store error: {0}")]
    R2(#[from] R2Error),

    /// A partition code was invalid.
    #[error("Invalid partition: {0}")]
    Key(#[from] PartitionKeyError),

    /// Invalid configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// Description.
        message: String,
    },

    /// Filesystem or process I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What happened to one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionOutcome {
    /// A `final` snapshot already existed; nothing was done.
    SkippedComplete,
    /// The source had no usable rows; no snapshot was written.
    NoData,
    /// Enrichment is disabled; only the `raw` snapshot was produced.
    RawOnly {
        /// Records in the `raw` snapshot.
        raw_records: usize,
    },
    /// Every chunk failed or returned nothing. No `final` snapshot was
    /// written, so the next run retries the partition.
    NoEnrichedRows {
        /// Records sent for enrichment.
        raw_records: usize,
        /// Chunks that failed every attempt.
        chunks_failed: usize,
    },
    /// The `final` snapshot was written.
    Completed {
        /// Records sent for enrichment.
        raw_records: usize,
        /// Records in the `final` snapshot.
        final_records: usize,
        /// Chunks whose records were dropped from this run.
        chunks_failed: usize,
    },
    /// The `final` snapshot could not be written (typically a lock
    /// timeout). The previous snapshot, if any, is intact.
    WriteFailed {
        /// Which snapshot failed.
        role: SnapshotRole,
        /// The storage error.
        error: String,
    },
    /// The partition failed before producing a snapshot.
    Failed {
        /// The error.
        error: String,
    },
}

impl PartitionOutcome {
    /// Returns `true` if the partition has a `final` snapshot after this run.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::SkippedComplete | Self::Completed { .. })
    }

    /// Short label for summaries.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::SkippedComplete => "skipped",
            Self::NoData => "no data",
            Self::RawOnly { .. } => "raw only",
            Self::NoEnrichedRows { .. } => "not enriched",
            Self::Completed { .. } => "completed",
            Self::WriteFailed { .. } => "write failed",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Per-run switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Reuse an existing `raw` snapshot instead of fetching, cleaning, and
    /// geocoding again.
    pub use_raw: bool,
    /// Keep only the first `limit` rows of each partition.
    pub limit: Option<usize>,
}

/// Runs partitions through every stage.
pub struct Pipeline {
    source: Arc<dyn ListingSource>,
    store: PartitionStore,
    geocoder: Geocoder,
    enricher: Option<Enricher>,
    catalog: Catalog,
    stage_progress: Arc<dyn ProgressCallback>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("source", &self.source.name())
            .field("store", &self.store)
            .field("enricher", &self.enricher.is_some())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Creates a pipeline. Without an enricher, partitions stop after the
    /// `raw` snapshot.
    #[must_use]
    pub fn new(
        source: Arc<dyn ListingSource>,
        store: PartitionStore,
        geocoder: Geocoder,
        enricher: Option<Enricher>,
    ) -> Self {
        Self {
            source,
            store,
            geocoder,
            enricher,
            catalog: catalog().clone(),
            stage_progress: null_progress(),
        }
    }

    /// Replaces the code → name catalog.
    #[must_use]
    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Reports enrichment chunks to `progress`.
    #[must_use]
    pub fn with_stage_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.stage_progress = progress;
        self
    }

    /// Builds a pipeline reading from the configured CSV directory.
    ///
    /// A missing geocoding key leaves the geocoder cache-only and a missing
    /// generative key disables enrichment; both are logged, not errors.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the data directory cannot be created,
    /// the blob store is selected but not configured, or a service client
    /// cannot be built.
    pub fn from_config(
        config: &PipelineConfig,
        stage_progress: Arc<dyn ProgressCallback>,
    ) -> Result<Self, PipelineError> {
        let layout = &config.layout;
        ensure_dir(layout.root())?;

        let service = match create_service(&config.geocoder) {
            Ok(service) => Some(service),
            Err(GeocodeError::MissingCredential { name }) => {
                log::warn!("{name} is not set; geocoding from the cache only");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let backend: Arc<dyn CacheBackend> = match config.cache_location {
            CacheLocation::Local => Arc::new(LocalBackend::new(layout.geocode_cache_path())),
            CacheLocation::Blob => Arc::new(R2CacheBackend::standard(Arc::new(
                R2Client::from_env()?,
            ))),
        };
        let cache_lock = FileLock::for_target(&layout.geocode_cache_path(), config.lock);
        let cache = GeoCacheStore::new(backend, cache_lock);

        let tunables = config.tunables;
        let geocoder = Geocoder::new(service, cache)
            .with_retry(RetryPolicy::new(
                tunables.geocode_attempts,
                tunables.geocode_retry_delay,
            ))
            .with_call_delay(
                tunables
                    .geocode_delay
                    .unwrap_or_else(|| default_call_delay(config.geocoder.provider)),
            )
            .with_progress(stage_progress.clone());

        let enricher = match create_provider(&config.ai) {
            Ok(generator) => Some(
                Enricher::new(generator)
                    .with_chunk_size(tunables.chunk_size)
                    .with_retry(RetryPolicy::new(
                        tunables.chunk_attempts,
                        tunables.chunk_retry_delay,
                    ))
                    .with_chunk_delay(tunables.chunk_delay),
            ),
            Err(EnrichError::MissingCredential { name }) => {
                log::warn!("{name} is not set; partitions will stop after the raw snapshot");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let store = PartitionStore::new(layout.partitions_dir()).with_lock_options(config.lock);
        let source = Arc::new(CsvDirSource::new(&config.source_dir));

        Ok(Self::new(source, store, geocoder, enricher).with_stage_progress(stage_progress))
    }

    /// The snapshot store.
    #[must_use]
    pub const fn store(&self) -> &PartitionStore {
        &self.store
    }

    /// Runs one partition.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Source`] if the rows cannot be fetched.
    /// Every later failure is reported through the returned
    /// [`PartitionOutcome`] instead.
    pub async fn run_partition(
        &self,
        key: &PartitionKey,
        options: RunOptions,
    ) -> Result<PartitionOutcome, PipelineError> {
        if self.store.exists(key, SnapshotRole::Final) {
            log::info!("{key}: final snapshot exists, skipping");
            return Ok(PartitionOutcome::SkippedComplete);
        }

        let labels = self.catalog.labels(key);
        log::info!(
            "{key}: {} {} {}",
            labels.city,
            labels.district,
            labels.industry
        );

        let prepared = match self.reuse_raw(key, options) {
            Some(records) => records,
            None => {
                let mut rows = self.source.fetch(key, &labels).await?;
                if let Some(limit) = options.limit {
                    rows.truncate(limit);
                }
                let fetched = rows.len();
                let rows = clean_records(rows);
                log::info!("{key}: {fetched} rows fetched, {} after cleaning", rows.len());

                if rows.is_empty() {
                    return Ok(PartitionOutcome::NoData);
                }

                let (mut prepared, report) = self.geocoder.geocode_partition(rows).await;
                if let Some(error) = &report.persist_error {
                    log::warn!("{key}: geocoding cache not updated: {error}");
                }
                annotate(&mut prepared);

                if let Err(e) = self.store.write(key, SnapshotRole::Raw, &prepared).await {
                    log::error!("{key}: failed to write raw snapshot: {e}");
                }
                prepared
            }
        };

        let raw_records = prepared.len();
        let Some(enricher) = &self.enricher else {
            return Ok(PartitionOutcome::RawOnly { raw_records });
        };

        let outcome = enricher
            .enrich_partition(key, &labels.industry, &prepared, self.stage_progress.as_ref())
            .await;

        if outcome.records.is_empty() {
            log::warn!(
                "{key}: no enriched rows ({} of {} chunks failed), final snapshot not written",
                outcome.chunks_failed,
                outcome.chunks_failed + outcome.chunks_succeeded
            );
            return Ok(PartitionOutcome::NoEnrichedRows {
                raw_records,
                chunks_failed: outcome.chunks_failed,
            });
        }

        match self
            .store
            .write::<EnrichedRecord>(key, SnapshotRole::Final, &outcome.records)
            .await
        {
            Ok(_) => Ok(PartitionOutcome::Completed {
                raw_records,
                final_records: outcome.records.len(),
                chunks_failed: outcome.chunks_failed,
            }),
            Err(e) => {
                log::error!("{key}: failed to write final snapshot: {e}");
                Ok(PartitionOutcome::WriteFailed {
                    role: SnapshotRole::Final,
                    error: e.to_string(),
                })
            }
        }
    }

    /// Runs every partition in order. A failing partition is logged and
    /// recorded; the rest still run.
    pub async fn run_partitions(
        &self,
        keys: &[PartitionKey],
        options: RunOptions,
        progress: &dyn ProgressCallback,
    ) -> Vec<(PartitionKey, PartitionOutcome)> {
        progress.set_total(keys.len() as u64);

        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            progress.set_message(key.to_string());
            let outcome = match self.run_partition(key, options).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::error!("{key}: {e}");
                    PartitionOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
            log::info!("{key}: {}", outcome.label());
            results.push((key.clone(), outcome));
            progress.inc(1);
        }

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for (_, outcome) in &results {
            *counts.entry(outcome.label()).or_default() += 1;
        }
        let summary = counts
            .iter()
            .map(|(label, count)| format!("{count} {label}"))
            .collect::<Vec<_>>()
            .join(", ");
        progress.finish(format!("{} partitions: {summary}", results.len()));
        log::info!("{} partitions: {summary}", results.len());

        results
    }

    fn reuse_raw(&self, key: &PartitionKey, options: RunOptions) -> Option<Vec<PreparedRecord>> {
        if !options.use_raw || !self.store.exists(key, SnapshotRole::Raw) {
            return None;
        }
        match self.store.read::<PreparedRecord>(key, SnapshotRole::Raw) {
            Ok(mut records) => {
                if let Some(limit) = options.limit {
                    records.truncate(limit);
                }
                log::info!("{key}: reusing {} records from raw snapshot", records.len());
                Some(records)
            }
            Err(e) => {
                log::warn!("{key}: raw snapshot unreadable, rebuilding: {e}");
                None
            }
        }
    }
}

/// Builds the cartesian product of the selected codes, in selection order.
///
/// # Errors
///
/// Returns [`PipelineError::Key`] if any code is invalid.
pub fn partition_keys(
    city: &str,
    districts: &[String],
    industries: &[String],
) -> Result<Vec<PartitionKey>, PipelineError> {
    let mut keys = Vec::with_capacity(districts.len() * industries.len());
    for district in districts {
        for industry in industries {
            keys.push(PartitionKey::new(city, district.as_str(), industry.as_str())?);
        }
    }
    Ok(keys)
}

/// Snapshot presence of one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionStatus {
    /// The partition.
    pub key: PartitionKey,
    /// A `raw` snapshot exists.
    pub raw: bool,
    /// A `final` snapshot exists.
    pub complete: bool,
}

/// Lists every partition with at least one snapshot, sorted by key.
///
/// # Errors
///
/// Returns [`PipelineError::Storage`] if the partition directory cannot be
/// listed.
pub fn partition_status(store: &PartitionStore) -> Result<Vec<PartitionStatus>, PipelineError> {
    let mut statuses: BTreeMap<PartitionKey, PartitionStatus> = BTreeMap::new();
    for role in [SnapshotRole::Raw, SnapshotRole::Final] {
        for (key, _) in store.discover(role)?.snapshots {
            let status = statuses
                .entry(key.clone())
                .or_insert_with(|| PartitionStatus {
                    key,
                    raw: false,
                    complete: false,
                });
            match role {
                SnapshotRole::Raw => status.raw = true,
                SnapshotRole::Final => status.complete = true,
            }
        }
    }
    Ok(statuses.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_keys_are_a_cartesian_product() {
        let keys = partition_keys(
            "001",
            &["111".to_string(), "103".to_string()],
            &["0009".to_string(), "0008".to_string()],
        )
        .unwrap();
        let ids: Vec<String> = keys.iter().map(ToString::to_string).collect();
        assert_eq!(
            ids,
            ["001_111_0009", "001_111_0008", "001_103_0009", "001_103_0008"]
        );
    }

    #[test]
    fn partition_keys_reject_bad_codes() {
        assert!(matches!(
            partition_keys("001", &["1 1".to_string()], &["0009".to_string()]),
            Err(PipelineError::Key(_))
        ));
    }

    #[tokio::test]
    async fn status_combines_roles() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::new(dir.path());
        let done = PartitionKey::new("001", "111", "0009").unwrap();
        let pending = PartitionKey::new("001", "103", "0009").unwrap();

        let empty: Vec<PreparedRecord> = Vec::new();
        store.write(&done, SnapshotRole::Raw, &empty).await.unwrap();
        store.write(&pending, SnapshotRole::Raw, &empty).await.unwrap();
        let finals: Vec<EnrichedRecord> = Vec::new();
        store.write(&done, SnapshotRole::Final, &finals).await.unwrap();

        let statuses = partition_status(&store).unwrap();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].key, pending);
        assert!(statuses[0].raw && !statuses[0].complete);
        assert_eq!(statuses[1].key, done);
        assert!(statuses[1].complete);
    }

    #[test]
    fn outcome_completeness() {
        assert!(PartitionOutcome::SkippedComplete.is_complete());
        assert!(!PartitionOutcome::RawOnly { raw_records: 3 }.is_complete());
        assert!(
            !PartitionOutcome::WriteFailed {
                role: SnapshotRole::Final,
                error: "timeout".to_string(),
            }
            .is_complete()
        );
    }
}
