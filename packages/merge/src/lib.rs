#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Merge per-partition snapshots into the canonical datasets.
//!
//! ## Merge strategies
//!
//! | Dataset | Strategy |
//! |---------|----------|
//! | `raw_data.json` | Concatenate every `raw` snapshot, stamp city/district/industry names |
//! | `final_data.json` | Concatenate every `final` snapshot, stamp names, dedup by identity |
//!
//! Display names always come from the partition key, overriding whatever
//! the record carried. Unreadable snapshots are logged and skipped; the
//! canonical file is replaced atomically and only when at least one
//! snapshot was read.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shop_map_listing_models::catalog::{Catalog, PartitionLabels};
use shop_map_listing_models::{EnrichedRecord, PreparedRecord, SnapshotRole};
use shop_map_storage::atomic::write_json_atomic;
use shop_map_storage::partition_store::read_snapshot;
use shop_map_storage::{PartitionStore, StorageError};
use thiserror::Error;

/// Errors from merging.
#[derive(Debug, Error)]
pub enum MergeError {
    /// Listing snapshots or writing the canonical file failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// A `raw` record in the canonical raw dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRawRecord {
    /// The prepared record with city and district names from its partition.
    #[serde(flatten)]
    pub prepared: PreparedRecord,
    /// Industry display name of the partition.
    pub industry: String,
}

/// Summary of one merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    /// Which snapshots were merged.
    pub role: SnapshotRole,
    /// Snapshot files read successfully.
    pub files: usize,
    /// Files whose names did not decode into a partition.
    pub rejected: Vec<PathBuf>,
    /// Files that could not be read or parsed.
    pub unreadable: Vec<PathBuf>,
    /// Records read per partition suffix.
    pub per_partition: BTreeMap<String, usize>,
    /// Records written per district display name.
    pub per_district: BTreeMap<String, usize>,
    /// Records before identity dedup.
    pub before_dedup: usize,
    /// Records written.
    pub after_dedup: usize,
    /// The canonical file, if one was written.
    pub output: Option<PathBuf>,
}

impl MergeReport {
    const fn new(role: SnapshotRole) -> Self {
        Self {
            role,
            files: 0,
            rejected: Vec::new(),
            unreadable: Vec::new(),
            per_partition: BTreeMap::new(),
            per_district: BTreeMap::new(),
            before_dedup: 0,
            after_dedup: 0,
            output: None,
        }
    }

    fn log(&self) {
        log::info!(
            "Merged {} {} snapshots ({} rejected, {} unreadable): {} -> {} records",
            self.files,
            self.role,
            self.rejected.len(),
            self.unreadable.len(),
            self.before_dedup,
            self.after_dedup
        );
        for (district, count) in &self.per_district {
            log::info!("  {district}: {count}");
        }
        if let Some(output) = &self.output {
            log::info!("Wrote {}", output.display());
        }
    }
}

/// Merges every `raw` snapshot into `output`.
///
/// # Errors
///
/// Returns [`MergeError`] if the partition directory cannot be listed or
/// the canonical file cannot be written.
pub fn merge_raw(
    store: &PartitionStore,
    catalog: &Catalog,
    output: &Path,
) -> Result<MergeReport, MergeError> {
    let (records, mut report) =
        collect(store, catalog, SnapshotRole::Raw, |record: PreparedRecord, labels| {
            let mut prepared = record;
            prepared.record.city.clone_from(&labels.city);
            prepared.record.district.clone_from(&labels.district);
            MergedRawRecord {
                prepared,
                industry: labels.industry.clone(),
            }
        })?;

    report.after_dedup = records.len();
    report.per_district = count_by(records.iter().map(|r| r.prepared.record.district.as_str()));
    finish(records, output, report)
}

/// Merges every `final` snapshot into `output`, dropping identity
/// duplicates (see [`dedup_by_identity`]).
///
/// # Errors
///
/// Returns [`MergeError`] if the partition directory cannot be listed or
/// the canonical file cannot be written.
pub fn merge_final(
    store: &PartitionStore,
    catalog: &Catalog,
    output: &Path,
) -> Result<MergeReport, MergeError> {
    let (records, mut report) =
        collect(store, catalog, SnapshotRole::Final, |record: EnrichedRecord, labels| {
            let mut record = record;
            record.city.clone_from(&labels.city);
            record.district.clone_from(&labels.district);
            record.ind.clone_from(&labels.industry);
            record
        })?;

    let records = dedup_by_identity(records);
    report.after_dedup = records.len();
    report.per_district = count_by(records.iter().map(|r| r.district.as_str()));
    finish(records, output, report)
}

/// Identity of a merged record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity<'a> {
    /// Name and phone.
    Phone(&'a str, &'a str),
    /// Name and address, used when the phone is blank.
    Address(&'a str, &'a str),
}

/// Computes a record's identity: `(name, phone)`, or `(name, address)`
/// when the phone is blank after trimming.
#[must_use]
pub fn identity(record: &EnrichedRecord) -> Identity<'_> {
    let name = record.name.trim();
    let phone = record.phone.trim();
    if phone.is_empty() {
        Identity::Address(name, record.address.trim())
    } else {
        Identity::Phone(name, phone)
    }
}

/// Keeps the first record of each [`identity`].
#[must_use]
pub fn dedup_by_identity(records: Vec<EnrichedRecord>) -> Vec<EnrichedRecord> {
    let keep: Vec<bool> = {
        let mut seen: HashSet<Identity<'_>> = HashSet::new();
        records.iter().map(|r| seen.insert(identity(r))).collect()
    };

    let before = records.len();
    let kept: Vec<EnrichedRecord> = records
        .into_iter()
        .zip(keep)
        .filter_map(|(record, keep)| keep.then_some(record))
        .collect();

    if kept.len() < before {
        log::info!(
            "Identity dedup: {before} -> {} (removed {})",
            kept.len(),
            before - kept.len()
        );
    }
    kept
}

/// Reads every snapshot of `role` and maps its records through `annotate`.
fn collect<T, U>(
    store: &PartitionStore,
    catalog: &Catalog,
    role: SnapshotRole,
    annotate: impl Fn(T, &PartitionLabels) -> U,
) -> Result<(Vec<U>, MergeReport), MergeError>
where
    T: DeserializeOwned,
{
    let discovery = store.discover(role)?;
    let mut report = MergeReport::new(role);
    report.rejected = discovery.rejected;

    log::info!(
        "Found {} {role} snapshots in {}",
        discovery.snapshots.len(),
        store.dir().display()
    );

    let mut merged = Vec::new();
    for (key, path) in discovery.snapshots {
        let records: Vec<T> = match read_snapshot(&path) {
            Ok(records) => records,
            Err(e) => {
                log::error!("Failed to read {}: {e}", path.display());
                report.unreadable.push(path);
                continue;
            }
        };

        log::debug!("Loaded {}: {} records", path.display(), records.len());
        report.files += 1;
        report.per_partition.insert(key.suffix(), records.len());

        let labels = catalog.labels(&key);
        merged.extend(records.into_iter().map(|r| annotate(r, &labels)));
    }

    report.before_dedup = merged.len();
    Ok((merged, report))
}

fn finish<T: Serialize>(
    records: Vec<T>,
    output: &Path,
    mut report: MergeReport,
) -> Result<MergeReport, MergeError> {
    if report.files == 0 {
        log::warn!(
            "No readable {} snapshots; leaving {} untouched",
            report.role,
            output.display()
        );
        report.log();
        return Ok(report);
    }

    write_json_atomic(output, &records)?;
    report.output = Some(output.to_path_buf());
    report.log();
    Ok(report)
}

fn count_by<'a>(values: impl Iterator<Item = &'a str>) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for value in values {
        *counts.entry(value.to_string()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    use shop_map_listing_models::catalog::catalog;
    use shop_map_listing_models::{PartitionKey, RawRecord};

    fn enriched(name: &str, phone: &str, address: &str) -> EnrichedRecord {
        EnrichedRecord {
            name: name.to_string(),
            phone: phone.to_string(),
            address: address.to_string(),
            ..EnrichedRecord::default()
        }
    }

    #[test]
    fn dedup_prefers_phone_then_address() {
        let records = vec![
            enriched("A", "02-1", "x"),
            enriched("A", "02-1", "y"),
            enriched("B", "", "z"),
            enriched("B", " ", "z"),
            enriched("B", "", "w"),
        ];
        let kept = dedup_by_identity(records);
        let summary: Vec<(&str, &str)> = kept
            .iter()
            .map(|r| (r.name.as_str(), r.address.as_str()))
            .collect();
        assert_eq!(summary, [("A", "x"), ("B", "z"), ("B", "w")]);
    }

    #[test]
    fn phone_and_address_identities_never_collide() {
        // Same name; one has phone "z", the other blank phone and address "z".
        let kept = dedup_by_identity(vec![enriched("A", "z", "q"), enriched("A", "", "z")]);
        assert_eq!(kept.len(), 2);
    }

    fn key(district: &str, industry: &str) -> PartitionKey {
        PartitionKey::new("001", district, industry).unwrap()
    }

    #[tokio::test]
    async fn merges_final_snapshots_with_names_and_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::new(dir.path().join("partitions"));

        store
            .write(
                &key("111", "0009"),
                SnapshotRole::Final,
                &[enriched("H", "02-1", "a"), enriched("K", "02-2", "b")],
            )
            .await
            .unwrap();
        store
            .write(
                &key("103", "0009"),
                SnapshotRole::Final,
                &[enriched("H", "02-1", "c")],
            )
            .await
            .unwrap();
        std::fs::write(store.dir().join("final_001_111.json"), "[]").unwrap();
        std::fs::write(store.dir().join("final_001_112_0009.json"), "not json").unwrap();

        let output = dir.path().join("final_data.json");
        let report = merge_final(&store, catalog(), &output).unwrap();

        assert_eq!(report.files, 2);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.unreadable.len(), 1);
        assert_eq!(report.before_dedup, 3);
        assert_eq!(report.after_dedup, 2);
        assert_eq!(report.per_partition["001_111_0009"], 2);
        assert_eq!(report.output.as_deref(), Some(output.as_path()));

        let written: Vec<EnrichedRecord> =
            serde_json::from_slice(&std::fs::read(&output).unwrap()).unwrap();
        // Discovery is name-ordered, so district 103 comes first and wins.
        assert_eq!(written[0].name, "H");
        assert_eq!(written[0].district, "大同區");
        assert_eq!(written[0].city, "台北市");
        assert_eq!(written[0].ind, "旅宿業");
        assert_eq!(written[1].name, "K");
        assert_eq!(report.per_district["士林區"], 1);
    }

    async fn merge_cafe_pair(phone: &str) -> Vec<EnrichedRecord> {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::new(dir.path().join("partitions"));
        store
            .write(
                &key("111", "0009"),
                SnapshotRole::Final,
                &[enriched("Cafe X", phone, "Addr2")],
            )
            .await
            .unwrap();
        store
            .write(
                &key("103", "0009"),
                SnapshotRole::Final,
                &[enriched("Cafe X", phone, "Addr1")],
            )
            .await
            .unwrap();

        let output = dir.path().join("final_data.json");
        merge_final(&store, catalog(), &output).unwrap();
        serde_json::from_slice(&std::fs::read(&output).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn same_phone_across_partitions_keeps_first_discovered() {
        let written = merge_cafe_pair("0223456789").await;

        assert_eq!(written.len(), 1);
        assert_eq!(written[0].name, "Cafe X");
        assert_eq!(written[0].address, "Addr1");
        assert_eq!(written[0].district, "大同區");
    }

    #[tokio::test]
    async fn without_phone_different_addresses_are_kept() {
        let written = merge_cafe_pair("").await;

        let addresses: Vec<&str> = written.iter().map(|r| r.address.as_str()).collect();
        assert_eq!(addresses, ["Addr1", "Addr2"]);
    }

    #[tokio::test]
    async fn merges_raw_snapshots_with_industry() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::new(dir.path().join("partitions"));
        let record = PreparedRecord::new(RawRecord {
            name: "店".to_string(),
            district: "stale".to_string(),
            ..RawRecord::default()
        });
        store
            .write(&key("111", "0009"), SnapshotRole::Raw, &[record.clone(), record])
            .await
            .unwrap();

        let output = dir.path().join("raw_data.json");
        let report = merge_raw(&store, catalog(), &output).unwrap();
        assert_eq!(report.after_dedup, 2);

        let written: Vec<MergedRawRecord> =
            serde_json::from_slice(&std::fs::read(&output).unwrap()).unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0].industry, "旅宿業");
        assert_eq!(written[0].prepared.record.district, "士林區");
    }

    #[test]
    fn nothing_to_merge_leaves_output_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = PartitionStore::new(dir.path().join("partitions"));
        let output = dir.path().join("final_data.json");
        std::fs::write(&output, "[1]").unwrap();

        let report = merge_final(&store, catalog(), &output).unwrap();

        assert!(report.output.is_none());
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "[1]");
    }
}
