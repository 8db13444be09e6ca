//! Per-partition snapshots.
//!
//! Each partition writes a `raw` snapshot (cleaned, geocoded, tagged) and,
//! once enrichment succeeds, a `final` snapshot. The presence of the
//! `final` snapshot is what marks a partition complete, so it must never be
//! observed half-written: writes go through [`write_json_atomic`] under a
//! per-file lock.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use shop_map_listing_models::{PartitionKey, SnapshotRole, decode_snapshot_id};

use crate::StorageError;
use crate::atomic::write_json_atomic;
use crate::lock::{FileLock, LockOptions};
use crate::paths::ensure_dir;

/// Extension of snapshot files.
pub const SNAPSHOT_EXTENSION: &str = "json";

/// Snapshots found on disk for one role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    /// Decodable snapshots, sorted by file name.
    pub snapshots: Vec<(PartitionKey, PathBuf)>,
    /// Files with the role's prefix whose identifier did not decode.
    pub rejected: Vec<PathBuf>,
}

/// A directory of partition snapshots.
#[derive(Debug, Clone)]
pub struct PartitionStore {
    dir: PathBuf,
    lock_options: LockOptions,
}

impl PartitionStore {
    /// Creates a store over `dir` with default lock timing.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock_options: LockOptions::default(),
        }
    }

    /// Overrides the lock timing used for writes.
    #[must_use]
    pub const fn with_lock_options(mut self, lock_options: LockOptions) -> Self {
        self.lock_options = lock_options;
        self
    }

    /// The snapshot directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the snapshot for `key` and `role`.
    #[must_use]
    pub fn path(&self, key: &PartitionKey, role: SnapshotRole) -> PathBuf {
        self.dir
            .join(format!("{}.{SNAPSHOT_EXTENSION}", key.snapshot_id(role)))
    }

    /// Returns `true` if the snapshot exists.
    #[must_use]
    pub fn exists(&self, key: &PartitionKey, role: SnapshotRole) -> bool {
        self.path(key, role).is_file()
    }

    /// Atomically writes a snapshot. Returns its path.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::LockTimeout`] if another writer holds the
    /// snapshot's lock for too long, or another [`StorageError`] if
    /// serialization or the write fails. The previous snapshot, if any, is
    /// left intact on error.
    pub async fn write<T: Serialize + Sync>(
        &self,
        key: &PartitionKey,
        role: SnapshotRole,
        records: &[T],
    ) -> Result<PathBuf, StorageError> {
        ensure_dir(&self.dir)?;
        let dest = self.path(key, role);

        let guard = FileLock::for_target(&dest, self.lock_options)
            .acquire()
            .await?;
        write_json_atomic(&dest, records)?;
        guard.release();

        log::info!("Wrote {} records to {}", records.len(), dest.display());
        Ok(dest)
    }

    /// Reads a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the file is missing or does not parse.
    pub fn read<T: DeserializeOwned>(
        &self,
        key: &PartitionKey,
        role: SnapshotRole,
    ) -> Result<Vec<T>, StorageError> {
        read_snapshot(&self.path(key, role))
    }

    /// Lists the snapshots of `role`.
    ///
    /// Only `*.json` files whose name starts with `{role}_` are considered.
    /// Of those, any whose identifier does not decode into exactly a role
    /// and three codes is reported in [`Discovery::rejected`].
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the directory exists but cannot be
    /// listed.
    pub fn discover(&self, role: SnapshotRole) -> Result<Discovery, StorageError> {
        let mut discovery = Discovery::default();
        if !self.dir.is_dir() {
            return Ok(discovery);
        }

        let prefix = format!("{role}_");
        let mut candidates: Vec<(String, PathBuf)> = Vec::new();

        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stem.starts_with(&prefix) {
                candidates.push((stem.to_string(), path));
            }
        }

        candidates.sort_by(|a, b| a.0.cmp(&b.0));

        for (stem, path) in candidates {
            match decode_snapshot_id(&stem) {
                Ok((decoded_role, key)) if decoded_role == role => {
                    discovery.snapshots.push((key, path));
                }
                Ok(_) => {}
                Err(e) => {
                    log::warn!("Rejecting snapshot {}: {e}", path.display());
                    discovery.rejected.push(path);
                }
            }
        }

        Ok(discovery)
    }
}

/// Reads a snapshot file.
///
/// # Errors
///
/// Returns [`StorageError`] if the file cannot be read or does not parse.
pub fn read_snapshot<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StorageError> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
