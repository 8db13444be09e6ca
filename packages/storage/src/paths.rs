#![allow(clippy::module_name_repetitions)]
//! Canonical file paths inside the data directory.
//!
//! ```text
//! {root}/
//!   geocoding_cache.csv
//!   raw_data.json
//!   final_data.json
//!   partitions/
//!     raw_001_111_0009.json
//!     final_001_111_0009.json
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use shop_map_listing_models::SnapshotRole;

/// File name of the shared geocoding cache.
pub const GEOCODE_CACHE_FILE: &str = "geocoding_cache.csv";

/// Directory (under the root) holding partition snapshots.
pub const PARTITIONS_DIR: &str = "partitions";

/// File name of the canonical dataset for `role`.
#[must_use]
pub const fn canonical_file_name(role: SnapshotRole) -> &'static str {
    match role {
        SnapshotRole::Raw => "raw_data.json",
        SnapshotRole::Final => "final_data.json",
    }
}

/// Layout of a data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    /// Creates a layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The data directory itself.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding partition snapshots.
    #[must_use]
    pub fn partitions_dir(&self) -> PathBuf {
        self.root.join(PARTITIONS_DIR)
    }

    /// Local geocoding cache file.
    #[must_use]
    pub fn geocode_cache_path(&self) -> PathBuf {
        self.root.join(GEOCODE_CACHE_FILE)
    }

    /// Canonical merged dataset for `role`.
    #[must_use]
    pub fn canonical_path(&self, role: SnapshotRole) -> PathBuf {
        self.root.join(canonical_file_name(role))
    }
}

/// Appends `suffix` to the file name of `path` (`a.json` → `a.json.lock`).
#[must_use]
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Ensures the parent directory of `path` exists.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir(parent),
        _ => Ok(()),
    }
}
