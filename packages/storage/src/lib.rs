#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! On-disk state shared between pipeline processes.
//!
//! Several partition processes run at once against the same data
//! directory. Everything here is built so that a crash at any point leaves
//! every file either in its previous complete state or its new complete
//! state:
//!
//! - [`lock`]: cross-process mutual exclusion via exclusively created lock
//!   files.
//! - [`atomic`]: temp-file-then-rename writes.
//! - [`geocode_cache`]: the address → coordinate cache every partition
//!   reads and appends to.
//! - [`partition_store`]: per-partition `raw` and `final` snapshots.
//! - [`paths`]: the data directory layout.

pub mod atomic;
pub mod geocode_cache;
pub mod lock;
pub mod partition_store;
pub mod paths;

use std::path::PathBuf;
use std::time::Duration;

pub use geocode_cache::{CacheBackend, GeoCache, GeoCacheStore, LocalBackend, PersistOutcome};
pub use lock::{FileLock, LockGuard, LockOptions};
pub use partition_store::{Discovery, PartitionStore};
pub use paths::DataLayout;

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Filesystem I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV (de)serialization failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Another process held the lock for longer than the wait budget.
    #[error("Timed out after {waited:?} waiting for lock {}", .path.display())]
    LockTimeout {
        /// The lock file.
        path: PathBuf,
        /// How long we waited.
        waited: Duration,
    },

    /// A remote cache backend failed.
    #[error("Backend error: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
    },
}

impl StorageError {
    /// Returns `true` if this is a [`StorageError::LockTimeout`].
    #[must_use]
    pub const fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}
