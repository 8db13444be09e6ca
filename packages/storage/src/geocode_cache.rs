//! Shared address → coordinate cache.
//!
//! Every partition process reads the cache before geocoding and appends
//! the addresses it resolved afterwards. The cache only grows: entries are
//! never deleted, and when two processes resolve the same address the
//! entry written first wins.
//!
//! Storage is pluggable through [`CacheBackend`] (local file here, an
//! S3-compatible bucket in `shop_map_r2`). Writers serialize through a
//! [`FileLock`] and re-read the freshest copy under the lock, so
//! concurrent persists never lose each other's entries.

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use shop_map_listing_models::GeoCacheEntry;

use crate::StorageError;
use crate::atomic::write_atomic;
use crate::lock::FileLock;

/// Where the serialized cache lives.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Reads the serialized cache. `Ok(None)` means it does not exist yet.
    async fn read(&self) -> Result<Option<Vec<u8>>, StorageError>;

    /// Replaces the serialized cache.
    async fn write(&self, bytes: Vec<u8>) -> Result<(), StorageError>;

    /// Human-readable location for log messages.
    fn describe(&self) -> String;
}

/// A cache stored in a local file, replaced atomically.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    path: PathBuf,
}

impl LocalBackend {
    /// Creates a backend for the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The cache file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CacheBackend for LocalBackend {
    async fn read(&self) -> Result<Option<Vec<u8>>, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, bytes: Vec<u8>) -> Result<(), StorageError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(std::io::Error::other)??;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory cache: entries in insertion order, indexed by address key.
#[derive(Debug, Clone, Default)]
pub struct GeoCache {
    entries: Vec<GeoCacheEntry>,
    index: HashMap<String, usize>,
}

impl GeoCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a CSV cache with header `address_key,lat,lng`.
    ///
    /// Duplicate keys keep their first row.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Csv`] if any row is malformed.
    pub fn from_csv(bytes: &[u8]) -> Result<Self, StorageError> {
        let mut reader = csv::Reader::from_reader(bytes);
        let entries = reader
            .deserialize::<GeoCacheEntry>()
            .collect::<Result<Vec<_>, _>>()?;

        let mut cache = Self::new();
        cache.merge(entries);
        Ok(cache)
    }

    /// Serializes the cache as CSV with header `address_key,lat,lng`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if serialization fails.
    pub fn to_csv(&self) -> Result<Vec<u8>, StorageError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer.write_record(["address_key", "lat", "lng"])?;
        for entry in &self.entries {
            writer.serialize(entry)?;
        }
        writer.into_inner().map_err(|e| StorageError::Io(e.into_error()))
    }

    /// Coordinates for `address_key`.
    #[must_use]
    pub fn get(&self, address_key: &str) -> Option<&GeoCacheEntry> {
        self.index.get(address_key).map(|&i| &self.entries[i])
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the cache has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[GeoCacheEntry] {
        &self.entries
    }

    /// Adds entries whose keys are not present yet. Returns how many were
    /// added.
    pub fn merge(&mut self, entries: impl IntoIterator<Item = GeoCacheEntry>) -> usize {
        let mut added = 0;
        for entry in entries {
            if self.index.contains_key(&entry.address_key) {
                continue;
            }
            self.index.insert(entry.address_key.clone(), self.entries.len());
            self.entries.push(entry);
            added += 1;
        }
        added
    }

    /// Addresses not in the cache, de-duplicated, in first-seen order.
    #[must_use]
    pub fn lookup_missing<'a>(&self, addresses: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut seen = HashSet::new();
        addresses
            .into_iter()
            .filter(|address| !self.index.contains_key(*address) && seen.insert(*address))
            .map(str::to_string)
            .collect()
    }
}

/// Result of [`GeoCacheStore::persist`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// New entries were written.
    Written {
        /// Entries added by this persist.
        added: usize,
        /// Entries in the cache after the write.
        total: usize,
    },
    /// Every entry was already cached (or there was nothing to persist).
    Unchanged,
    /// The lock could not be taken in time; nothing was written.
    SkippedLockTimeout,
    /// The current cache could not be read under the lock; nothing was
    /// written rather than risk replacing it with a partial copy.
    SkippedUnreadable,
}

/// A [`CacheBackend`] paired with the lock that serializes its writers.
#[derive(Clone)]
pub struct GeoCacheStore {
    backend: Arc<dyn CacheBackend>,
    lock: FileLock,
}

impl std::fmt::Debug for GeoCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoCacheStore")
            .field("backend", &self.backend.describe())
            .field("lock", &self.lock)
            .finish()
    }
}

impl GeoCacheStore {
    /// Creates a store.
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>, lock: FileLock) -> Self {
        Self { backend, lock }
    }

    /// The backend's location, for logging.
    #[must_use]
    pub fn describe(&self) -> String {
        self.backend.describe()
    }

    /// Loads the cache without locking.
    ///
    /// A missing, unreadable, or malformed cache yields an empty one: a
    /// stale read only costs extra service calls.
    pub async fn load(&self) -> GeoCache {
        match self.backend.read().await {
            Ok(None) => {
                log::info!("No geocoding cache at {} yet", self.describe());
                GeoCache::new()
            }
            Ok(Some(bytes)) => match GeoCache::from_csv(&bytes) {
                Ok(cache) => {
                    log::info!(
                        "Loaded {} cached coordinates from {}",
                        cache.len(),
                        self.describe()
                    );
                    cache
                }
                Err(e) => {
                    log::warn!("Ignoring unparseable geocoding cache {}: {e}", self.describe());
                    GeoCache::new()
                }
            },
            Err(e) => {
                log::warn!("Failed to read geocoding cache {}: {e}", self.describe());
                GeoCache::new()
            }
        }
    }

    /// Merges `new_entries` into the stored cache.
    ///
    /// Under the lock, the freshest stored cache is re-read and the new
    /// entries are appended to it (existing keys win), so entries persisted
    /// by other processes since [`Self::load`] are kept.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the lock file cannot be created or the
    /// merged cache cannot be serialized or written. A lock timeout and an
    /// unreadable stored cache are reported as [`PersistOutcome`] variants
    /// instead.
    pub async fn persist(
        &self,
        new_entries: &[GeoCacheEntry],
    ) -> Result<PersistOutcome, StorageError> {
        if new_entries.is_empty() {
            return Ok(PersistOutcome::Unchanged);
        }

        let guard = match self.lock.acquire().await {
            Ok(guard) => guard,
            Err(e) if e.is_lock_timeout() => {
                log::warn!(
                    "Skipping geocoding cache update of {} entries: {e}",
                    new_entries.len()
                );
                return Ok(PersistOutcome::SkippedLockTimeout);
            }
            Err(e) => return Err(e),
        };

        let current = match self.backend.read().await {
            Ok(None) => GeoCache::new(),
            Ok(Some(bytes)) => match GeoCache::from_csv(&bytes) {
                Ok(cache) => cache,
                Err(e) => {
                    log::warn!(
                        "Not updating geocoding cache {}: stored copy is unparseable: {e}",
                        self.describe()
                    );
                    return Ok(PersistOutcome::SkippedUnreadable);
                }
            },
            Err(e) => {
                log::warn!(
                    "Not updating geocoding cache {}: failed to read stored copy: {e}",
                    self.describe()
                );
                return Ok(PersistOutcome::SkippedUnreadable);
            }
        };

        let mut merged = current;
        let added = merged.merge(new_entries.iter().cloned());
        if added == 0 {
            guard.release();
            return Ok(PersistOutcome::Unchanged);
        }

        self.backend.write(merged.to_csv()?).await?;
        guard.release();

        log::info!(
            "Added {added} entries to geocoding cache {} ({} total)",
            self.describe(),
            merged.len()
        );

        Ok(PersistOutcome::Written {
            added,
            total: merged.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockOptions;
    use std::time::Duration;

    fn entry(key: &str, lat: f64) -> GeoCacheEntry {
        GeoCacheEntry {
            address_key: key.to_string(),
            lat,
            lng: 121.5,
        }
    }

    fn quick_lock(target: &Path) -> FileLock {
        FileLock::for_target(
            target,
            LockOptions {
                poll: Duration::from_millis(2),
                timeout: Duration::from_secs(10),
                stale_after: None,
            },
        )
    }

    fn local_store(path: &Path) -> GeoCacheStore {
        GeoCacheStore::new(Arc::new(LocalBackend::new(path)), quick_lock(path))
    }

    #[test]
    fn merge_keeps_first_and_counts_added() {
        let mut cache = GeoCache::new();
        assert_eq!(cache.merge([entry("a", 1.0), entry("b", 2.0)]), 2);
        assert_eq!(cache.merge([entry("a", 9.0), entry("c", 3.0)]), 1);

        assert_eq!(cache.len(), 3);
        assert!((cache.get("a").unwrap().lat - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn merge_is_idempotent() {
        let mut cache = GeoCache::new();
        cache.merge([entry("a", 1.0), entry("b", 2.0)]);
        let before = cache.entries().to_vec();

        assert_eq!(cache.merge(before.clone()), 0);
        assert_eq!(cache.entries(), before.as_slice());
    }

    #[test]
    fn lookup_missing_is_unique_and_ordered() {
        let mut cache = GeoCache::new();
        cache.merge([entry("b", 2.0)]);

        let missing = cache.lookup_missing(["c", "a", "b", "c", "a"]);
        assert_eq!(missing, vec!["c", "a"]);
    }

    #[test]
    fn csv_round_trip_keeps_order_and_first_duplicate() {
        let csv = b"address_key,lat,lng\nx,25.1,121.5\ny,25.2,121.6\nx,0.0,0.0\n";
        let cache = GeoCache::from_csv(csv).unwrap();
        assert_eq!(cache.len(), 2);
        assert!((cache.get("x").unwrap().lat - 25.1).abs() < f64::EPSILON);

        let out = String::from_utf8(cache.to_csv().unwrap()).unwrap();
        assert!(out.starts_with("address_key,lat,lng\nx,25.1,121.5\ny,25.2,121.6"));
    }

    #[test]
    fn empty_cache_serializes_header_only() {
        let out = GeoCache::new().to_csv().unwrap();
        assert_eq!(out, b"address_key,lat,lng\n");
        assert!(GeoCache::from_csv(&out).unwrap().is_empty());
    }

    #[test]
    fn malformed_csv_is_an_error() {
        assert!(GeoCache::from_csv(b"address_key,lat,lng\nx,not-a-number,1\n").is_err());
    }

    #[tokio::test]
    async fn local_backend_reads_what_it_wrote() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path().join("nested/geocoding_cache.csv"));

        assert_eq!(backend.read().await.unwrap(), None);
        backend.write(b"address_key,lat,lng\n".to_vec()).await.unwrap();
        assert_eq!(
            backend.read().await.unwrap().as_deref(),
            Some(&b"address_key,lat,lng\n"[..])
        );
    }

    #[tokio::test]
    async fn load_missing_or_garbage_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geocoding_cache.csv");
        let store = local_store(&path);

        assert!(store.load().await.is_empty());

        std::fs::write(&path, b"address_key,lat,lng\nx,oops,1\n").unwrap();
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn persist_writes_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geocoding_cache.csv");
        let store = local_store(&path);

        let outcome = store.persist(&[entry("a", 1.0), entry("b", 2.0)]).await.unwrap();
        assert_eq!(outcome, PersistOutcome::Written { added: 2, total: 2 });

        let outcome = store.persist(&[entry("a", 5.0)]).await.unwrap();
        assert_eq!(outcome, PersistOutcome::Unchanged);

        assert_eq!(store.load().await.len(), 2);
        assert!(!path.with_extension("csv.lock").exists());
    }

    #[tokio::test]
    async fn persist_keeps_entries_written_since_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geocoding_cache.csv");
        let first = local_store(&path);
        let second = local_store(&path);

        // both load the same empty snapshot
        assert!(first.load().await.is_empty());
        assert!(second.load().await.is_empty());

        first.persist(&[entry("a", 1.0)]).await.unwrap();
        second.persist(&[entry("b", 2.0)]).await.unwrap();

        let cache = first.load().await;
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_persists_lose_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geocoding_cache.csv");

        let mut handles = Vec::new();
        for writer in 0..8 {
            let store = local_store(&path);
            handles.push(tokio::spawn(async move {
                let entries: Vec<GeoCacheEntry> = (0..5)
                    .map(|i| entry(&format!("w{writer}-{i}"), f64::from(i)))
                    .collect();
                store.persist(&entries).await.unwrap()
            }));
        }
        for handle in handles {
            assert!(matches!(
                handle.await.unwrap(),
                PersistOutcome::Written { added: 5, .. }
            ));
        }

        let cache = local_store(&path).load().await;
        assert_eq!(cache.len(), 40);
    }

    #[tokio::test]
    async fn repeated_persists_converge_on_the_union() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geocoding_cache.csv");
        let a = [entry("a", 1.0), entry("shared", 10.0)];
        let b = [entry("b", 2.0), entry("shared", 20.0)];

        local_store(&path).persist(&a).await.unwrap();
        local_store(&path).persist(&b).await.unwrap();
        let outcome = local_store(&path).persist(&a).await.unwrap();
        assert_eq!(outcome, PersistOutcome::Unchanged);

        let mut once = GeoCache::new();
        once.merge(a.iter().cloned());
        once.merge(b.iter().cloned());

        let stored = local_store(&path).load().await;
        assert_eq!(stored.entries(), once.entries());
        assert_eq!(stored.len(), 3);
        assert!((stored.get("shared").unwrap().lat - 10.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn persist_skips_on_lock_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geocoding_cache.csv");
        let lock = FileLock::for_target(
            &path,
            LockOptions {
                poll: Duration::from_millis(2),
                timeout: Duration::from_millis(20),
                stale_after: None,
            },
        );
        let store = GeoCacheStore::new(Arc::new(LocalBackend::new(&path)), lock.clone());

        let _held = lock.acquire().await.unwrap();
        let outcome = store.persist(&[entry("a", 1.0)]).await.unwrap();

        assert_eq!(outcome, PersistOutcome::SkippedLockTimeout);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn persist_refuses_to_clobber_unreadable_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geocoding_cache.csv");
        std::fs::write(&path, b"address_key,lat,lng\nx,oops,1\n").unwrap();
        let store = local_store(&path);

        let outcome = store.persist(&[entry("a", 1.0)]).await.unwrap();

        assert_eq!(outcome, PersistOutcome::SkippedUnreadable);
        assert_eq!(
            std::fs::read(&path).unwrap(),
            b"address_key,lat,lng\nx,oops,1\n"
        );
    }
}
