//! Cache-first geocoding of a partition's records.
//!
//! The shared cache is consulted before any service call and extended with
//! whatever the service resolves. Failures never fail the partition: an
//! address that cannot be resolved simply leaves its records without
//! coordinates.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use shop_map_listing_models::progress::{ProgressCallback, null_progress};
use shop_map_listing_models::{GeoCacheEntry, PreparedRecord, RawRecord};
use shop_map_retry::RetryPolicy;
use shop_map_storage::{GeoCacheStore, PersistOutcome};

use crate::{GeocodingService, full_address_key};

/// Counters from one [`Geocoder::geocode_partition`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeocodeReport {
    /// Records in the partition.
    pub records: usize,
    /// Distinct address keys already in the cache.
    pub cache_hits: usize,
    /// Distinct address keys missing from the cache.
    pub missing: usize,
    /// Missing keys the service resolved.
    pub resolved: usize,
    /// Records left without coordinates.
    pub unresolved_records: usize,
    /// What happened to the newly resolved entries. `None` when nothing was
    /// persisted or the persist failed.
    pub persist: Option<PersistOutcome>,
    /// The persist error, if any.
    pub persist_error: Option<String>,
}

/// Resolves addresses through the shared cache and a geocoding service.
pub struct Geocoder {
    service: Option<Arc<dyn GeocodingService>>,
    store: GeoCacheStore,
    retry: RetryPolicy,
    call_delay: Duration,
    progress: Arc<dyn ProgressCallback>,
}

impl std::fmt::Debug for Geocoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Geocoder")
            .field("service", &self.service.as_ref().map(|s| s.provider()))
            .field("store", &self.store)
            .field("retry", &self.retry)
            .field("call_delay", &self.call_delay)
            .finish_non_exhaustive()
    }
}

impl Geocoder {
    /// Creates a geocoder. With no `service`, only cached coordinates are
    /// used.
    ///
    /// Each address gets a single attempt by default.
    #[must_use]
    pub fn new(service: Option<Arc<dyn GeocodingService>>, store: GeoCacheStore) -> Self {
        Self {
            service,
            store,
            retry: RetryPolicy::once(),
            call_delay: Duration::ZERO,
            progress: null_progress(),
        }
    }

    /// Sets the retry policy for each service call.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the pause after every service call.
    #[must_use]
    pub const fn with_call_delay(mut self, call_delay: Duration) -> Self {
        self.call_delay = call_delay;
        self
    }

    /// Reports per-address progress to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Geocodes each address once through the service.
    ///
    /// Addresses the service fails on or finds nothing for are left out of
    /// the result. Returns nothing when no service is configured.
    pub async fn resolve(&self, addresses: &[String]) -> Vec<GeoCacheEntry> {
        let Some(service) = &self.service else {
            if !addresses.is_empty() {
                log::warn!(
                    "No geocoding service configured; {} addresses stay unresolved",
                    addresses.len()
                );
            }
            return Vec::new();
        };

        self.progress.set_total(addresses.len() as u64);
        self.progress.set_position(0);

        let mut resolved = Vec::new();
        for address in addresses {
            self.progress.set_message(address.clone());

            let label = format!("geocode {address}");
            match self.retry.run(&label, move || service.geocode(address)).await {
                Ok(Some(hit)) => {
                    log::debug!(
                        "{address} -> ({}, {}) via {}",
                        hit.latitude,
                        hit.longitude,
                        hit.provider
                    );
                    resolved.push(GeoCacheEntry {
                        address_key: address.clone(),
                        lat: hit.latitude,
                        lng: hit.longitude,
                    });
                }
                Ok(None) => log::debug!("No geocoding result for {address}"),
                Err(e) => log::warn!("Failed to geocode {address}: {e}"),
            }

            self.progress.inc(1);
            if !self.call_delay.is_zero() {
                tokio::time::sleep(self.call_delay).await;
            }
        }

        self.progress.finish(format!(
            "Geocoded {}/{} addresses",
            resolved.len(),
            addresses.len()
        ));
        resolved
    }

    /// Attaches coordinates to every record of a partition.
    ///
    /// Cached keys are used as-is, missing keys are resolved through the
    /// service, and newly resolved entries are persisted to the shared
    /// cache. A failed persist is logged; the resolved coordinates are still
    /// applied to the records.
    pub async fn geocode_partition(
        &self,
        records: Vec<RawRecord>,
    ) -> (Vec<PreparedRecord>, GeocodeReport) {
        let keys: Vec<String> = records.iter().map(full_address_key).collect();

        let cache = self.store.load().await;
        let queried = keys.iter().map(String::as_str).filter(|k| !k.is_empty());
        let distinct = queried.clone().collect::<HashSet<_>>().len();
        let missing = cache.lookup_missing(queried);

        log::info!(
            "{} records, {} distinct addresses, {} not cached",
            records.len(),
            distinct,
            missing.len()
        );

        let resolved = self.resolve(&missing).await;

        let mut coordinates: HashMap<&str, (f64, f64)> = cache
            .entries()
            .iter()
            .map(|e| (e.address_key.as_str(), (e.lat, e.lng)))
            .collect();
        for entry in &resolved {
            coordinates
                .entry(entry.address_key.as_str())
                .or_insert((entry.lat, entry.lng));
        }

        let mut report = GeocodeReport {
            records: records.len(),
            cache_hits: distinct - missing.len(),
            missing: missing.len(),
            resolved: resolved.len(),
            ..GeocodeReport::default()
        };

        let prepared: Vec<PreparedRecord> = records
            .into_iter()
            .zip(&keys)
            .map(|(record, key)| {
                let mut prepared = PreparedRecord::new(record);
                if let Some((lat, lng)) = coordinates.get(key.as_str()) {
                    prepared.lat = Some(*lat);
                    prepared.lng = Some(*lng);
                }
                prepared
            })
            .collect();
        report.unresolved_records = prepared.iter().filter(|r| !r.has_coordinates()).count();

        if !resolved.is_empty() {
            match self.store.persist(&resolved).await {
                Ok(outcome) => report.persist = Some(outcome),
                Err(e) => {
                    log::error!(
                        "Failed to persist {} geocoding results to {}: {e}",
                        resolved.len(),
                        self.store.describe()
                    );
                    report.persist_error = Some(e.to_string());
                }
            }
        }

        (prepared, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use async_trait::async_trait;
    use shop_map_storage::lock::LockOptions;
    use shop_map_storage::{FileLock, LocalBackend};

    use crate::{GeocodeError, GeocodedAddress, GeocodingProvider};

    struct FakeService {
        answers: HashMap<String, (f64, f64)>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeService {
        fn new(answers: &[(&str, (f64, f64))]) -> Self {
            Self {
                answers: answers
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), *v))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GeocodingService for FakeService {
        async fn geocode(&self, address: &str) -> Result<Option<GeocodedAddress>, GeocodeError> {
            self.calls.lock().unwrap().push(address.to_string());
            if address.contains("故障") {
                return Err(GeocodeError::RateLimited);
            }
            Ok(self.answers.get(address).map(|(lat, lng)| GeocodedAddress {
                latitude: *lat,
                longitude: *lng,
                matched_address: None,
                provider: GeocodingProvider::Nominatim,
            }))
        }

        fn provider(&self) -> GeocodingProvider {
            GeocodingProvider::Nominatim
        }
    }

    fn store(dir: &std::path::Path) -> GeoCacheStore {
        let path = dir.join("geocoding_cache.csv");
        GeoCacheStore::new(
            Arc::new(LocalBackend::new(&path)),
            FileLock::for_target(&path, LockOptions::default()),
        )
    }

    fn record(address: &str) -> RawRecord {
        RawRecord {
            name: "店".to_string(),
            address: address.to_string(),
            city: "台北市".to_string(),
            district: "士林區".to_string(),
            ..RawRecord::default()
        }
    }

    #[tokio::test]
    async fn resolves_missing_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(FakeService::new(&[("台北市士林區中正路1號", (25.09, 121.52))]));
        let geocoder = Geocoder::new(Some(service.clone()), store(dir.path()));

        let (prepared, report) = geocoder
            .geocode_partition(vec![record("中正路1號"), record("中正路1號"), record("不明路")])
            .await;

        assert_eq!(prepared.len(), 3);
        assert_eq!(prepared[0].lat, Some(25.09));
        assert_eq!(prepared[1].lng, Some(121.52));
        assert!(!prepared[2].has_coordinates());
        assert_eq!(report.missing, 2);
        assert_eq!(report.resolved, 1);
        assert_eq!(report.unresolved_records, 1);
        assert_eq!(report.persist, Some(PersistOutcome::Written { added: 1, total: 1 }));
        // One call per distinct address.
        assert_eq!(service.calls().len(), 2);

        let cache = store(dir.path()).load().await;
        assert!(cache.get("台北市士林區中正路1號").is_some());
    }

    #[tokio::test]
    async fn cached_addresses_skip_the_service() {
        let dir = tempfile::tempdir().unwrap();
        store(dir.path())
            .persist(&[GeoCacheEntry {
                address_key: "台北市士林區中正路1號".to_string(),
                lat: 1.0,
                lng: 2.0,
            }])
            .await
            .unwrap();

        let service = Arc::new(FakeService::new(&[]));
        let geocoder = Geocoder::new(Some(service.clone()), store(dir.path()));
        let (prepared, report) = geocoder.geocode_partition(vec![record("中正路1號")]).await;

        assert_eq!(prepared[0].lat, Some(1.0));
        assert_eq!(report.cache_hits, 1);
        assert!(report.persist.is_none());
        assert!(service.calls().is_empty());
    }

    #[tokio::test]
    async fn service_errors_leave_records_unresolved() {
        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(FakeService::new(&[]));
        let geocoder = Geocoder::new(Some(service), store(dir.path()));

        let (prepared, report) = geocoder.geocode_partition(vec![record("故障路")]).await;

        assert!(!prepared[0].has_coordinates());
        assert_eq!(report.resolved, 0);
        assert!(report.persist.is_none());
    }

    #[tokio::test]
    async fn without_service_only_cache_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let geocoder = Geocoder::new(None, store(dir.path()));

        let (prepared, report) = geocoder.geocode_partition(vec![record("中正路1號")]).await;

        assert!(!prepared[0].has_coordinates());
        assert_eq!(report.missing, 1);
        assert_eq!(report.resolved, 0);
    }

    #[tokio::test]
    async fn resolve_drops_no_result_addresses() {
        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(FakeService::new(&[("a", (1.0, 1.0))]));
        let geocoder = Geocoder::new(Some(service), store(dir.path()));

        let entries = geocoder.resolve(&["a".to_string(), "b".to_string()]).await;

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].address_key, "a");
    }
}
