//! Runtime configuration assembled from environment variables.
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `SHOP_MAP_DATA_DIR` | Root of snapshots, cache, and canonical files | `data` |
//! | `SHOP_MAP_SOURCE_DIR` | Directory of pre-scraped partition CSVs | `{data}/source` |
//! | `SHOP_MAP_GEOCACHE` | Where the geocoding cache lives (`local` or `r2`) | `local` |
//! | `SHOP_MAP_LOCK_TIMEOUT_SECS` | Lock wait budget | `30` |
//! | `SHOP_MAP_LOCK_STALE_SECS` | Age at which a lock is considered abandoned | never |
//! | `SHOP_MAP_GEOCODE_ATTEMPTS` | Attempts per geocoding call | `1` |
//! | `SHOP_MAP_GEOCODE_RETRY_SECS` | Pause between geocoding attempts | `1` |
//! | `GEOCODER_PROVIDER` | `google` or `nominatim` | `google` with a key, else `nominatim` |
//! | `GOOGLE_API_KEY` | Google Geocoding and Gemini key | none |
//! | `NOMINATIM_URL` | Nominatim base URL override | public instance |
//! | `AI_PROVIDER` | `gemini` or `openai` | `gemini` |
//! | `AI_MODEL` | Model override | provider default |
//! | `OPENAI_API_KEY` | `OpenAI` key | none |
//! | `AI_BASE_URL` | Base URL for self-hosted `OpenAI`-compatible servers | none |
//!
//! Blob store settings (`BUCKET_NAME`, `S3_ENDPOINT_URL` or
//! `CLOUDFLARE_ACCOUNT_ID`, `R2_ACCESS_KEY_ID`, `R2_SECRET_ACCESS_KEY`) are
//! read by `shop_map_r2`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use shop_map_enrich::{AiProvider, ProviderConfig};
use shop_map_geocoder::{GeocoderConfig, GeocodingProvider};
use shop_map_storage::lock::{DEFAULT_POLL, DEFAULT_TIMEOUT};
use shop_map_storage::{DataLayout, LockOptions};

use crate::PipelineError;

/// Where the shared geocoding cache is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLocation {
    /// `geocoding_cache.csv` under the data directory.
    Local,
    /// The blob store object of the same name, guarded by the local lock.
    Blob,
}

/// Knobs with defaults matching the production runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tunables {
    /// Records per generative call.
    pub chunk_size: usize,
    /// Pause between chunks.
    pub chunk_delay: Duration,
    /// Attempts per chunk.
    pub chunk_attempts: u32,
    /// Pause between chunk attempts.
    pub chunk_retry_delay: Duration,
    /// Attempts per geocoding call.
    pub geocode_attempts: u32,
    /// Pause between geocoding attempts.
    pub geocode_retry_delay: Duration,
    /// Pause after every geocoding call. `None` uses the provider's rate
    /// limit.
    pub geocode_delay: Option<Duration>,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            chunk_size: shop_map_enrich::DEFAULT_CHUNK_SIZE,
            chunk_delay: shop_map_enrich::DEFAULT_CHUNK_DELAY,
            chunk_attempts: 3,
            chunk_retry_delay: Duration::from_secs(2),
            geocode_attempts: 1,
            geocode_retry_delay: Duration::from_secs(1),
            geocode_delay: None,
        }
    }
}

/// Everything needed to build a [`crate::Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Data directory layout.
    pub layout: DataLayout,
    /// Directory of pre-scraped partition CSVs.
    pub source_dir: PathBuf,
    /// Where the geocoding cache lives.
    pub cache_location: CacheLocation,
    /// Lock timing for the cache and snapshots.
    pub lock: LockOptions,
    /// Geocoding provider settings.
    pub geocoder: GeocoderConfig,
    /// Generative provider settings.
    pub ai: ProviderConfig,
    /// Tunables.
    pub tunables: Tunables,
}

impl PipelineConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if a variable holds an invalid
    /// value.
    pub fn from_env() -> Result<Self, PipelineError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if a variable holds an invalid
    /// value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PipelineError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let data_dir = PathBuf::from(get("SHOP_MAP_DATA_DIR").unwrap_or_else(|| "data".to_string()));
        let source_dir = get("SHOP_MAP_SOURCE_DIR").map_or_else(|| data_dir.join("source"), PathBuf::from);

        let cache_location = match get("SHOP_MAP_GEOCACHE").as_deref() {
            None | Some("local") => CacheLocation::Local,
            Some("r2" | "blob") => CacheLocation::Blob,
            Some(other) => {
                return Err(invalid("SHOP_MAP_GEOCACHE", other, "expected local or r2"));
            }
        };

        let lock = LockOptions {
            poll: DEFAULT_POLL,
            timeout: parse_secs(get("SHOP_MAP_LOCK_TIMEOUT_SECS"), "SHOP_MAP_LOCK_TIMEOUT_SECS")?
                .unwrap_or(DEFAULT_TIMEOUT),
            stale_after: parse_secs(get("SHOP_MAP_LOCK_STALE_SECS"), "SHOP_MAP_LOCK_STALE_SECS")?,
        };

        let mut tunables = Tunables::default();
        if let Some(value) = get("SHOP_MAP_GEOCODE_ATTEMPTS") {
            tunables.geocode_attempts = value
                .trim()
                .parse()
                .map_err(|_| invalid("SHOP_MAP_GEOCODE_ATTEMPTS", &value, "expected a count"))?;
        }
        if let Some(delay) = parse_secs(
            get("SHOP_MAP_GEOCODE_RETRY_SECS"),
            "SHOP_MAP_GEOCODE_RETRY_SECS",
        )? {
            tunables.geocode_retry_delay = delay;
        }

        let google_api_key = get("GOOGLE_API_KEY");
        let mut geocoder = GeocoderConfig::auto(google_api_key.clone());
        if let Some(value) = get("GEOCODER_PROVIDER") {
            geocoder.provider = GeocodingProvider::from_str(&value)
                .map_err(|_| invalid("GEOCODER_PROVIDER", &value, "expected google or nominatim"))?;
        }
        if geocoder.provider == GeocodingProvider::Nominatim {
            geocoder.base_url = get("NOMINATIM_URL");
        }

        let provider = match get("AI_PROVIDER") {
            Some(value) => AiProvider::from_str(&value)
                .map_err(|_| invalid("AI_PROVIDER", &value, "expected gemini or openai"))?,
            None => AiProvider::Gemini,
        };
        let ai = ProviderConfig {
            provider,
            model: get("AI_MODEL"),
            api_key: match provider {
                AiProvider::Gemini => google_api_key,
                AiProvider::OpenAi => get("OPENAI_API_KEY"),
            },
            base_url: get("AI_BASE_URL"),
        };

        Ok(Self {
            layout: DataLayout::new(data_dir),
            source_dir,
            cache_location,
            lock,
            geocoder,
            ai,
            tunables,
        })
    }
}

fn parse_secs(value: Option<String>, name: &str) -> Result<Option<Duration>, PipelineError> {
    value
        .map(|v| {
            v.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| invalid(name, &v, "expected whole seconds"))
        })
        .transpose()
}

fn invalid(name: &str, value: &str, hint: &str) -> PipelineError {
    PipelineError::Config {
        message: format!("Invalid {name}={value:?}: {hint}"),
    }
}
