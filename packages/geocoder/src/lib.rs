#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geocoding for shop listings.
//!
//! Converts cleaned listing addresses to latitude/longitude through one of
//! two providers configured via TOML files in `services/`:
//!
//! 1. **Google Geocoding API**: needs `GOOGLE_API_KEY`; biased to Taiwan
//!    and Traditional Chinese.
//! 2. **Nominatim / OpenStreetMap**: free, 1 req/sec on the public
//!    instance.
//!
//! Every lookup goes through the shared cache first; see [`resolver`].

pub mod address;
pub mod google;
pub mod nominatim;
pub mod resolver;
pub mod service_registry;

use std::sync::Arc;

use async_trait::async_trait;
use strum_macros::{Display, EnumString};
use thiserror::Error;

use crate::service_registry::ProviderConfig;

pub use address::full_address_key;
pub use resolver::{GeocodeReport, Geocoder};

/// A geocoding result.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodedAddress {
    /// Latitude (WGS84).
    pub latitude: f64,
    /// Longitude (WGS84).
    pub longitude: f64,
    /// The matched/canonical address returned by the geocoder.
    pub matched_address: Option<String>,
    /// Which provider resolved this address.
    pub provider: GeocodingProvider,
}

/// Which geocoding provider resolved an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum GeocodingProvider {
    /// Google Geocoding API.
    Google,
    /// Nominatim / OpenStreetMap.
    Nominatim,
}

/// Errors from geocoding operations.
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response parsing failed.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the parsing failure.
        message: String,
    },

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// The service rejected the request (bad key, quota, etc.).
    #[error("{provider} rejected the request: {status}")]
    Rejected {
        /// Which provider answered.
        provider: GeocodingProvider,
        /// Status reported by the service.
        status: String,
    },

    /// The selected provider needs a credential that is not configured.
    #[error("Missing credential: {name}")]
    MissingCredential {
        /// Name of the missing setting.
        name: String,
    },
}

/// A service that turns one address into coordinates.
#[async_trait]
pub trait GeocodingService: Send + Sync {
    /// Geocodes a single free-form address. `Ok(None)` means the service
    /// answered but found nothing.
    async fn geocode(&self, address: &str) -> Result<Option<GeocodedAddress>, GeocodeError>;

    /// Which provider this is.
    fn provider(&self) -> GeocodingProvider;
}

/// Which provider to use and how to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeocoderConfig {
    /// Selected provider.
    pub provider: GeocodingProvider,
    /// Google API key (required for [`GeocodingProvider::Google`]).
    pub google_api_key: Option<String>,
    /// Override of the provider's base URL.
    pub base_url: Option<String>,
}

impl GeocoderConfig {
    /// Picks Google when a key is present, Nominatim otherwise.
    #[must_use]
    pub fn auto(google_api_key: Option<String>) -> Self {
        let provider = if google_api_key.is_some() {
            GeocodingProvider::Google
        } else {
            GeocodingProvider::Nominatim
        };
        Self {
            provider,
            google_api_key,
            base_url: None,
        }
    }
}

/// Builds the configured service.
///
/// Base URLs, request settings, and pacing default to the embedded
/// `services/*.toml` entry of the provider.
///
/// # Errors
///
/// Returns [`GeocodeError::MissingCredential`] if Google is selected
/// without an API key, or [`GeocodeError::Http`] if the HTTP client cannot
/// be built.
pub fn create_service(
    config: &GeocoderConfig,
) -> Result<Arc<dyn GeocodingService>, GeocodeError> {
    let entry = service_registry::service(config.provider);
    let base_url = config
        .base_url
        .clone()
        .unwrap_or_else(|| entry.base_url().to_string());

    let service: Arc<dyn GeocodingService> = match &entry.provider {
        ProviderConfig::Google {
            language, region, ..
        } => {
            let api_key = config
                .google_api_key
                .clone()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| GeocodeError::MissingCredential {
                    name: "GOOGLE_API_KEY".to_string(),
                })?;
            Arc::new(google::GoogleGeocoder::new(
                base_url,
                api_key,
                language.clone(),
                region.clone(),
            )?)
        }
        ProviderConfig::Nominatim { country_code, .. } => Arc::new(
            nominatim::NominatimGeocoder::new(base_url, country_code.clone())?,
        ),
    };

    log::info!("Using geocoding provider: {}", entry.name);
    Ok(service)
}

/// Minimum pause between requests to `provider`, from its registry entry.
#[must_use]
pub fn default_call_delay(provider: GeocodingProvider) -> std::time::Duration {
    service_registry::service(provider).rate_limit()
}

/// Builds the shared HTTP client for geocoding requests.
fn http_client() -> Result<reqwest::Client, GeocodeError> {
    Ok(reqwest::Client::builder()
        .user_agent(concat!("shop-map/", env!("CARGO_PKG_VERSION")))
        .timeout(std::time::Duration::from_secs(30))
        .build()?)
}
