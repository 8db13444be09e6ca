//! Compile-time registry of geocoding service configurations.
//!
//! Each provider is defined in a TOML file under `services/`. The registry
//! embeds these at compile time; [`service`] returns the entry for a
//! provider, which supplies default base URLs and request pacing.

use std::time::Duration;

use serde::Deserialize;

use crate::GeocodingProvider;

/// A geocoding service configuration loaded from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceEntry {
    /// Unique identifier (`"google"`, `"nominatim"`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Preference order when no provider is configured explicitly.
    pub priority: u32,
    /// Provider-specific configuration.
    pub provider: ProviderConfig,
}

/// Provider-specific configuration, tagged by `type` in TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Google Geocoding API.
    Google {
        /// API endpoint.
        base_url: String,
        /// Response language (e.g. `"zh-TW"`).
        language: String,
        /// Region bias as a ccTLD (e.g. `"tw"`).
        region: String,
        /// Minimum delay between requests in milliseconds.
        rate_limit_ms: u64,
    },
    /// Nominatim / `OpenStreetMap` geocoder.
    Nominatim {
        /// API base URL (e.g., `"https://nominatim.openstreetmap.org/search"`).
        base_url: String,
        /// ISO country code for boundary filtering.
        country_code: String,
        /// Minimum delay between requests in milliseconds.
        rate_limit_ms: u64,
    },
}

impl ServiceEntry {
    /// Returns the provider's base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        match &self.provider {
            ProviderConfig::Google { base_url, .. } | ProviderConfig::Nominatim { base_url, .. } => {
                base_url
            }
        }
    }

    /// Minimum delay between consecutive requests.
    #[must_use]
    pub const fn rate_limit(&self) -> Duration {
        match &self.provider {
            ProviderConfig::Google { rate_limit_ms, .. }
            | ProviderConfig::Nominatim { rate_limit_ms, .. } => {
                Duration::from_millis(*rate_limit_ms)
            }
        }
    }
}

// ── Compile-time embedded TOML files ────────────────────────────────

const SERVICE_TOMLS: &[(&str, &str)] = &[
    ("google", include_str!("../services/google.toml")),
    ("nominatim", include_str!("../services/nominatim.toml")),
];

/// Returns all geocoding service configurations, sorted by priority.
///
/// # Panics
///
/// Panics if any TOML config is malformed (this is a compile-time guarantee
/// since the configs are embedded).
#[must_use]
pub fn all_services() -> Vec<ServiceEntry> {
    let mut services: Vec<ServiceEntry> = SERVICE_TOMLS
        .iter()
        .map(|(name, toml_str)| {
            toml::de::from_str(toml_str)
                .unwrap_or_else(|e| panic!("Failed to parse geocoding service '{name}': {e}"))
        })
        .collect();
    services.sort_by_key(|s| s.priority);
    services
}

/// Returns the configuration for `provider`.
///
/// # Panics
///
/// Panics if the embedded registry has no entry for `provider`, which the
/// tests rule out.
#[must_use]
pub fn service(provider: GeocodingProvider) -> ServiceEntry {
    let id = provider.to_string();
    all_services()
        .into_iter()
        .find(|s| s.id == id)
        .unwrap_or_else(|| panic!("No embedded geocoding service for '{id}'"))
}
