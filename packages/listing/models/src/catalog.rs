//! Compile-time catalog of partition codes and their display names.
//!
//! The catalog is defined in `catalog.toml` at the crate root and embedded
//! at compile time. Unknown codes resolve to the code itself so that a
//! partition scraped with a newer code still merges with a readable label.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use serde::Deserialize;

use crate::PartitionKey;
use crate::price::PriceThresholds;

/// Threshold table key used when an industry has no entry of its own.
pub const DEFAULT_THRESHOLDS_KEY: &str = "default";

const CATALOG_TOML: &str = include_str!("../catalog.toml");

static CATALOG: LazyLock<Catalog> = LazyLock::new(|| {
    Catalog::from_toml(CATALOG_TOML)
        .unwrap_or_else(|e| panic!("Failed to parse embedded catalog.toml: {e}"))
});

/// Code → display name tables plus per-industry price thresholds.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    cities: BTreeMap<String, String>,
    #[serde(default)]
    districts: BTreeMap<String, String>,
    #[serde(default)]
    industries: BTreeMap<String, String>,
    #[serde(default)]
    price_thresholds: BTreeMap<String, Vec<u32>>,
}

/// Display names for the three codes of a [`PartitionKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionLabels {
    /// City display name.
    pub city: String,
    /// District display name.
    pub district: String,
    /// Industry display name.
    pub industry: String,
}

/// Returns the embedded catalog.
///
/// # Panics
///
/// Panics on first use if the embedded `catalog.toml` is malformed (this is
/// a compile-time guarantee since the file is embedded).
#[must_use]
pub fn catalog() -> &'static Catalog {
    &CATALOG
}

impl Catalog {
    /// Parses a catalog from TOML text.
    ///
    /// # Errors
    ///
    /// Returns a [`toml::de::Error`] if the text is not a valid catalog.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::de::from_str(text)
    }

    /// City display name for `code`, or `code` itself if unknown.
    #[must_use]
    pub fn city_name<'a>(&'a self, code: &'a str) -> &'a str {
        self.cities.get(code).map_or(code, String::as_str)
    }

    /// District display name for `code`, or `code` itself if unknown.
    #[must_use]
    pub fn district_name<'a>(&'a self, code: &'a str) -> &'a str {
        self.districts.get(code).map_or(code, String::as_str)
    }

    /// Industry display name for `code`, or `code` itself if unknown.
    #[must_use]
    pub fn industry_name<'a>(&'a self, code: &'a str) -> &'a str {
        self.industries.get(code).map_or(code, String::as_str)
    }

    /// Resolves all three display names of a partition.
    #[must_use]
    pub fn labels(&self, key: &PartitionKey) -> PartitionLabels {
        PartitionLabels {
            city: self.city_name(key.city_code()).to_string(),
            district: self.district_name(key.district_code()).to_string(),
            industry: self.industry_name(key.industry_code()).to_string(),
        }
    }

    /// Known city codes, in code order.
    pub fn city_codes(&self) -> impl Iterator<Item = &str> {
        self.cities.keys().map(String::as_str)
    }

    /// Known district codes, in code order.
    pub fn district_codes(&self) -> impl Iterator<Item = &str> {
        self.districts.keys().map(String::as_str)
    }

    /// Known industry codes, in code order.
    pub fn industry_codes(&self) -> impl Iterator<Item = &str> {
        self.industries.keys().map(String::as_str)
    }

    /// Price thresholds for an industry display name, falling back to the
    /// `default` table.
    #[must_use]
    pub fn price_thresholds(&self, industry_name: &str) -> PriceThresholds {
        self.price_thresholds
            .get(industry_name)
            .or_else(|| self.price_thresholds.get(DEFAULT_THRESHOLDS_KEY))
            .map_or_else(PriceThresholds::default, |bounds| {
                PriceThresholds::from_bounds(bounds)
            })
    }
}
