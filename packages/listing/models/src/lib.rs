#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Listing record types shared by every stage of the shop map pipeline.
//!
//! Records move through three typed stages:
//!
//! 1. [`RawRecord`]: a row as produced by the upstream listing feed,
//!    cleaned in place by the normalizer.
//! 2. [`PreparedRecord`]: a cleaned record with coordinates (when the
//!    address could be resolved) and locally inferred hidden tags. This is
//!    what the `raw` partition snapshot stores.
//! 3. [`EnrichedRecord`]: a record rebuilt from the generative service's
//!    response table. This is what the `final` partition snapshot and the
//!    canonical dataset store.

pub mod catalog;
pub mod partition;
pub mod price;
pub mod progress;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub use partition::{PartitionKey, PartitionKeyError, SnapshotRole, decode_snapshot_id};

/// A listing row as scraped for one partition.
///
/// All fields are plain strings; a field the feed did not provide is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Merchant name.
    pub name: String,
    /// Street address.
    pub address: String,
    /// Phone number, possibly with a `#` extension.
    pub phone: String,
    /// District display name.
    pub district: String,
    /// City display name.
    pub city: String,
    /// Industry label as reported by the feed.
    pub industry_label: String,
}

/// A cleaned, geocoded and tagged record (the `raw` snapshot schema).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreparedRecord {
    /// The cleaned source fields.
    #[serde(flatten)]
    pub record: RawRecord,
    /// Latitude (WGS84). `None` when the address could not be resolved.
    pub lat: Option<f64>,
    /// Longitude (WGS84). `None` when the address could not be resolved.
    pub lng: Option<f64>,
    /// Brand keys inferred from the merchant name.
    #[serde(default)]
    pub hidden_tags: BTreeSet<String>,
}

impl PreparedRecord {
    /// Wraps a cleaned record with no coordinates and no tags.
    #[must_use]
    pub const fn new(record: RawRecord) -> Self {
        Self {
            record,
            lat: None,
            lng: None,
            hidden_tags: BTreeSet::new(),
        }
    }

    /// Returns `true` if both coordinates are set.
    #[must_use]
    pub const fn has_coordinates(&self) -> bool {
        self.lat.is_some() && self.lng.is_some()
    }
}

/// A resolved address stored in the shared geocoding cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoCacheEntry {
    /// The fully composed address used as the lookup key.
    pub address_key: String,
    /// Latitude (WGS84).
    pub lat: f64,
    /// Longitude (WGS84).
    pub lng: f64,
}

/// A record produced by the enrichment stage (the `final` snapshot schema).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    /// The synthetic per-chunk identifier echoed back by the service.
    pub id: String,
    /// Merchant name.
    pub name: String,
    /// Industry display name.
    pub ind: String,
    /// City display name.
    pub city: String,
    /// District display name.
    pub district: String,
    /// Street address without the floor.
    pub address: String,
    /// Floor, when the service split it out of the address.
    #[serde(default)]
    pub floor: String,
    /// Latitude (WGS84).
    pub lat: Option<f64>,
    /// Longitude (WGS84).
    pub lng: Option<f64>,
    /// Phone number as formatted by the service.
    pub phone: String,
    /// Short review summary written by the service.
    #[serde(default)]
    pub review_summary: String,
    /// Rating, usually in `"4.5/5"` form.
    #[serde(default)]
    pub rating: String,
    /// Price level: a number for lodging/dining, a tier label otherwise.
    #[serde(default)]
    pub price_level: String,
    /// Brand keys inferred locally from the source record's name.
    #[serde(default)]
    pub hidden_tags: BTreeSet<String>,
}

impl EnrichedRecord {
    /// Parses the numeric part of [`Self::rating`] (`"4.5/5"` → `4.5`).
    ///
    /// Returns `None` when the rating is blank or not numeric.
    #[must_use]
    pub fn rating_value(&self) -> Option<f64> {
        self.rating
            .split('/')
            .next()
            .and_then(|s| s.trim().parse::<f64>().ok())
    }

    /// Parses [`Self::price_level`] as a number.
    ///
    /// Thousands separators are ignored. Tier labels yield `None`.
    #[must_use]
    pub fn price_value(&self) -> Option<f64> {
        let cleaned: String = self
            .price_level
            .chars()
            .filter(|c| *c != ',' && !c.is_whitespace())
            .collect();
        cleaned.parse::<f64>().ok()
    }
}
