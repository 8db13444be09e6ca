#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Cleaning and de-duplication of scraped listing rows.
//!
//! Upstream rows mix fullwidth and halfwidth characters, spell the same
//! road segment several ways, and repeat the city and district inside the
//! address. [`clean_records`] rewrites every field into one canonical form
//! and drops rows that describe the same merchant twice.
//!
//! The [`tags`] module infers brand keys from merchant names.

pub mod synonyms;
pub mod tags;
pub mod text;

use std::collections::HashSet;

use shop_map_listing_models::RawRecord;

pub use text::{clean_address, clean_phone, clean_text, digits_only};

/// Cleans every field of every record, then drops duplicates.
///
/// Deterministic and total: any input yields a (possibly shorter) list, and
/// the surviving records keep their relative order.
#[must_use]
pub fn clean_records(records: Vec<RawRecord>) -> Vec<RawRecord> {
    let before = records.len();
    let cleaned: Vec<RawRecord> = records.into_iter().map(clean_record).collect();
    let deduped = dedup_records(cleaned);

    if deduped.len() < before {
        log::debug!(
            "Normalizer dropped {} duplicate rows ({before} -> {})",
            before - deduped.len(),
            deduped.len()
        );
    }

    deduped
}

/// Cleans a single record's fields.
#[must_use]
pub fn clean_record(record: RawRecord) -> RawRecord {
    let city = clean_text(&record.city);
    let district = clean_text(&record.district);
    let address = clean_address(&record.address, &city, &district);

    RawRecord {
        name: clean_text(&record.name),
        address,
        phone: clean_phone(&record.phone),
        district,
        city,
        industry_label: clean_text(&record.industry_label),
    }
}

/// Identity of a record within one partition: phone digits plus the
/// normalized address.
///
/// The phone's extension digits are part of the key, so two branches that
/// share a switchboard but differ by extension stay distinct.
#[must_use]
pub fn dedup_key(record: &RawRecord) -> String {
    format!("{}_{}", digits_only(&record.phone), record.address)
}

/// Keeps the first record for every [`dedup_key`].
#[must_use]
pub fn dedup_records(records: Vec<RawRecord>) -> Vec<RawRecord> {
    let mut seen = HashSet::with_capacity(records.len());
    records
        .into_iter()
        .filter(|record| seen.insert(dedup_key(record)))
        .collect()
}
