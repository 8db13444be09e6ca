//! Geocoding query keys.
//!
//! Cleaned addresses have their city and district prefixes stripped so
//! that duplicates compare equal. Geocoding needs them back: the query and
//! the cache key is the address with district and city prepended.

use shop_map_listing_models::RawRecord;

/// The fully qualified address used as the geocoding query and cache key.
///
/// Prepends the district, then the city, unless the address already starts
/// with them.
#[must_use]
pub fn full_address_key(record: &RawRecord) -> String {
    compose(&record.address, &record.city, &record.district)
}

fn compose(address: &str, city: &str, district: &str) -> String {
    let mut full = address.to_string();
    if !district.is_empty() && !full.starts_with(district) {
        full.insert_str(0, district);
    }
    if !city.is_empty() && !full.starts_with(city) {
        full.insert_str(0, city);
    }
    full
}
