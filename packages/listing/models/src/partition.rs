//! Partition keys and snapshot identifiers.
//!
//! A partition is the unit of work: one `(city, district, industry)` code
//! triple. Each partition owns up to two snapshots whose identifiers encode
//! the role and the triple, e.g. `final_001_111_0009`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Separator between the parts of a snapshot identifier.
const SEPARATOR: char = '_';

/// Errors from constructing or decoding partition keys.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartitionKeyError {
    /// A code was empty or contained characters other than ASCII
    /// alphanumerics.
    #[error("Invalid {field} code: {value:?}")]
    InvalidCode {
        /// Which code was rejected (`city`, `district`, `industry`).
        field: &'static str,
        /// The rejected value.
        value: String,
    },

    /// The identifier did not have the `{role}_{city}_{district}_{industry}`
    /// shape.
    #[error("Malformed snapshot identifier: {identifier:?}")]
    Malformed {
        /// The rejected identifier.
        identifier: String,
    },

    /// The identifier's role prefix is not a known snapshot role.
    #[error("Unknown snapshot role {role:?} in {identifier:?}")]
    UnknownRole {
        /// The unrecognized role.
        role: String,
        /// The full identifier.
        identifier: String,
    },
}

/// Which stage of a partition a snapshot holds.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SnapshotRole {
    /// Cleaned, geocoded and tagged records, before enrichment.
    Raw,
    /// Enriched records. Its presence marks the partition complete.
    Final,
}

/// The `(city, district, industry)` code triple naming one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    city_code: String,
    district_code: String,
    industry_code: String,
}

impl PartitionKey {
    /// Creates a key, validating each code.
    ///
    /// # Errors
    ///
    /// Returns [`PartitionKeyError::InvalidCode`] if any code is empty or
    /// contains anything other than ASCII letters and digits.
    pub fn new(
        city_code: impl Into<String>,
        district_code: impl Into<String>,
        industry_code: impl Into<String>,
    ) -> Result<Self, PartitionKeyError> {
        Ok(Self {
            city_code: validate_code("city", city_code.into())?,
            district_code: validate_code("district", district_code.into())?,
            industry_code: validate_code("industry", industry_code.into())?,
        })
    }

    /// City code (e.g. `"001"`).
    #[must_use]
    pub fn city_code(&self) -> &str {
        &self.city_code
    }

    /// District code (e.g. `"111"`).
    #[must_use]
    pub fn district_code(&self) -> &str {
        &self.district_code
    }

    /// Industry code (e.g. `"0009"`).
    #[must_use]
    pub fn industry_code(&self) -> &str {
        &self.industry_code
    }

    /// Renders `{city}_{district}_{industry}`.
    #[must_use]
    pub fn suffix(&self) -> String {
        format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            self.city_code, self.district_code, self.industry_code
        )
    }

    /// Renders the snapshot identifier for `role`.
    #[must_use]
    pub fn snapshot_id(&self, role: SnapshotRole) -> String {
        format!("{role}{SEPARATOR}{}", self.suffix())
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.suffix())
    }
}

/// Decodes a snapshot identifier into its role and partition key.
///
/// The identifier must split into exactly four `_`-separated parts. Extra or
/// missing parts are rejected rather than truncated.
///
/// # Errors
///
/// Returns [`PartitionKeyError`] if the identifier is malformed, the role is
/// unknown, or any code is invalid.
pub fn decode_snapshot_id(
    identifier: &str,
) -> Result<(SnapshotRole, PartitionKey), PartitionKeyError> {
    let parts: Vec<&str> = identifier.split(SEPARATOR).collect();
    let [role, city, district, industry] = parts.as_slice() else {
        return Err(PartitionKeyError::Malformed {
            identifier: identifier.to_string(),
        });
    };

    let role = SnapshotRole::from_str(role).map_err(|_| PartitionKeyError::UnknownRole {
        role: (*role).to_string(),
        identifier: identifier.to_string(),
    })?;

    let key = PartitionKey::new(*city, *district, *industry)?;
    Ok((role, key))
}

fn validate_code(field: &'static str, value: String) -> Result<String, PartitionKeyError> {
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(PartitionKeyError::InvalidCode { field, value });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> PartitionKey {
        PartitionKey::new("001", "111", "0009").unwrap()
    }

    #[test]
    fn encodes_snapshot_ids() {
        assert_eq!(key().snapshot_id(SnapshotRole::Raw), "raw_001_111_0009");
        assert_eq!(key().snapshot_id(SnapshotRole::Final), "final_001_111_0009");
        assert_eq!(key().to_string(), "001_111_0009");
    }

    #[test]
    fn decodes_snapshot_id() {
        let (role, decoded) = decode_snapshot_id("final_001_111_0009").unwrap();
        assert_eq!(role, SnapshotRole::Final);
        assert_eq!(decoded, key());
    }

    #[test]
    fn rejects_extra_parts() {
        assert!(matches!(
            decode_snapshot_id("final_001_111_0009_extra"),
            Err(PartitionKeyError::Malformed { .. })
        ));
    }

    #[test]
    fn rejects_missing_parts() {
        assert!(matches!(
            decode_snapshot_id("final_001_111"),
            Err(PartitionKeyError::Malformed { .. })
        ));
    }

    #[test]
    fn rejects_unknown_role() {
        assert!(matches!(
            decode_snapshot_id("draft_001_111_0009"),
            Err(PartitionKeyError::UnknownRole { .. })
        ));
    }

    #[test]
    fn rejects_empty_code() {
        assert!(matches!(
            decode_snapshot_id("raw_001__0009"),
            Err(PartitionKeyError::InvalidCode {
                field: "district",
                ..
            })
        ));
    }

    #[test]
    fn rejects_non_alphanumeric_code() {
        assert!(PartitionKey::new("001", "1-1", "0009").is_err());
        assert!(PartitionKey::new("001", "111", "00 9").is_err());
    }
}
