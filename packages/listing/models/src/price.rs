//! Price level buckets.
//!
//! Enriched records carry a raw price (nightly rate, per-person average) or,
//! for industries where the service cannot give a number, a tier value.
//! Consumers filter by a 1-5 level; these thresholds map prices onto it.

use serde::{Deserialize, Serialize};

/// Bound used to pad a threshold table with fewer than four entries.
pub const UNBOUNDED: f64 = 999_999.0;

/// Highest price level.
pub const MAX_LEVEL: u8 = 5;

/// Upper bounds of price levels 1 to 4.
///
/// A price `p` is level 1 when `0 < p < t0`, level `k + 1` when
/// `t[k-1] <= p < t[k]`, and level 5 when `p >= t3`. Non-positive prices have
/// no level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceThresholds([f64; 4]);

impl Default for PriceThresholds {
    fn default() -> Self {
        Self([200.0, 500.0, 1000.0, 2000.0])
    }
}

impl PriceThresholds {
    /// Builds thresholds from configured bounds, padding with
    /// [`UNBOUNDED`] and ignoring anything past the fourth bound.
    #[must_use]
    pub fn from_bounds(bounds: &[u32]) -> Self {
        let mut out = [UNBOUNDED; 4];
        for (slot, bound) in out.iter_mut().zip(bounds) {
            *slot = f64::from(*bound);
        }
        Self(out)
    }

    /// The four bounds.
    #[must_use]
    pub const fn bounds(&self) -> [f64; 4] {
        self.0
    }

    /// The level (1-5) of `price`, or `None` for non-positive prices.
    #[must_use]
    pub fn bucket(&self, price: f64) -> Option<u8> {
        if price.is_nan() || price <= 0.0 {
            return None;
        }
        let below = self.0.iter().position(|bound| price < *bound);
        // position is at most 3, so the level fits in 1..=4
        Some(below.map_or(MAX_LEVEL, |idx| u8::try_from(idx + 1).unwrap_or(MAX_LEVEL)))
    }

    /// Whether `price` belongs to `level`.
    ///
    /// Besides the threshold range, a price equal to the level itself
    /// matches, since the service sometimes answers with the tier instead of
    /// an amount.
    #[must_use]
    pub fn matches_level(&self, price: f64, level: u8) -> bool {
        if level == 0 {
            return false;
        }
        let level = level.min(MAX_LEVEL);
        self.bucket(price) == Some(level) || (price - f64::from(level)).abs() < f64::EPSILON
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_default_prices() {
        let t = PriceThresholds::from_bounds(&[200, 500, 1000, 2000]);
        assert_eq!(t.bucket(350.0), Some(2));
        assert_eq!(t.bucket(1999.0), Some(4));
        assert_eq!(t.bucket(5000.0), Some(5));
        assert_eq!(t.bucket(199.0), Some(1));
        assert_eq!(t.bucket(200.0), Some(2));
    }

    #[test]
    fn non_positive_price_has_no_bucket() {
        let t = PriceThresholds::default();
        assert_eq!(t.bucket(0.0), None);
        assert_eq!(t.bucket(-1.0), None);
        assert_eq!(t.bucket(f64::NAN), None);
    }

    #[test]
    fn pads_short_threshold_lists() {
        let t = PriceThresholds::from_bounds(&[100, 300]);
        assert_eq!(t.bounds(), [100.0, 300.0, UNBOUNDED, UNBOUNDED]);
        assert_eq!(t.bucket(5000.0), Some(3));
    }

    #[test]
    fn literal_tier_matches_level() {
        let t = PriceThresholds::default();
        assert!(t.matches_level(2.0, 2));
        assert!(t.matches_level(350.0, 2));
        assert!(!t.matches_level(350.0, 3));
        // tier 2 is also a level-1 price under the default bounds
        assert!(t.matches_level(2.0, 1));
        assert!(t.matches_level(5.0, 5));
        assert!(!t.matches_level(6.0, 5));
        assert!(!t.matches_level(350.0, 0));
    }
}
