//! Hidden brand tags inferred from merchant names.
//!
//! A merchant named `星巴克信義店` should be findable by searching for
//! `starbucks`. [`find_tags`] maps a name onto the brand keys of
//! [`SYNONYMS`] with an exact token pass and a fuzzy fallback for
//! near-miss spellings.

use std::collections::BTreeSet;

use shop_map_listing_models::PreparedRecord;

use crate::synonyms::SYNONYMS;

/// Minimum [`partial_ratio`] for a fuzzy brand match.
pub const FUZZY_THRESHOLD: f64 = 80.0;

/// Returns the brand keys matching `name`.
///
/// For each brand, a match is any alias token contained in the lower-cased
/// name. Brands without a token match fall back to comparing the name
/// against the whole alias string with [`partial_ratio`].
#[must_use]
pub fn find_tags(name: &str) -> BTreeSet<String> {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return BTreeSet::new();
    }

    SYNONYMS
        .iter()
        .filter(|(_, aliases)| {
            aliases.split_whitespace().any(|token| name.contains(token))
                || partial_ratio(&name, aliases) >= FUZZY_THRESHOLD
        })
        .map(|(key, _)| (*key).to_string())
        .collect()
}

/// Fills `hidden_tags` of every record from its name.
pub fn annotate(records: &mut [PreparedRecord]) {
    for prepared in records {
        prepared.hidden_tags = find_tags(&prepared.record.name);
    }
}

/// Best similarity (0-100) between the shorter string and any window of
/// the longer one with the same length in characters.
///
/// Similarity is normalized Levenshtein distance. Empty input scores 0.
#[must_use]
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };

    if short.is_empty() {
        return 0.0;
    }

    let needle: String = short.iter().collect();
    long.windows(short.len())
        .map(|window| {
            let window: String = window.iter().collect();
            strsim::normalized_levenshtein(&needle, &window)
        })
        .fold(0.0_f64, f64::max)
        * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use shop_map_listing_models::RawRecord;

    #[test]
    fn token_match_tags_brand() {
        assert_eq!(
            find_tags("星巴克信義店"),
            BTreeSet::from(["starbucks".to_string()])
        );
    }

    #[test]
    fn token_match_is_case_insensitive() {
        assert!(find_tags("HAMA壽司 南港店").contains("hama"));
        assert!(find_tags("統一超商 天母門市").contains("7-eleven"));
    }

    #[test]
    fn fuzzy_match_catches_near_miss() {
        // one substituted character in a five character alias
        assert!(find_tags("台灣壽司朗").contains("sushiro"));
    }

    #[test]
    fn unrelated_name_has_no_tags() {
        assert!(find_tags("無關小店").is_empty());
        assert!(find_tags("").is_empty());
        assert!(find_tags("   ").is_empty());
    }

    #[test]
    fn partial_ratio_scores_substrings() {
        assert!((partial_ratio("abc", "xxabcxx") - 100.0).abs() < f64::EPSILON);
        assert!((partial_ratio("abcd", "xxabcexx") - 75.0).abs() < 1e-9);
        assert!(partial_ratio("", "abc").abs() < f64::EPSILON);
    }

    #[test]
    fn annotate_fills_tags() {
        let mut records = vec![
            PreparedRecord::new(RawRecord {
                name: "全家便利商店".to_string(),
                ..RawRecord::default()
            }),
            PreparedRecord::new(RawRecord {
                name: "阿明麵店".to_string(),
                ..RawRecord::default()
            }),
        ];

        annotate(&mut records);

        assert!(records[0].hidden_tags.contains("family"));
        assert!(records[1].hidden_tags.is_empty());
    }
}
