//! Field-level normalization rules.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Leading county or city prefix (e.g. `台北市`, `新竹縣`).
static COUNTY_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.{2,3}[縣市]").expect("valid regex"));

/// Leading township or district prefix (e.g. `士林區`, `竹北市`).
static DISTRICT_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.{2,4}[鄉鎮市區]").expect("valid regex"));

/// Leading village or neighborhood prefix (e.g. `天母里`).
static VILLAGE_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.{2,4}[村里]").expect("valid regex"));

/// Road segment ordinals written as Chinese numerals.
const SEGMENT_ORDINALS: &[(&str, &str)] = &[
    ("一段", "1段"),
    ("二段", "2段"),
    ("三段", "3段"),
    ("四段", "4段"),
    ("五段", "5段"),
    ("六段", "6段"),
    ("七段", "7段"),
    ("八段", "8段"),
    ("九段", "9段"),
    ("十段", "10段"),
];

/// Characters that join house-number ranges (`1至3號`, `5之1號`).
const RANGE_JOINERS: &[char] = &['至', '之'];

/// NFKC-normalizes `text`, removes ASCII and ideographic spaces, and
/// replaces the traditional `臺` with `台`.
#[must_use]
pub fn clean_text(text: &str) -> String {
    text.nfkc()
        .filter(|c| *c != ' ' && *c != '\u{3000}')
        .map(|c| if c == '臺' { '台' } else { c })
        .collect()
}

/// Normalizes an address for geocoding and de-duplication.
///
/// On top of [`clean_text`], rewrites road segment ordinals to digits, turns
/// range joiners into `-`, and strips leading city, district, and village
/// prefixes so that the same place scraped with and without them compares
/// equal.
#[must_use]
pub fn clean_address(address: &str, city: &str, district: &str) -> String {
    let mut text = clean_text(address);

    for (from, to) in SEGMENT_ORDINALS {
        if text.contains(from) {
            text = text.replace(from, to);
        }
    }
    text = text.replace(RANGE_JOINERS, "-");

    let mut rest = text.as_str();
    for prefix in [city, district] {
        if !prefix.is_empty() {
            rest = rest.strip_prefix(prefix).unwrap_or(rest);
        }
    }

    let mut out = rest.to_string();
    for re in [&*COUNTY_PREFIX_RE, &*DISTRICT_PREFIX_RE, &*VILLAGE_PREFIX_RE] {
        out = re.replace(&out, "").into_owned();
    }
    out
}

/// Normalizes a phone number.
///
/// Everything but digits is removed from the main number. If a `#`
/// extension separator is present, the text after the first `#` is kept
/// verbatim.
#[must_use]
pub fn clean_phone(phone: &str) -> String {
    let text: String = phone.nfkc().filter(|c| !c.is_whitespace()).collect();

    match text.split_once('#') {
        Some((main, ext)) => format!("{}#{ext}", digits_only(main)),
        None => digits_only(&text),
    }
}

/// Keeps only the ASCII digits of `text`.
#[must_use]
pub fn digits_only(text: &str) -> String {
    text.chars().filter(char::is_ascii_digit).collect()
}
