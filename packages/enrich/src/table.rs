//! Parsing of the `|`-delimited table the generative service answers with.

use std::sync::LazyLock;

use regex::Regex;

use crate::EnrichError;

/// Response columns, in order.
pub const COLUMNS: [&str; 12] = [
    "ID",
    "店名",
    "縣市",
    "行政區",
    "地址(不含樓層)",
    "樓層",
    "緯度",
    "經度",
    "電話",
    "評論",
    "星級數",
    "價格區間",
];

static TABLE_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)(ID\s*\|.*)").expect("valid regex"));

/// One parsed response row. Text fields are trimmed; blank means unknown.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableRow {
    /// Echoed temp id.
    pub id: String,
    /// Merchant name.
    pub name: String,
    /// City.
    pub city: String,
    /// District.
    pub district: String,
    /// Address without the floor.
    pub address: String,
    /// Floor.
    pub floor: String,
    /// Latitude, `None` when blank or not a number.
    pub lat: Option<f64>,
    /// Longitude, `None` when blank or not a number.
    pub lng: Option<f64>,
    /// Phone.
    pub phone: String,
    /// Review summary.
    pub review_summary: String,
    /// Rating.
    pub rating: String,
    /// Price level.
    pub price_level: String,
}

/// Removes Markdown code fences and surrounding whitespace.
#[must_use]
pub fn strip_fences(text: &str) -> String {
    text.replace("```csv", "").replace("```", "").trim().to_string()
}

/// Parses a service response into rows.
///
/// Fences are stripped and anything before the `ID|...` header line is
/// dropped. The header row is consumed. Short rows are padded with blanks.
///
/// # Errors
///
/// Returns [`EnrichError::MalformedResponse`] if a row has more than
/// twelve fields or the table cannot be read, and
/// [`EnrichError::EmptyResponse`] if it has no data rows.
pub fn parse_table(response: &str) -> Result<Vec<TableRow>, EnrichError> {
    let cleaned = strip_fences(response);
    let table = TABLE_START
        .captures(&cleaned)
        .and_then(|c| c.get(1))
        .map_or(cleaned.as_str(), |m| m.as_str());

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'|')
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(table.as_bytes());

    let mut rows = Vec::new();
    for (index, result) in reader.records().enumerate() {
        let record = result.map_err(|e| EnrichError::MalformedResponse {
            message: format!("row {}: {e}", index + 1),
        })?;

        if record.len() > COLUMNS.len() {
            return Err(EnrichError::MalformedResponse {
                message: format!(
                    "row {} has {} fields, expected at most {}",
                    index + 1,
                    record.len(),
                    COLUMNS.len()
                ),
            });
        }

        if record.iter().all(str::is_empty) {
            continue;
        }

        let field = |i: usize| record.get(i).unwrap_or_default().to_string();
        rows.push(TableRow {
            id: field(0),
            name: field(1),
            city: field(2),
            district: field(3),
            address: field(4),
            floor: field(5),
            lat: parse_coordinate(record.get(6)),
            lng: parse_coordinate(record.get(7)),
            phone: field(8),
            review_summary: field(9),
            rating: field(10),
            price_level: field(11),
        });
    }

    if rows.is_empty() {
        return Err(EnrichError::EmptyResponse);
    }
    Ok(rows)
}

fn parse_coordinate(value: Option<&str>) -> Option<f64> {
    value
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "ID|店名|縣市|行政區|地址(不含樓層)|樓層|緯度|經度|電話|評論|星級數|價格區間";

    #[test]
    fn parses_fenced_table_after_prose() {
        let response = format!(
            "好的，以下是結果：\n```csv\n{HEADER}\n\
             001_111_0009_00000 | 美福飯店 | 台北市 | 中山區 | 樂群二路55號 | | 25.08 | 121.55 | (02)77223399 | 不錯 | 4.6/5 | 6800\n```"
        );
        let rows = parse_table(&response).unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.id, "001_111_0009_00000");
        assert_eq!(row.name, "美福飯店");
        assert_eq!(row.floor, "");
        assert_eq!(row.lat, Some(25.08));
        assert_eq!(row.lng, Some(121.55));
        assert_eq!(row.rating, "4.6/5");
        assert_eq!(row.price_level, "6800");
    }

    #[test]
    fn pads_short_rows() {
        let response = format!("{HEADER}\nX|店A|台北市");
        let rows = parse_table(&response).unwrap();
        assert_eq!(rows[0].city, "台北市");
        assert_eq!(rows[0].price_level, "");
        assert_eq!(rows[0].lat, None);
    }

    #[test]
    fn non_numeric_coordinates_are_none() {
        let response = format!("{HEADER}\nX|店A|台北市|中山區|路|1F|未知|abc|||| ");
        let rows = parse_table(&response).unwrap();
        assert_eq!(rows[0].lat, None);
        assert_eq!(rows[0].lng, None);
        assert_eq!(rows[0].floor, "1F");
    }

    #[test]
    fn too_many_fields_is_malformed() {
        let response = format!("{HEADER}\n1|2|3|4|5|6|7|8|9|10|11|12|13");
        assert!(matches!(
            parse_table(&response),
            Err(EnrichError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn header_only_is_empty() {
        assert!(matches!(parse_table(HEADER), Err(EnrichError::EmptyResponse)));
        assert!(matches!(parse_table(""), Err(EnrichError::EmptyResponse)));
    }

    #[test]
    fn strips_fences() {
        assert_eq!(strip_fences("```csv\nID|a\n```\n"), "ID|a");
    }
}
