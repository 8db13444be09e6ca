//! Prompt construction for one chunk of records.
//!
//! The service receives the chunk as CSV and must answer with a
//! `|`-delimited table in the fixed column order of [`crate::table::COLUMNS`].

use shop_map_listing_models::PreparedRecord;

use crate::EnrichError;
use crate::table::COLUMNS;

/// Industry code whose price column is a nightly room rate.
pub const LODGING_CODE: &str = "0009";

/// Industry code whose price column is an average spend per person.
pub const DINING_CODE: &str = "0008";

/// Columns of the CSV rendering of input rows.
pub const INPUT_COLUMNS: [&str; 10] = [
    "temp_id",
    "縣市",
    "行政區",
    "特店名稱",
    "行業別",
    "電話",
    "地址",
    "lat",
    "lng",
    "hidden_tags",
];

/// How the price and review columns should be filled for an industry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndustryKind {
    /// Lodging: price is the lowest weekday nightly rate, as a number.
    Lodging,
    /// Dining: price is the average spend per person, as a number.
    Dining,
    /// Everything else: price is a qualitative tier label.
    General,
}

impl IndustryKind {
    /// Classifies an industry code.
    #[must_use]
    pub fn from_code(industry_code: &str) -> Self {
        match industry_code {
            LODGING_CODE => Self::Lodging,
            DINING_CODE => Self::Dining,
            _ => Self::General,
        }
    }

    /// Returns `true` if the price column holds a number.
    #[must_use]
    pub const fn has_numeric_price(self) -> bool {
        matches!(self, Self::Lodging | Self::Dining)
    }

    fn guidance(self) -> &'static str {
        match self {
            Self::Lodging => {
                "11. 星級數請註明滿星是幾星 (例: 4.5/5)。\n\
                 12. 價格區間以平日住一晚最低價為準，只填數字。\n\
                 13. 評論請搜尋網路資料，撰寫 80-100 字的住宿評論。"
            }
            Self::Dining => {
                "11. 星級數請註明滿星是幾星 (例: 4.5/5)。\n\
                 12. 價格區間以人均消費為準，只填數字。\n\
                 13. 評論請搜尋網路資料，撰寫 80-100 字的食記摘要。"
            }
            Self::General => {
                "11. 星級數請註明滿星是幾星 (例: 4.5/5)。\n\
                 12. 價格區間請標示消費等級 (例如: 平價, 中價位, 高價位)。\n\
                 13. 評論請搜尋網路資料，撰寫 80-100 字的店家特色摘要。"
            }
        }
    }
}

/// Renders a chunk as CSV with the [`INPUT_COLUMNS`] header.
///
/// `rows` pairs each record with its temp id. Hidden tags are joined with
/// `,`; missing coordinates are blank.
///
/// # Errors
///
/// Returns [`EnrichError::Csv`] if a row cannot be written.
pub fn render_input(rows: &[(String, &PreparedRecord)]) -> Result<String, EnrichError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(INPUT_COLUMNS)?;

    for (temp_id, prepared) in rows {
        let record = &prepared.record;
        let tags = prepared
            .hidden_tags
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let lat = prepared.lat.map(|v| v.to_string()).unwrap_or_default();
        let lng = prepared.lng.map(|v| v.to_string()).unwrap_or_default();
        writer.write_record([
            temp_id.as_str(),
            record.city.as_str(),
            record.district.as_str(),
            record.name.as_str(),
            record.industry_label.as_str(),
            record.phone.as_str(),
            record.address.as_str(),
            lat.as_str(),
            lng.as_str(),
            tags.as_str(),
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| EnrichError::Config {
            message: format!("Failed to flush CSV input: {e}"),
        })?;
    String::from_utf8(bytes).map_err(|e| EnrichError::Config {
        message: format!("CSV input is not UTF-8: {e}"),
    })
}

/// Builds the full prompt for one chunk.
#[must_use]
pub fn build_prompt(kind: IndustryKind, input_csv: &str) -> String {
    let header = COLUMNS.join("|");
    let guidance = kind.guidance();
    format!(
        "請將輸入資料整理、**去重**並擴充為表格，包含以下欄位(請保持順序)：\n\
         {header}\n\
         \n\
         **重要規則：**\n\
         1. **使用直線符號 `|` 作為分隔符號 (不要用逗號)。**\n\
         2. **直接輸出表格內容，不要有任何開頭語或結尾語。**\n\
         3. **不要使用 Markdown 程式碼區塊。**\n\
         4. 第一行必須是標題列。\n\
         5. ID 請對應輸入資料的 temp_id。\n\
         6. 地址要修正，確保縣市、地區、路名都有資訊且正確 (使用 Google 搜尋)。\n\
         7. 電話格式統一，前 2 碼加括號，其餘連接號捨棄。\n\
         8. 地址中的段數改為中文數字，巷弄及樓層用阿拉伯數字。\n\
         9. 經緯度請分為緯度、經度兩個欄位 (數值)。\n\
         10. **若網路上查無確切資訊，該欄位請直接留空。**\n\
         {guidance}\n\
         14. **若輸入資料中有重複的店家，請自動合併。**\n\
         \n\
         # 輸入資料\n\
         {input_csv}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeSet;

    use shop_map_listing_models::RawRecord;

    #[test]
    fn classifies_industries() {
        assert_eq!(IndustryKind::from_code("0009"), IndustryKind::Lodging);
        assert_eq!(IndustryKind::from_code("0008"), IndustryKind::Dining);
        assert_eq!(IndustryKind::from_code("0001"), IndustryKind::General);
        assert!(!IndustryKind::General.has_numeric_price());
    }

    #[test]
    fn renders_input_rows() {
        let prepared = PreparedRecord {
            record: RawRecord {
                name: "星巴克, 士林店".to_string(),
                address: "中正路1號".to_string(),
                phone: "0228881234".to_string(),
                district: "士林區".to_string(),
                city: "台北市".to_string(),
                industry_label: "餐飲業".to_string(),
            },
            lat: Some(25.5),
            lng: None,
            hidden_tags: BTreeSet::from(["starbucks".to_string(), "coffee".to_string()]),
        };

        let csv = render_input(&[("001_111_0008_00000".to_string(), &prepared)]).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next().unwrap(), INPUT_COLUMNS.join(","));
        assert_eq!(
            lines.next().unwrap(),
            "001_111_0008_00000,台北市,士林區,\"星巴克, 士林店\",餐飲業,0228881234,中正路1號,25.5,,\"coffee,starbucks\""
        );
    }

    #[test]
    fn prompt_carries_columns_guidance_and_input() {
        let prompt = build_prompt(IndustryKind::Lodging, "temp_id\nx\n");
        assert!(prompt.contains("ID|店名|縣市|行政區|地址(不含樓層)|樓層|緯度|經度|電話|評論|星級數|價格區間"));
        assert!(prompt.contains("平日住一晚"));
        assert!(prompt.ends_with("temp_id\nx\n"));
    }
}
