//! Brand synonym table used for hidden tag inference.
//!
//! Each entry maps a brand key to space-separated aliases: local names,
//! abbreviations, nicknames, and registered company names. Aliases are
//! matched against lower-cased merchant names, so they are written in
//! lower case.

/// `(brand key, aliases)` pairs.
pub const SYNONYMS: &[(&str, &str)] = &[
    // Apparel, sportswear, footwear
    ("uniqlo", "優衣庫 uq 台灣優衣庫 衣服"),
    ("zara", "莎拉 薩拉 荷蘭商颯拉"),
    ("h&m", "hm hnm 慕尚展現"),
    ("net", "net服飾 主富 主富服裝"),
    ("gap", "蓋璞"),
    ("gu", "極優"),
    ("adidas", "愛迪達 三葉草 台灣阿迪達斯"),
    ("nike", "耐吉 勾勾 必爾斯藍基"),
    ("puma", "彪馬 台灣彪馬"),
    ("newbalance", "nb 紐巴倫 台灣紐巴倫"),
    ("skechers", "思凱捷 思克威爾"),
    ("underarmour", "ua 安德瑪"),
    ("levi", "levis 李維斯 麗威森 牛仔褲"),
    ("roots", "加拿大海狸"),
    ("timberland", "踢不爛 天伯倫"),
    ("birkenstock", "勃肯"),
    ("crocs", "布希鞋 鱷魚鞋"),
    ("porter", "波特 波特包 尚立"),
    ("lululemon", "露露檸檬 露露樂蒙"),
    ("la_new", "la new 老牛皮 老牛皮國際"),
    ("aso", "阿瘦 阿瘦皮鞋 阿瘦實業"),
    ("giordano", "佐丹奴 澳洲商佐丹奴"),
    ("momentum", "摩曼頓"),
    // Dining, fast food, chains
    ("mcdonalds", "麥當勞 mcd 麥當當 和德昌"),
    ("kfc", "肯德基 炸雞"),
    ("starbucks", "星巴克 悠旅生活"),
    ("burgerking", "漢堡王"),
    ("mos", "摩斯 摩斯漢堡"),
    ("subway", "賽百味 潛艇堡"),
    ("pizzahut", "必勝客"),
    ("dominos", "達美樂 台灣達美樂"),
    ("sushiro", "壽司郎 台灣壽司郎"),
    ("kurasushi", "藏壽司 亞洲藏壽司"),
    ("hama", "hama壽司 哈瑪壽司"),
    ("saizeriya", "薩莉亞 台灣薩莉亞"),
    ("coco", "都可"),
    ("50lan", "50嵐 五十嵐"),
    ("chunshuitang", "春水堂"),
    ("louisa", "路易莎"),
    ("cama", "卡瑪 咖碼"),
    ("85c", "85度c"),
    ("wowprime", "王品 王品餐飲 王品集團"),
    ("tasty", "西堤"),
    ("tau", "陶板屋"),
    ("giguo", "聚 北海道昆布鍋"),
    ("12hotpot", "石二鍋"),
    ("haidilao", "海底撈"),
    ("ding_tai_fung", "鼎泰豐"),
    // Retail, drugstores, department stores, supermarkets
    ("7-eleven", "7-11 統一超商 小七 seven"),
    ("family", "全家 全家便利商店"),
    ("hilife", "萊爾富"),
    ("okmart", "ok超商"),
    ("pxmart", "全聯 福利中心 全聯實業"),
    ("carrefour", "家樂福 家福"),
    ("costco", "好市多"),
    ("rt-mart", "大潤發"),
    ("watsons", "屈臣氏 台灣屈臣氏"),
    ("cosmed", "康是美"),
    ("poya", "寶雅"),
    ("ikea", "宜家 宜家家居"),
    ("nitori", "宜得利"),
    ("muji", "無印良品"),
    ("decathlon", "迪卡儂"),
    ("hola", "特力和樂"),
    ("bnq", "特力屋"),
    ("eslite", "誠品 誠品書店"),
    ("sogo", "遠東sogo 崇光百貨"),
    ("mitsukoshi", "新光三越"),
    ("breeze", "微風 微風廣場"),
    ("qsquare", "京站"),
    // Electronics, telecom, appliances
    ("apple", "蘋果"),
    ("samsung", "三星"),
    ("asus", "華碩"),
    ("acer", "宏碁"),
    ("sony", "索尼"),
    ("dyson", "戴森"),
    ("xiaomi", "小米"),
    ("cht", "中華電信"),
    ("fet", "遠傳"),
    ("twm", "台灣大哥大"),
    ("tsannkuen", "燦坤"),
    ("elifemall", "全國電子"),
    ("senao", "神腦"),
    // Transport, travel, vehicles
    ("ubike", "微笑單車"),
    ("gogoro", "gogoro"),
    ("klook", "客路"),
    ("kkday", "酷遊"),
    ("liontravel", "雄獅"),
    ("colatour", "可樂旅遊"),
    ("toyota", "豐田"),
    ("nissan", "裕隆"),
    ("giant", "捷安特"),
    ("merida", "美利達"),
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn keys_are_unique() {
        let mut seen = BTreeSet::new();
        for (key, _) in SYNONYMS {
            assert!(seen.insert(key), "Duplicate brand key: {key}");
        }
    }

    #[test]
    fn aliases_are_lower_case() {
        for (key, aliases) in SYNONYMS {
            assert_eq!(*aliases, aliases.to_lowercase(), "Aliases of {key} not lower case");
            assert!(!aliases.trim().is_empty(), "Empty aliases for {key}");
        }
    }
}
