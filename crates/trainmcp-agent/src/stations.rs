//! Built-in city to station telegraph code table.
//!
//! The ticket server resolves station codes itself, but its lookup tools
//! fail for some inputs. The table is rendered into the system prompt so the
//! model can still call the ticket tool with a known code.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

/// City name and telegraph code of its main station, in prompt order.
const CITY_CODES: &[(&str, &str)] = &[
    ("北京", "BJP"),
    ("上海", "SHH"),
    ("广州", "GZQ"),
    ("深圳", "SZQ"),
    ("杭州", "HZH"),
    ("南京", "NJH"),
    ("成都", "CDW"),
    ("武汉", "WHN"),
    ("西安", "XAY"),
    ("郑州", "ZZF"),
    ("重庆", "CQW"),
    ("天津", "TJP"),
    ("长沙", "CSQ"),
    ("沈阳", "SYT"),
    ("哈尔滨", "HBB"),
    ("大连", "DLT"),
    ("青岛", "QDK"),
    ("济南", "JNK"),
    ("福州", "FZS"),
    ("厦门", "XMS"),
    ("昆明", "KMM"),
    ("贵阳", "GIW"),
    ("兰州", "LZJ"),
    ("太原", "TYV"),
    ("石家庄", "SJP"),
    ("合肥", "HFH"),
    ("南昌", "NCG"),
    ("长春", "CCT"),
    ("乌鲁木齐", "URQ"),
    ("拉萨", "LSA"),
    ("呼和浩特", "HHC"),
    ("银川", "YIJ"),
    ("西宁", "XNO"),
    ("海口", "VUQ"),
    ("三亚", "SEQ"),
    ("苏州", "SZH"),
    ("无锡", "WXH"),
    ("常州", "CZH"),
    ("南通", "NTH"),
    ("宁波", "NVH"),
    ("温州", "RZH"),
    ("金华", "JHH"),
    ("珠海", "ZHQ"),
    ("汕头", "STQ"),
    ("佛山", "FSQ"),
    ("东莞", "DMQ"),
    ("中山", "ZSQ"),
];

/// Single-character abbreviations and the city they stand for.
const CITY_ALIASES: &[(&str, &str)] = &[
    ("京", "北京"),
    ("沪", "上海"),
    ("穗", "广州"),
    ("深", "深圳"),
    ("蓉", "成都"),
    ("汉", "武汉"),
    ("杭", "杭州"),
    ("宁", "南京"),
    ("渝", "重庆"),
    ("津", "天津"),
];

/// Shape of a custom mapping file.
#[derive(Debug, Default, Deserialize)]
struct CustomMapping {
    #[serde(default)]
    station_codes: HashMap<String, String>,
    #[serde(default)]
    city_aliases: HashMap<String, String>,
}

/// City lookup with alias resolution.
#[derive(Debug, Clone)]
pub struct StationCodeMapper {
    codes: Vec<(String, String)>,
    aliases: HashMap<String, String>,
}

impl Default for StationCodeMapper {
    fn default() -> Self {
        Self {
            codes: CITY_CODES
                .iter()
                .map(|(city, code)| (city.to_string(), code.to_string()))
                .collect(),
            aliases: CITY_ALIASES
                .iter()
                .map(|(alias, city)| (alias.to_string(), city.to_string()))
                .collect(),
        }
    }
}

impl StationCodeMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in table merged with `path`, when it exists.
    ///
    /// A file that cannot be read or parsed is logged and the defaults are
    /// kept.
    pub fn with_custom_file(path: Option<&Path>) -> Self {
        let mut mapper = Self::default();
        let Some(path) = path else {
            return mapper;
        };
        if !path.exists() {
            return mapper;
        }

        let loaded = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|text| {
                serde_json::from_str::<CustomMapping>(&text).map_err(|e| e.to_string())
            });

        match loaded {
            Ok(custom) => {
                let mut codes: Vec<_> = custom.station_codes.into_iter().collect();
                codes.sort();
                for (city, code) in codes {
                    mapper.insert(city, code);
                }
                mapper.aliases.extend(custom.city_aliases);
                info!(path = %path.display(), "Loaded custom station codes");
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load custom station codes");
            }
        }
        mapper
    }

    /// Add or replace a city code.
    pub fn insert(&mut self, city: impl Into<String>, code: impl Into<String>) {
        let city = city.into();
        let code = code.into();
        match self.codes.iter_mut().find(|(c, _)| *c == city) {
            Some(entry) => entry.1 = code,
            None => self.codes.push((city, code)),
        }
    }

    /// Code for a city name or one of its aliases.
    pub fn get_code(&self, city: &str) -> Option<&str> {
        let city = self.aliases.get(city).map(String::as_str).unwrap_or(city);
        self.codes
            .iter()
            .find(|(c, _)| c == city)
            .map(|(_, code)| code.as_str())
    }

    pub fn available_cities(&self) -> Vec<&str> {
        self.codes.iter().map(|(city, _)| city.as_str()).collect()
    }

    /// Cities whose name contains `keyword`.
    pub fn search_city(&self, keyword: &str) -> Vec<&str> {
        self.codes
            .iter()
            .filter(|(city, _)| city.contains(keyword))
            .map(|(city, _)| city.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// First `limit` entries as `- city: CODE` lines.
    pub fn prompt_table(&self, limit: usize) -> String {
        self.codes
            .iter()
            .take(limit)
            .map(|(city, code)| format!("- {}: {}", city, code))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_table() {
        let mapper = StationCodeMapper::new();
        assert_eq!(mapper.len(), 47);
        assert_eq!(mapper.get_code("北京"), Some("BJP"));
        assert_eq!(mapper.get_code("中山"), Some("ZSQ"));
        assert_eq!(mapper.get_code("火星"), None);
    }

    #[test]
    fn test_alias_resolution() {
        let mapper = StationCodeMapper::new();
        assert_eq!(mapper.get_code("沪"), Some("SHH"));
        assert_eq!(mapper.get_code("渝"), Some("CQW"));
    }

    #[test]
    fn test_search_city() {
        let mapper = StationCodeMapper::new();
        assert_eq!(mapper.search_city("州"), vec![
            "广州", "杭州", "郑州", "福州", "兰州", "苏州", "常州", "温州"
        ]);
        assert!(mapper.search_city("xyz").is_empty());
    }

    #[test]
    fn test_prompt_table_keeps_order() {
        let table = StationCodeMapper::new().prompt_table(3);
        assert_eq!(table, "- 北京: BJP\n- 上海: SHH\n- 广州: GZQ");
    }

    #[test]
    fn test_custom_file_merges_over_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("city_codes.json");
        std::fs::write(
            &path,
            r#"{"station_codes": {"北京": "VNP", "徐州": "XCH"}, "city_aliases": {"徐": "徐州"}}"#,
        )
        .unwrap();

        let mapper = StationCodeMapper::with_custom_file(Some(&path));
        assert_eq!(mapper.len(), 48);
        assert_eq!(mapper.get_code("北京"), Some("VNP"));
        assert_eq!(mapper.get_code("徐"), Some("XCH"));
        assert_eq!(mapper.available_cities().last(), Some(&"徐州"));
    }

    #[test]
    fn test_bad_custom_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("city_codes.json");
        std::fs::write(&path, "not json").unwrap();

        let mapper = StationCodeMapper::with_custom_file(Some(&path));
        assert_eq!(mapper.len(), 47);

        let missing = StationCodeMapper::with_custom_file(Some(&dir.path().join("nope.json")));
        assert_eq!(missing.len(), 47);
    }
}
