use crate::{calendar::Category, CrawlerError};

use chrono::NaiveDate;
use serde::Deserialize;
use std::{collections::HashMap, path::PathBuf, time::Duration};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub categories: Vec<Category>,

    pub page_size: usize,
    pub row_slots: usize,
    pub max_table_retries: u32,
    pub offset_ceilings: HashMap<Category, usize>,
    pub base_url: String,

    pub concurrent_requests: usize,
    pub concurrent_requests_per_domain: usize,
    #[serde(with = "seconds")]
    pub download_delay: Duration,
    pub randomize_delay: bool,
    pub http_retries: u32,
    pub retry_statuses: Vec<u16>,
    #[serde(with = "seconds")]
    pub timeout: Duration,
    pub user_agent: String,

    pub output_dir: PathBuf,
    pub output_prefix: Option<String>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        CrawlConfig {
            start_date: None,
            end_date: None,
            categories: Category::ALL.to_vec(),
            page_size: 100,
            row_slots: 100,
            max_table_retries: 3,
            offset_ceilings: HashMap::from([(Category::Earnings, 1000)]),
            base_url: "https://finance.yahoo.com/calendar".to_string(),
            concurrent_requests: 2,
            concurrent_requests_per_domain: 4,
            download_delay: Duration::from_secs(3),
            randomize_delay: true,
            http_retries: 3,
            retry_statuses: vec![500, 502, 503, 504, 408, 429, 403],
            timeout: Duration::from_secs(30),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36".to_string(),
            output_dir: PathBuf::from("."),
            output_prefix: None,
        }
    }
}

impl CrawlConfig {
    pub fn from_file(path: &std::path::Path) -> Result<Self, CrawlerError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Start defaults to today, end to start + 7 days.
    pub fn date_bounds(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let start = self.start_date.unwrap_or(today);
        let end = self
            .end_date
            .unwrap_or_else(|| start + chrono::Duration::days(7));
        (start, end)
    }
}

mod seconds {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: CrawlConfig = serde_json::from_str(
            r#"{"categories": ["splits", "ipo"], "download_delay": 0.5, "offset_ceilings": {"earnings": 500}}"#,
        )
        .unwrap();
        assert_eq!(config.categories, vec![Category::Splits, Category::Ipo]);
        assert_eq!(config.download_delay, Duration::from_millis(500));
        assert_eq!(config.offset_ceilings.get(&Category::Earnings), Some(&500));
        assert_eq!(config.page_size, 100);
        assert_eq!(config.retry_statuses, vec![500, 502, 503, 504, 408, 429, 403]);
    }

    #[test]
    fn test_date_bounds_defaults() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let config = CrawlConfig::default();
        assert_eq!(
            config.date_bounds(today),
            (today, NaiveDate::from_ymd_opt(2024, 3, 17).unwrap())
        );
    }
}
