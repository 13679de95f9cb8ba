mod crawler;
mod extract;
mod pagination;
mod pipeline;

pub use crawler::{CalendarPage, PageOutcome, PageSummary, ParsedRows, MAX_ROW_SLOTS};
pub use extract::extract;
pub use pagination::Paginator;
pub use pipeline::{DedupKey, Pipeline, Rejection, ValidatedRecord};

use crate::CrawlerError;

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::{fmt, str::FromStr};

pub const SOURCE: &str = "yahoo_finance";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Earnings,
    Economic,
    Ipo,
    Splits,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Earnings,
        Category::Economic,
        Category::Ipo,
        Category::Splits,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Earnings => "earnings",
            Category::Economic => "economic",
            Category::Ipo => "ipo",
            Category::Splits => "splits",
        }
    }

    /// Field names in table column order.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Category::Earnings => &[
                "symbol",
                "company",
                "event_name",
                "call_time",
                "eps_estimate",
                "reported_eps",
                "surprise",
            ],
            Category::Economic => &[
                "event",
                "country",
                "event_time",
                "event_for",
                "actual",
                "market_expectation",
                "prior",
                "revised_from",
            ],
            Category::Ipo => &[
                "symbol",
                "company",
                "exchange",
                "ipo_date",
                "price_range",
                "price",
                "currency",
                "shares",
                "actions",
            ],
            Category::Splits => &["symbol", "company", "payable_on", "optionable", "ratio"],
        }
    }

    /// A record is kept only if at least one of these fields has a value.
    pub fn identifying_fields(&self) -> [&'static str; 2] {
        match self {
            Category::Economic => ["event", "country"],
            _ => ["symbol", "company"],
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = CrawlerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earnings" => Ok(Category::Earnings),
            "economic" => Ok(Category::Economic),
            "ipo" => Ok(Category::Ipo),
            "splits" => Ok(Category::Splits),
            other => Err(CrawlerError::UnknownCategory(other.to_string())),
        }
    }
}

/// Category specific values, one slot per column of [`Category::columns`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fields {
    category: Category,
    values: Vec<Option<String>>,
}

impl Fields {
    pub fn empty(category: Category) -> Self {
        Fields {
            category,
            values: vec![None; category.columns().len()],
        }
    }

    /// Missing trailing values become `None`, surplus values are dropped.
    pub fn from_values(category: Category, mut values: Vec<Option<String>>) -> Self {
        values.resize(category.columns().len(), None);
        Fields { category, values }
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.category.columns().iter().position(|c| *c == name)
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.index_of(name)
            .and_then(|i| self.values[i].as_deref())
    }

    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).unwrap_or(default)
    }

    /// Returns `false` when `name` is not a column of this category.
    pub fn set(&mut self, name: &str, value: Option<String>) -> bool {
        match self.index_of(name) {
            Some(i) => {
                self.values[i] = value;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, Option<&str>)> + '_ {
        self.category
            .columns()
            .iter()
            .copied()
            .zip(self.values.iter().map(Option::as_deref))
    }

    pub(crate) fn values_mut(&mut self) -> impl Iterator<Item = &mut Option<String>> {
        self.values.iter_mut()
    }

    fn from_object(category: Category, object: &Map<String, Value>) -> Self {
        let values = category
            .columns()
            .iter()
            .map(|c| match object.get(*c) {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Null) | None => None,
                Some(other) => Some(other.to_string()),
            })
            .collect();
        Fields::from_values(category, values)
    }
}

impl Serialize for Fields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, &value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub source: String,
    pub crawled_at: DateTime<FixedOffset>,
    pub category: Category,
    pub date: NaiveDate,
}

impl Metadata {
    pub fn new(category: Category, date: NaiveDate) -> Self {
        Metadata {
            source: SOURCE.to_string(),
            crawled_at: crate::utils::get_now(),
            category,
            date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedRecord {
    pub category: Category,
    pub date: NaiveDate,
    pub title: String,
    pub subtitle: String,
    #[serde(flatten)]
    pub fields: Fields,
    pub metadata: Metadata,
}

/// Why a stored JSON object could not be turned back into a record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("record has no category")]
    MissingCategory,
    #[error("record has unknown category {0:?}")]
    UnknownCategory(String),
    #[error("record has no date")]
    MissingDate,
    #[error("record has invalid date {0:?}")]
    InvalidDate(String),
}

impl TryFrom<&Value> for ExtractedRecord {
    type Error = RecordError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        let object = value.as_object().ok_or(RecordError::NotAnObject)?;
        let text = |key: &str| object.get(key).and_then(Value::as_str).map(str::trim);

        let category = match text("category") {
            None | Some("") => return Err(RecordError::MissingCategory),
            Some(c) => c
                .parse::<Category>()
                .map_err(|_| RecordError::UnknownCategory(c.to_string()))?,
        };
        let date = match text("date") {
            None | Some("") => return Err(RecordError::MissingDate),
            Some(d) => NaiveDate::parse_from_str(d, "%Y-%m-%d")
                .map_err(|_| RecordError::InvalidDate(d.to_string()))?,
        };

        let metadata = object
            .get("metadata")
            .and_then(Value::as_object)
            .map(|m| Metadata {
                source: m
                    .get("source")
                    .and_then(Value::as_str)
                    .unwrap_or(SOURCE)
                    .to_string(),
                crawled_at: m
                    .get("crawled_at")
                    .and_then(Value::as_str)
                    .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                    .unwrap_or_else(crate::utils::get_now),
                category,
                date,
            })
            .unwrap_or_else(|| Metadata::new(category, date));

        Ok(ExtractedRecord {
            category,
            date,
            title: text("title").unwrap_or_default().to_string(),
            subtitle: text("subtitle").unwrap_or_default().to_string(),
            fields: Fields::from_object(category, object),
            metadata,
        })
    }
}

impl fmt::Display for ExtractedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Category        : {}", self.category)?;
        writeln!(f, "Date            : {}", self.date)?;
        writeln!(f, "Title           : {}", self.title)?;
        writeln!(f, "Subtitle        : {}", self.subtitle)?;
        for (name, value) in self.fields.iter() {
            writeln!(f, "{:<16}: {}", name, value.unwrap_or("None"))?;
        }
        writeln!(f, "Crawled At      : {}", self.metadata.crawled_at)?;
        Ok(())
    }
}

/// One page fetch for a (category, date) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarRequestUnit {
    pub category: Category,
    pub date: NaiveDate,
    pub offset: usize,
    pub page_size: usize,
    /// Table-miss retries already spent on this exact request.
    pub attempt: u32,
}

impl CalendarRequestUnit {
    pub fn new(category: Category, date: NaiveDate, page_size: usize) -> Self {
        CalendarRequestUnit {
            category,
            date,
            offset: 0,
            page_size,
            attempt: 0,
        }
    }

    pub fn url(&self, base_url: &str) -> String {
        format!(
            "{}/{}?day={}&offset={}&size={}",
            base_url.trim_end_matches('/'),
            self.category,
            self.date.format("%Y-%m-%d"),
            self.offset,
            self.page_size
        )
    }
}

impl fmt::Display for CalendarRequestUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} @{}", self.category, self.date, self.offset)
    }
}
