use super::{Category, ExtractedRecord, RecordError};

use serde::{Serialize, Serializer};
use serde_json::Value;
use std::{collections::HashSet, fmt};
use tracing::{debug, warn};

const SENTINELS: [&str; 3] = ["", "-", "N/A"];

pub(crate) fn is_sentinel(value: &str) -> bool {
    SENTINELS.contains(&value)
}

/// `{category}:{identifiers..}:{date}`, unique per crawl run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn for_record(record: &ExtractedRecord) -> Self {
        let field = |name: &str| record.fields.get_or(name, "");
        let date = record.date.format("%Y-%m-%d");
        let key = match record.category {
            Category::Earnings | Category::Ipo | Category::Splits => {
                format!("{}:{}:{}", record.category, field("symbol"), date)
            }
            Category::Economic => format!(
                "{}:{}:{}:{}",
                record.category,
                field("event"),
                field("country"),
                date
            ),
        };
        DedupKey(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("{category} record has none of {fields:?}")]
    MissingIdentity {
        category: Category,
        fields: [&'static str; 2],
    },
    #[error("duplicate record {0}")]
    Duplicate(DedupKey),
    #[error(transparent)]
    Malformed(#[from] RecordError),
}

/// A cleaned record whose key was seen for the first time in this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRecord {
    record: ExtractedRecord,
    key: DedupKey,
}

impl ValidatedRecord {
    pub fn record(&self) -> &ExtractedRecord {
        &self.record
    }

    pub fn key(&self) -> &DedupKey {
        &self.key
    }

    pub fn into_inner(self) -> ExtractedRecord {
        self.record
    }
}

impl Serialize for ValidatedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.record.serialize(serializer)
    }
}

/// Required-field gate, sentinel cleaning and run-scoped deduplication.
#[derive(Debug, Default)]
pub struct Pipeline {
    seen: HashSet<DedupKey>,
    rejected: usize,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(&mut self, mut record: ExtractedRecord) -> Result<ValidatedRecord, Rejection> {
        for value in record.fields.values_mut() {
            if value.as_deref().map_or(false, is_sentinel) {
                *value = None;
            }
        }

        let identifying = record.category.identifying_fields();
        if identifying.iter().all(|f| record.fields.get(f).is_none()) {
            debug!("Missing identifiers in {} record: {}", record.category, record.date);
            self.rejected += 1;
            return Err(Rejection::MissingIdentity {
                category: record.category,
                fields: identifying,
            });
        }

        let key = DedupKey::for_record(&record);
        if !self.seen.insert(key.clone()) {
            debug!("Duplicate ignored: {}", key);
            self.rejected += 1;
            return Err(Rejection::Duplicate(key));
        }

        Ok(ValidatedRecord { record, key })
    }

    /// Same as [`Pipeline::accept`] for a stored JSON object.
    pub fn accept_value(&mut self, value: &Value) -> Result<ValidatedRecord, Rejection> {
        match ExtractedRecord::try_from(value) {
            Ok(record) => self.accept(record),
            Err(e) => {
                warn!("Required field missing: {}", e);
                self.rejected += 1;
                Err(Rejection::Malformed(e))
            }
        }
    }

    pub fn accepted(&self) -> usize {
        self.seen.len()
    }

    pub fn rejected(&self) -> usize {
        self.rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{Fields, Metadata};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
    }

    fn record(category: Category, values: &[&str]) -> ExtractedRecord {
        let fields = Fields::from_values(
            category,
            values.iter().map(|v| Some(v.to_string())).collect(),
        );
        ExtractedRecord {
            category,
            date: day(),
            title: crate::calendar::extract::title(&fields),
            subtitle: crate::calendar::extract::subtitle(&fields),
            fields,
            metadata: Metadata::new(category, day()),
        }
    }

    #[test]
    fn test_same_record_twice_is_accepted_once() {
        let mut pipeline = Pipeline::new();
        let r = record(Category::Splits, &["AAA", "Acme", "Mar 10", "No", "2:1"]);

        let first = pipeline.accept(r.clone()).unwrap();
        assert_eq!(first.key().as_str(), "splits:AAA:2024-03-10");
        assert_eq!(
            pipeline.accept(r),
            Err(Rejection::Duplicate(DedupKey(
                "splits:AAA:2024-03-10".to_string()
            )))
        );
        assert_eq!(pipeline.accepted(), 1);
        assert_eq!(pipeline.rejected(), 1);
    }

    #[test]
    fn test_sentinels_become_null_and_other_values_pass() {
        let mut pipeline = Pipeline::new();
        let r = record(
            Category::Ipo,
            &["ZZZ", "Zed Corp", "", "-", "N/A", "12.50", "USD", " 1,000 ", "Priced"],
        );
        let validated = pipeline.accept(r).unwrap();
        let fields = &validated.record().fields;

        assert_eq!(fields.get("exchange"), None);
        assert_eq!(fields.get("ipo_date"), None);
        assert_eq!(fields.get("price_range"), None);
        assert_eq!(fields.get("price"), Some("12.50"));
        assert_eq!(fields.get("shares"), Some(" 1,000 "));
        assert_eq!(fields.get("actions"), Some("Priced"));
    }

    #[test]
    fn test_earnings_requires_symbol_or_company() {
        let mut pipeline = Pipeline::new();
        let nothing = record(Category::Earnings, &["-", "", "Q1 Call"]);
        assert_eq!(
            pipeline.accept(nothing),
            Err(Rejection::MissingIdentity {
                category: Category::Earnings,
                fields: ["symbol", "company"],
            })
        );

        let company_only = record(Category::Earnings, &["", "Acme"]);
        let validated = pipeline.accept(company_only).unwrap();
        assert_eq!(validated.key().as_str(), "earnings::2024-03-10");
    }

    #[test]
    fn test_economic_key_uses_event_and_country() {
        let mut pipeline = Pipeline::new();
        let us = pipeline
            .accept(record(Category::Economic, &["CPI YoY", "US"]))
            .unwrap();
        assert_eq!(us.key().as_str(), "economic:CPI YoY:US:2024-03-10");

        assert!(pipeline
            .accept(record(Category::Economic, &["CPI YoY", "JP"]))
            .is_ok());
        assert!(pipeline
            .accept(record(Category::Economic, &["", "", "8:30"]))
            .is_err());
    }

    #[test]
    fn test_stored_objects_need_category_and_date() {
        let mut pipeline = Pipeline::new();
        assert_eq!(
            pipeline.accept_value(&json!({"title": "AAA - Acme", "date": "2024-03-10"})),
            Err(Rejection::Malformed(RecordError::MissingCategory))
        );
        let ok = pipeline
            .accept_value(&json!({
                "category": "splits",
                "date": "2024-03-10",
                "symbol": "AAA",
                "company": "Acme",
                "ratio": "2:1"
            }))
            .unwrap();
        assert_eq!(ok.record().title, "");
        assert_eq!(ok.key().as_str(), "splits:AAA:2024-03-10");
    }
}
