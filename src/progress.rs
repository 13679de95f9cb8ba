use crate::calendar::{Category, PageSummary};
use crate::data::Collections;

use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::info;

/// Running per-category totals, fed one parsed page at a time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionProgress {
    expected_by_date: BTreeMap<NaiveDate, usize>,
    pub collected_count: usize,
    pub last_date: Option<NaiveDate>,
}

impl CollectionProgress {
    /// The server may revise a date's total between pages; the latest wins.
    pub fn record_page(&mut self, date: NaiveDate, summary: &PageSummary) {
        self.expected_by_date.insert(date, summary.total_expected);
        self.collected_count += summary.valid_rows;
        self.last_date = Some(date);
    }

    pub fn total_expected(&self) -> usize {
        self.expected_by_date.values().sum()
    }

    pub fn completion(&self) -> f64 {
        match self.total_expected() {
            0 => 0.0,
            total => self.collected_count as f64 * 100.0 / total as f64,
        }
    }
}

pub fn log_report(progress: &BTreeMap<Category, CollectionProgress>, collections: &Collections) {
    info!("{}", "=".repeat(50));
    info!("Collection report");
    info!("{}", "=".repeat(50));
    for (category, p) in progress {
        info!(
            "{}: {}/{} rows collected ({:.1}%), {} records kept",
            category.as_str().to_uppercase(),
            p.collected_count,
            p.total_expected(),
            p.completion(),
            collections.get(*category).len()
        );
    }
    info!("Total records: {}", collections.len());
    info!("{}", "=".repeat(50));
}
