use super::{extract::extract, CalendarRequestUnit, ExtractedRecord};
use crate::utils::{collapse_whitespace, parse_result_count};

use itertools::Itertools;
use lazy_static::lazy_static;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

/// Upper bound of positional row probes per page. The site never serves more
/// than 100 rows per page.
pub const MAX_ROW_SLOTS: usize = 100;

// The calendar body has been served under both roots.
const ROOTS: [&str; 2] = [
    "body > div:nth-of-type(2) > main > section > section > section > article > section > section:nth-of-type(1)",
    "#nimbus-app > section > section > section > article > section > section:nth-of-type(1)",
];

fn rooted(suffix: &str) -> Selector {
    let group = ROOTS.iter().map(|root| format!("{} > {}", root, suffix)).join(", ");
    Selector::parse(&group).expect(E)
}

const E: &str = "Invalid selector";
lazy_static! {
    static ref RESULTS_TEXT: Selector = rooted("div:nth-of-type(1) > div > div > p");
    static ref TABLE: Selector = rooted("div:nth-of-type(2) > table");
    static ref NEXT_BUTTON: Selector =
        rooted("div:nth-of-type(3) > div:nth-of-type(3) > button:nth-of-type(3)");
    static ref ROW_SLOTS: Vec<Selector> = (1..=MAX_ROW_SLOTS)
        .map(|n| Selector::parse(&format!("tbody > tr:nth-of-type({})", n)).expect(E))
        .collect();
    static ref TD: Selector = Selector::parse("td").expect(E);
}

/// What one parsed page tells the pagination driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSummary {
    pub total_expected: usize,
    pub valid_rows: usize,
    pub found_rows: usize,
    pub missing_slots: Vec<usize>,
    pub has_next: bool,
}

#[derive(Debug)]
pub enum PageOutcome {
    TableMissing,
    Parsed {
        summary: PageSummary,
        records: Vec<ExtractedRecord>,
    },
}

/// Rows located on a page, borrowed from the parsed document.
#[derive(Debug)]
pub struct ParsedRows<'a> {
    pub total_expected: usize,
    pub valid_rows: Vec<ElementRef<'a>>,
    pub found_slots: Vec<usize>,
    pub missing_slots: Vec<usize>,
    pub has_next: bool,
}

pub struct CalendarPage {
    doc: Html,
}

impl CalendarPage {
    pub fn parse(html: &str) -> Self {
        CalendarPage {
            doc: Html::parse_document(html),
        }
    }

    pub fn results_text(&self) -> Option<String> {
        self.doc
            .select(&RESULTS_TEXT)
            .next()
            .map(|p| collapse_whitespace(&p.text().collect::<String>()))
            .filter(|t| !t.is_empty())
    }

    pub fn has_table(&self) -> bool {
        self.doc.select(&TABLE).next().is_some()
    }

    pub fn next_button_active(&self) -> bool {
        match self.doc.select(&NEXT_BUTTON).next() {
            Some(button) => {
                let disabled = button
                    .value()
                    .attr("disabled")
                    .map_or(false, |d| d != "false");
                let text = collapse_whitespace(&button.text().collect::<String>());
                debug!("Next button: disabled={}, text={:?}", disabled, text);
                !disabled && text == "Next"
            }
            None => false,
        }
    }

    /// `None` when the results table is not on the page.
    pub fn rows(&self, unit: &CalendarRequestUnit, row_slots: usize) -> Option<ParsedRows<'_>> {
        let table = self.doc.select(&TABLE).next()?;

        // Bulk `tbody > tr` selections intermittently come back short, so every
        // slot is probed on its own.
        let mut found_slots = vec![];
        let mut valid_rows = vec![];
        for (i, selector) in ROW_SLOTS.iter().take(row_slots).enumerate() {
            if let Some(row) = table.select(selector).next() {
                found_slots.push(i + 1);
                if row.select(&TD).next().is_some() {
                    valid_rows.push(row);
                }
            }
        }

        let reported = self.results_text().and_then(|t| {
            let count = parse_result_count(&t);
            if count.is_none() {
                warn!("Unparsable result count {:?} for {}", t, unit);
            }
            count
        });
        let total_expected = reported.unwrap_or(valid_rows.len());

        let expected_slots = match reported {
            Some(total) => total.saturating_sub(unit.offset).min(row_slots),
            None => row_slots,
        };
        let missing_slots = (1..=expected_slots)
            .filter(|n| !found_slots.contains(n))
            .collect();

        let has_next =
            self.next_button_active() && total_expected > unit.offset + valid_rows.len();

        Some(ParsedRows {
            total_expected,
            valid_rows,
            found_slots,
            missing_slots,
            has_next,
        })
    }

    /// Parses the page and maps every valid row onto a record.
    pub fn process(&self, unit: &CalendarRequestUnit, row_slots: usize) -> PageOutcome {
        let Some(rows) = self.rows(unit, row_slots) else {
            return PageOutcome::TableMissing;
        };

        if !rows.missing_slots.is_empty() {
            warn!("Missing rows for {}: {:?}", unit, rows.missing_slots);
        }
        debug!(
            "Rows for {}: expected {}, found {}, valid {}",
            unit,
            rows.total_expected,
            rows.found_slots.len(),
            rows.valid_rows.len()
        );

        let records = rows
            .valid_rows
            .iter()
            .filter_map(|row| {
                let cells: Vec<_> = row.select(&TD).collect();
                extract(&cells, unit.category, unit.date)
            })
            .collect();

        PageOutcome::Parsed {
            summary: PageSummary {
                total_expected: rows.total_expected,
                valid_rows: rows.valid_rows.len(),
                found_rows: rows.found_slots.len(),
                missing_slots: rows.missing_slots,
                has_next: rows.has_next,
            },
            records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::Category;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn unit(category: Category, offset: usize) -> CalendarRequestUnit {
        let mut unit = CalendarRequestUnit::new(
            category,
            NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            100,
        );
        unit.offset = offset;
        unit
    }

    fn page(name: &str) -> CalendarPage {
        let html = fs::read_to_string(format!("tests/htmls/{}", name)).expect("Invalid file url");
        CalendarPage::parse(&html)
    }

    #[test]
    fn test_parsing_earnings_page() {
        let page = page("earnings.html");
        assert_eq!(page.results_text().as_deref(), Some("1-3 of 250 Results"));
        assert!(page.next_button_active());

        let PageOutcome::Parsed { summary, records } = page.process(&unit(Category::Earnings, 0), 100) else {
            panic!("table expected");
        };
        assert_eq!(
            summary,
            PageSummary {
                total_expected: 250,
                valid_rows: 3,
                found_rows: 4,
                missing_slots: (5..=100).collect(),
                has_next: true,
            }
        );

        let titles: Vec<_> = records.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["AAPL - Apple Inc.", "MSFT - Microsoft Corporation", "Globex"]
        );
        assert_eq!(records[0].fields.get("eps_estimate"), Some("2.10"));
        assert_eq!(records[0].fields.get("surprise"), Some("+4.76"));
        assert_eq!(records[2].fields.get("symbol"), Some("-"));
    }

    #[test]
    fn test_parsing_last_splits_page() {
        let page = page("splits.html");
        assert!(!page.next_button_active());

        let PageOutcome::Parsed { summary, records } = page.process(&unit(Category::Splits, 0), 100) else {
            panic!("table expected");
        };
        assert_eq!(summary.total_expected, 2);
        assert_eq!(summary.valid_rows, 2);
        assert_eq!(summary.missing_slots, Vec::<usize>::new());
        assert!(!summary.has_next);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].subtitle, "Split Ratio: 2:1");
    }

    #[test]
    fn test_missing_table() {
        let page = page("no_table.html");
        assert!(!page.has_table());
        assert!(matches!(
            page.process(&unit(Category::Ipo, 0), 100),
            PageOutcome::TableMissing
        ));
    }

    #[test]
    fn test_total_defaults_to_valid_rows_without_summary() {
        let page = CalendarPage::parse(
            r#"<html><body><div></div><div><main><section><section><section><article><section><section>
                <div></div>
                <div><table><tbody><tr><td>AAA</td><td>Acme</td></tr></tbody></table></div>
            </section></section></article></section></section></section></main></div></body></html>"#,
        );
        let rows = page.rows(&unit(Category::Splits, 0), 100).unwrap();
        assert_eq!(rows.total_expected, 1);
        assert_eq!(rows.valid_rows.len(), 1);
        assert!(!rows.has_next);
    }
}
