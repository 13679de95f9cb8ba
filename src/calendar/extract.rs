use super::{pipeline::is_sentinel, Category, ExtractedRecord, Fields, Metadata};
use crate::utils::collapse_whitespace;

use chrono::NaiveDate;
use lazy_static::lazy_static;
use scraper::{ElementRef, Selector};
use tracing::debug;

const E: &str = "Invalid selector";
lazy_static! {
    static ref A: Selector = Selector::parse("a").expect(E);
}

fn cell_text(cell: &ElementRef<'_>) -> String {
    collapse_whitespace(&cell.text().collect::<String>())
}

/// Symbol cells wrap the ticker in a link next to other decorations.
fn link_or_cell_text(cell: &ElementRef<'_>) -> String {
    cell.select(&A)
        .map(|a| cell_text(&a))
        .find(|t| !t.is_empty())
        .unwrap_or_else(|| cell_text(cell))
}

pub(crate) fn extract_fields(cells: &[ElementRef<'_>], category: Category) -> Fields {
    let values = (0..category.columns().len())
        .map(|i| {
            cells.get(i).map(|cell| match (category, i) {
                (Category::Economic, _) => cell_text(cell),
                (_, 0) => link_or_cell_text(cell),
                _ => cell_text(cell),
            })
        })
        .collect();
    Fields::from_values(category, values)
}

fn present<'a>(fields: &'a Fields, name: &str) -> Option<&'a str> {
    fields.get(name).filter(|v| !is_sentinel(v))
}

pub(crate) fn title(fields: &Fields) -> String {
    match fields.category() {
        Category::Economic => present(fields, "event").unwrap_or_default().to_string(),
        _ => match (present(fields, "symbol"), present(fields, "company")) {
            (Some(symbol), Some(company)) => format!("{} - {}", symbol, company),
            (Some(one), None) | (None, Some(one)) => one.to_string(),
            (None, None) => String::new(),
        },
    }
}

pub(crate) fn subtitle(fields: &Fields) -> String {
    match fields.category() {
        Category::Earnings => present(fields, "event_name")
            .or_else(|| present(fields, "call_time"))
            .unwrap_or("Earnings")
            .to_string(),
        Category::Economic => {
            match (present(fields, "country"), present(fields, "event_for")) {
                (Some(country), Some(period)) => format!("{} | {}", country, period),
                (Some(one), None) | (None, Some(one)) => one.to_string(),
                (None, None) => "Economic Event".to_string(),
            }
        }
        Category::Ipo => present(fields, "exchange")
            .map(|exchange| format!("IPO on {}", exchange))
            .unwrap_or_else(|| "IPO".to_string()),
        Category::Splits => present(fields, "ratio")
            .map(|ratio| format!("Split Ratio: {}", ratio))
            .unwrap_or_else(|| "Stock Split".to_string()),
    }
}

/// Maps one table row onto a record. `None` when the row has no cells.
pub fn extract(
    cells: &[ElementRef<'_>],
    category: Category,
    date: NaiveDate,
) -> Option<ExtractedRecord> {
    if cells.is_empty() {
        debug!("Row without cells skipped: {} {}", category, date);
        return None;
    }

    let fields = extract_fields(cells, category);
    let record = ExtractedRecord {
        category,
        date,
        title: title(&fields),
        subtitle: subtitle(&fields),
        fields,
        metadata: Metadata::new(category, date),
    };
    debug!("{} row: {}", category, record.title);
    Some(record)
}
