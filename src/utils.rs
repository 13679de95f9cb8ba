use chrono::{DateTime, Duration, FixedOffset, NaiveDate};
use lazy_regex::regex;

use crate::CrawlerError;

pub(crate) fn get_now() -> DateTime<FixedOffset> {
    chrono::offset::Local::now().fixed_offset()
}

/// Inclusive, ascending, one day at a time.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>, CrawlerError> {
    if start > end {
        return Err(CrawlerError::InvalidDateRange { start, end });
    }
    let mut dates = vec![];
    let mut current = start;
    while current <= end {
        dates.push(current);
        current += Duration::days(1);
    }
    Ok(dates)
}

/// Reads the integer out of a "1-100 of 250 Results" summary.
///
/// The number after "of" wins when there is one; otherwise every non-digit is
/// stripped and whatever remains is parsed.
pub(crate) fn parse_result_count(text: &str) -> Option<usize> {
    if let Some(caps) = regex!(r"(?i)\bof\s+([\d,]+)").captures(text) {
        let digits: String = caps[1].chars().filter(char::is_ascii_digit).collect();
        if let Ok(n) = digits.parse() {
            return Some(n);
        }
    }
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

pub(crate) fn collapse_whitespace(s: &str) -> String {
    regex!(r"\s+").replace_all(s, " ").trim().to_string()
}
