use super::{CalendarRequestUnit, Category, PageSummary};

use std::collections::HashMap;
use tracing::{info, warn};

/// Decides what follows a parsed page.
#[derive(Debug, Clone)]
pub struct Paginator {
    max_table_retries: u32,
    offset_ceilings: HashMap<Category, usize>,
}

impl Paginator {
    pub fn new(max_table_retries: u32, offset_ceilings: HashMap<Category, usize>) -> Self {
        Paginator {
            max_table_retries,
            offset_ceilings,
        }
    }

    /// The following page, or `None` once the chain is done.
    ///
    /// Advances by the rows actually found, not by the page size, so a short
    /// page never skips rows.
    pub fn next_unit(
        &self,
        current: &CalendarRequestUnit,
        summary: &PageSummary,
    ) -> Option<CalendarRequestUnit> {
        if !summary.has_next || summary.valid_rows == 0 {
            return None;
        }

        let next_offset = current.offset + summary.valid_rows;
        if next_offset >= summary.total_expected {
            return None;
        }

        if let Some(ceiling) = self.offset_ceilings.get(&current.category) {
            if next_offset > *ceiling {
                warn!(
                    "Offset ceiling {} reached for {} {}",
                    ceiling, current.category, current.date
                );
                return None;
            }
        }

        info!(
            "Next page: {} {} @{} of {}",
            current.category, current.date, next_offset, summary.total_expected
        );
        Some(CalendarRequestUnit {
            offset: next_offset,
            attempt: 0,
            ..current.clone()
        })
    }

    /// The identical request again after a missing table, or `None` when the
    /// retry budget is spent.
    pub fn retry(&self, current: &CalendarRequestUnit) -> Option<CalendarRequestUnit> {
        if current.attempt >= self.max_table_retries {
            return None;
        }
        Some(CalendarRequestUnit {
            attempt: current.attempt + 1,
            ..current.clone()
        })
    }
}
