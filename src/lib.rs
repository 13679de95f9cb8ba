use chrono::NaiveDate;
use futures::future;
use std::{collections::BTreeMap, future::Future, sync::Arc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub mod calendar;
pub mod config;
pub mod data;
pub mod fetch;
pub mod progress;

mod error;
mod utils;

pub use error::CrawlerError;
pub use utils::date_range;

use calendar::{
    CalendarPage, CalendarRequestUnit, Category, ExtractedRecord, PageOutcome, PageSummary,
    Paginator, Pipeline,
};
use config::CrawlConfig;
use data::Collections;
use fetch::{RequestFilter, Throttle};
use progress::CollectionProgress;

/// Page transport. Implementations own HTTP level retries.
#[async_trait::async_trait]
pub trait Fetcher {
    async fn fetch(&self, url: &str) -> Result<String, CrawlerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StopReason {
    Exhausted,
    TableMissing,
    FetchFailed,
    Filtered,
}

#[derive(Debug)]
enum ChainEvent {
    Page {
        unit: CalendarRequestUnit,
        summary: PageSummary,
        records: Vec<ExtractedRecord>,
    },
    Done {
        unit: CalendarRequestUnit,
        reason: StopReason,
    },
}

#[derive(Debug)]
enum UnitState {
    Fetching(CalendarRequestUnit),
    Parsing(CalendarRequestUnit, String),
    Continuing(CalendarRequestUnit),
    Retrying(CalendarRequestUnit),
    Done(CalendarRequestUnit, StopReason),
}

struct ChainContext<F> {
    fetcher: F,
    throttle: Throttle,
    filter: RequestFilter,
    paginator: Paginator,
    base_url: String,
    row_slots: usize,
}

/// Everything a finished run hands back for writing and reporting.
#[derive(Debug, Default)]
pub struct CrawlReport {
    pub collections: Collections,
    pub progress: BTreeMap<Category, CollectionProgress>,
    pub rejected: usize,
    pub stopped: BTreeMap<StopReason, usize>,
}

impl CrawlReport {
    pub fn log(&self) {
        progress::log_report(&self.progress, &self.collections);
        info!("Rejected records: {}", self.rejected);
        for (reason, count) in &self.stopped {
            info!("Chains stopped ({:?}): {}", reason, count);
        }
    }
}

/// Crawls until every chain stops or Ctrl-C is pressed.
pub async fn run_crawler<F>(
    config: &CrawlConfig,
    today: NaiveDate,
    fetcher: F,
) -> Result<CrawlReport, CrawlerError>
where
    F: Fetcher + Send + Sync + 'static,
{
    let interrupt = async {
        if tokio::signal::ctrl_c().await.is_err() {
            future::pending::<()>().await;
        }
    };
    run_crawler_until(config, today, fetcher, interrupt).await
}

/// Like [`run_crawler`] with a caller supplied shutdown signal. Collections
/// are discarded when `shutdown` fires first.
pub async fn run_crawler_until<F, S>(
    config: &CrawlConfig,
    today: NaiveDate,
    fetcher: F,
    shutdown: S,
) -> Result<CrawlReport, CrawlerError>
where
    F: Fetcher + Send + Sync + 'static,
    S: Future<Output = ()>,
{
    let (start, end) = config.date_bounds(today);
    let dates = date_range(start, end)?;
    info!("Crawl range: {} ~ {} ({} days)", start, end, dates.len());

    let ctx = Arc::new(ChainContext {
        fetcher,
        throttle: Throttle::new(config),
        filter: RequestFilter::default(),
        paginator: Paginator::new(config.max_table_retries, config.offset_ceilings.clone()),
        base_url: config.base_url.clone(),
        row_slots: config.row_slots.min(calendar::MAX_ROW_SLOTS),
    });

    let (tx, mut rx) = mpsc::channel::<ChainEvent>(64);
    let mut handles = vec![];
    for date in &dates {
        for category in &config.categories {
            let unit = CalendarRequestUnit::new(*category, *date, config.page_size);
            debug!("Request created: {}", unit);
            handles.push(tokio::spawn(handle(unit, ctx.clone(), tx.clone())));
        }
    }
    drop(tx);
    info!("Initial requests: {}", handles.len());

    let mut report = CrawlReport::default();
    let mut pipeline = Pipeline::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(ChainEvent::Page { unit, summary, records }) => {
                    let progress = report.progress.entry(unit.category).or_default();
                    progress.record_page(unit.date, &summary);
                    info!(
                        "Progress: {} - {}/{} ({:.1}%), rows on page: {}",
                        unit.category.as_str().to_uppercase(),
                        progress.collected_count,
                        progress.total_expected(),
                        progress.completion(),
                        summary.valid_rows
                    );

                    for record in records {
                        if let Ok(validated) = pipeline.accept(record) {
                            report.collections.push(validated);
                        }
                    }
                }
                Some(ChainEvent::Done { unit, reason }) => {
                    debug!("Chain done: {} ({:?})", unit, reason);
                    *report.stopped.entry(reason).or_default() += 1;
                }
                None => break,
            },
            _ = &mut shutdown => {
                warn!("Crawl interrupted, discarding {} records", report.collections.len());
                for h in &handles {
                    h.abort();
                }
                return Err(CrawlerError::Interrupted);
            }
        }
    }

    for result in future::join_all(handles).await {
        if let Err(e) = result {
            error!("Chain task failed: {}", e);
        }
    }

    report.rejected = pipeline.rejected();
    Ok(report)
}

/// Walks the pages of one (category, date) pair.
async fn handle<F>(
    first: CalendarRequestUnit,
    ctx: Arc<ChainContext<F>>,
    tx: mpsc::Sender<ChainEvent>,
) where
    F: Fetcher + Send + Sync,
{
    let mut state = UnitState::Fetching(first);
    loop {
        state = match state {
            UnitState::Fetching(unit) => {
                let url = unit.url(&ctx.base_url);
                // Pages past the first and table retries repeat known URLs.
                let dont_filter = unit.offset > 0 || unit.attempt > 0;
                if !ctx.filter.admit(&url, dont_filter).await {
                    UnitState::Done(unit, StopReason::Filtered)
                } else {
                    let html = match ctx.throttle.acquire(&url).await {
                        Ok(_permit) => {
                            debug!("Visit {}", url);
                            ctx.fetcher.fetch(&url).await
                        }
                        Err(e) => Err(e),
                    };
                    match html {
                        Ok(html) => UnitState::Parsing(unit, html),
                        Err(e) => {
                            error!("Request failed: {} ({}): {}", unit, url, e);
                            UnitState::Done(unit, StopReason::FetchFailed)
                        }
                    }
                }
            }

            UnitState::Parsing(unit, html) => {
                let outcome = {
                    let page = CalendarPage::parse(&html);
                    page.process(&unit, ctx.row_slots)
                };
                match outcome {
                    PageOutcome::TableMissing => UnitState::Retrying(unit),
                    PageOutcome::Parsed { summary, records } => {
                        let next = ctx.paginator.next_unit(&unit, &summary);
                        let event = ChainEvent::Page {
                            unit: unit.clone(),
                            summary,
                            records,
                        };
                        if tx.send(event).await.is_err() {
                            return;
                        }
                        match next {
                            Some(next) => UnitState::Continuing(next),
                            None => UnitState::Done(unit, StopReason::Exhausted),
                        }
                    }
                }
            }

            UnitState::Continuing(next) => UnitState::Fetching(next),

            UnitState::Retrying(unit) => match ctx.paginator.retry(&unit) {
                Some(again) => {
                    warn!("Table not found: {}, retrying (attempt {})", unit, again.attempt);
                    UnitState::Fetching(again)
                }
                None => {
                    error!(
                        "Table not found for {} after {} attempts",
                        unit.url(&ctx.base_url),
                        unit.attempt + 1
                    );
                    UnitState::Done(unit, StopReason::TableMissing)
                }
            },

            UnitState::Done(unit, reason) => {
                let _ = tx.send(ChainEvent::Done { unit, reason }).await;
                return;
            }
        };
    }
}
