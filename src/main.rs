use chrono::{Days, Local, NaiveDate};
use clap::Parser;
use std::{path::PathBuf, time};
use tracing::info;
use tracing_error::ErrorLayer;
use tracing_subscriber::prelude::*;
use yf_calendar_crawler::calendar::Category;
use yf_calendar_crawler::config::CrawlConfig;
use yf_calendar_crawler::fetch::HttpFetcher;
use yf_calendar_crawler::run_crawler;

/// Crawl Yahoo Finance calendars into per-category JSON files.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// First day to crawl (YYYY-MM-DD), defaults to today
    #[arg(long)]
    start_date: Option<NaiveDate>,

    /// Last day to crawl (YYYY-MM-DD), defaults to start + 7 days
    #[arg(long)]
    end_date: Option<NaiveDate>,

    /// Crawl today +/- this many days when no dates are given
    #[arg(long)]
    days: Option<u64>,

    /// Comma separated categories: earnings,economic,ipo,splits
    #[arg(long, value_delimiter = ',')]
    events: Vec<Category>,

    /// Output file prefix, `{prefix}_{category}.json`
    #[arg(long)]
    output: Option<String>,

    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(long)]
    page_size: Option<usize>,

    /// Seconds between requests
    #[arg(long)]
    delay: Option<f64>,

    /// JSON file with crawl settings, flags win over it
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Args {
    fn into_config(self, today: NaiveDate) -> Result<CrawlConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => CrawlConfig::from_file(path)?,
            None => CrawlConfig::default(),
        };

        if let (Some(days), None, None) = (self.days, self.start_date, self.end_date) {
            let (start, end) = window(today, days).ok_or("--days is out of the date range")?;
            config.start_date = Some(start);
            config.end_date = Some(end);
        }
        if self.start_date.is_some() {
            config.start_date = self.start_date;
        }
        if self.end_date.is_some() {
            config.end_date = self.end_date;
        }
        if !self.events.is_empty() {
            config.categories = self.events;
        }
        if self.output.is_some() {
            config.output_prefix = self.output;
        }
        if let Some(dir) = self.output_dir {
            config.output_dir = dir;
        }
        if let Some(page_size) = self.page_size {
            config.page_size = page_size;
        }
        if let Some(delay) = self.delay {
            config.download_delay = time::Duration::try_from_secs_f64(delay)?;
        }
        Ok(config)
    }
}

/// `today` +/- `days`, `None` when either end falls outside the calendar.
fn window(today: NaiveDate, days: u64) -> Option<(NaiveDate, NaiveDate)> {
    let days = Days::new(days);
    Some((today.checked_sub_days(days)?, today.checked_add_days(days)?))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| {
                "info,html5ever=error,selectors=error,hyper=warn,reqwest=info".into()
            }),
        )
        .with(ErrorLayer::default())
        .init();

    let today = Local::now().date_naive();
    let config = Args::parse().into_config(today)?;

    let fetcher = HttpFetcher::new(&config)?;
    let report = run_crawler(&config, today, fetcher).await?;

    let written = report.collections.write(
        &config.output_dir,
        config.output_prefix.as_deref(),
        today,
    )?;
    report.log();
    info!("Files written: {}", written.len());

    Ok(())
}
