use chrono::NaiveDate;

#[derive(Debug, thiserror::Error)]
pub enum CrawlerError {
    #[error("Http error")]
    HttpError(#[from] reqwest::Error),

    #[error("Unexpected status {status} for {url}")]
    HttpStatus {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("Invalid header value")]
    HeaderError(#[from] reqwest::header::InvalidHeaderValue),

    #[error("Throttle closed")]
    ThrottleError(#[from] tokio::sync::AcquireError),

    #[error("Io error")]
    IoError(#[from] std::io::Error),

    #[error("Json error")]
    JsonError(#[from] serde_json::Error),

    #[error("Unknown calendar category: {0}")]
    UnknownCategory(String),

    #[error("Invalid date range: {start} is after {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("Crawl interrupted")]
    Interrupted,
}
