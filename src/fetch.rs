use crate::{config::CrawlConfig, CrawlerError, Fetcher};

use rand::Rng;
use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    StatusCode, Url,
};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tokio::{
    sync::{Mutex, OwnedSemaphorePermit, Semaphore},
    time::{Duration, Instant},
};
use tracing::{debug, warn};

fn default_headers(user_agent: &str) -> Result<HeaderMap, CrawlerError> {
    let mut headers = HeaderMap::new();
    headers.insert(header::USER_AGENT, HeaderValue::from_str(user_agent)?);
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8",
        ),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9"),
    );
    headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("document"));
    headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("navigate"));
    headers.insert("Sec-Fetch-Site", HeaderValue::from_static("none"));
    headers.insert("Sec-Fetch-User", HeaderValue::from_static("?1"));
    headers.insert(
        header::UPGRADE_INSECURE_REQUESTS,
        HeaderValue::from_static("1"),
    );
    Ok(headers)
}

/// Plain GET over reqwest with status based retries. No cookie store.
///
/// The n-th retry waits n times the download delay.
pub struct HttpFetcher {
    client: reqwest::Client,
    retries: u32,
    retry_statuses: Vec<StatusCode>,
    retry_delay: Duration,
}

impl HttpFetcher {
    pub fn new(config: &CrawlConfig) -> Result<Self, CrawlerError> {
        let client = reqwest::Client::builder()
            .default_headers(default_headers(&config.user_agent)?)
            .timeout(config.timeout)
            .build()?;
        let retry_statuses = config
            .retry_statuses
            .iter()
            .filter_map(|s| StatusCode::from_u16(*s).ok())
            .collect();
        Ok(HttpFetcher {
            client,
            retries: config.http_retries,
            retry_statuses,
            retry_delay: config.download_delay,
        })
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, CrawlerError> {
        let mut attempt = 0;
        loop {
            match self.client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp.text().await?),
                Ok(resp)
                    if self.retry_statuses.contains(&resp.status()) && attempt < self.retries =>
                {
                    warn!("Retrying {} after status {}", url, resp.status());
                }
                Ok(resp) => {
                    return Err(CrawlerError::HttpStatus {
                        status: resp.status(),
                        url: url.to_string(),
                    })
                }
                Err(e) if attempt < self.retries => {
                    warn!("Retrying {} after error: {}", url, e);
                }
                Err(e) => return Err(e.into()),
            }
            attempt += 1;
            tokio::time::sleep(self.retry_delay * attempt).await;
        }
    }
}

/// Held while a request is in flight.
pub struct Permit {
    _global: OwnedSemaphorePermit,
    _domain: OwnedSemaphorePermit,
}

/// Global and per-host concurrency limits plus the delay between requests.
pub struct Throttle {
    global: Arc<Semaphore>,
    per_domain: Mutex<HashMap<String, Arc<Semaphore>>>,
    per_domain_limit: usize,
    delay: Duration,
    randomize: bool,
    last_request: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(config: &CrawlConfig) -> Self {
        Throttle {
            global: Arc::new(Semaphore::new(config.concurrent_requests.max(1))),
            per_domain: Mutex::new(HashMap::new()),
            per_domain_limit: config.concurrent_requests_per_domain.max(1),
            delay: config.download_delay,
            randomize: config.randomize_delay,
            last_request: Mutex::new(None),
        }
    }

    fn next_delay(&self) -> Duration {
        if self.randomize && !self.delay.is_zero() {
            self.delay.mul_f64(rand::rng().random_range(0.5..1.5))
        } else {
            self.delay
        }
    }

    pub async fn acquire(&self, url: &str) -> Result<Permit, CrawlerError> {
        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(ToString::to_string))
            .unwrap_or_default();
        let domain = {
            let mut per_domain = self.per_domain.lock().await;
            per_domain
                .entry(host)
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_domain_limit)))
                .clone()
        };

        let global = self.global.clone().acquire_owned().await?;
        let domain = domain.acquire_owned().await?;

        let mut last_request = self.last_request.lock().await;
        if let Some(last) = last_request.take() {
            let delay = self.next_delay();
            let elapsed = Instant::now().duration_since(last);
            if elapsed < delay {
                tokio::time::sleep(delay - elapsed).await;
            }
        }
        last_request.replace(Instant::now());

        Ok(Permit {
            _global: global,
            _domain: domain,
        })
    }
}

/// Remembers requested URLs. Repeats are dropped unless `dont_filter` is set.
#[derive(Default)]
pub struct RequestFilter {
    seen: Mutex<HashSet<String>>,
}

impl RequestFilter {
    pub async fn admit(&self, url: &str, dont_filter: bool) -> bool {
        let fresh = self.seen.lock().await.insert(url.to_string());
        if !fresh && !dont_filter {
            debug!("Filtered duplicate request {}", url);
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    fn config(delay_ms: u64) -> CrawlConfig {
        CrawlConfig {
            download_delay: Duration::from_millis(delay_ms),
            randomize_delay: false,
            ..CrawlConfig::default()
        }
    }

    #[tokio::test]
    async fn test_filter_drops_repeats_unless_forced() {
        let filter = RequestFilter::default();
        let url = "https://finance.yahoo.com/calendar/ipo?day=2024-03-10&offset=0&size=100";
        assert!(filter.admit(url, false).await);
        assert!(!filter.admit(url, false).await);
        assert!(filter.admit(url, true).await);
    }

    #[tokio::test]
    async fn test_throttle_spaces_requests() {
        let throttle = Throttle::new(&config(50));
        let started = Instant::now();
        drop(throttle.acquire("https://finance.yahoo.com/a").await.unwrap());
        drop(throttle.acquire("https://finance.yahoo.com/b").await.unwrap());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_global_limit_bounds_permits() {
        let throttle = Throttle::new(&CrawlConfig {
            concurrent_requests: 1,
            ..config(0)
        });
        let held = throttle.acquire("https://finance.yahoo.com/a").await.unwrap();
        let second = tokio::time::timeout(
            Duration::from_millis(20),
            throttle.acquire("https://finance.yahoo.com/b"),
        )
        .await;
        assert!(second.is_err());
        drop(held);
        assert!(throttle.acquire("https://finance.yahoo.com/b").await.is_ok());
    }

    /// Answers with `statuses` in turn, repeating the last one, and records
    /// when each request arrived.
    async fn serve(statuses: Vec<u16>) -> (String, Arc<Mutex<Vec<Instant>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/calendar/ipo", listener.local_addr().unwrap());
        let arrivals = Arc::new(Mutex::new(vec![]));
        let seen = arrivals.clone();
        tokio::spawn(async move {
            let mut n = 0;
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut request = vec![];
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(read) => request.extend_from_slice(&buf[..read]),
                    }
                }
                seen.lock().await.push(Instant::now());
                let status = statuses[n.min(statuses.len() - 1)];
                n += 1;
                let response = format!(
                    "HTTP/1.1 {} Status\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
                    status
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        (url, arrivals)
    }

    #[tokio::test]
    async fn test_retryable_status_backs_off_then_succeeds() {
        let (url, arrivals) = serve(vec![429, 429, 429, 200]).await;
        let fetcher = HttpFetcher::new(&config(20)).unwrap();

        assert_eq!(fetcher.fetch(&url).await.unwrap(), "ok");

        let arrivals = arrivals.lock().await;
        assert_eq!(arrivals.len(), 4);
        for (n, pair) in arrivals.windows(2).enumerate() {
            let gap = pair[1].duration_since(pair[0]);
            assert!(gap >= Duration::from_millis(20) * (n as u32 + 1), "gap {:?}", gap);
        }
    }

    #[tokio::test]
    async fn test_retryable_status_gives_up_after_budget() {
        let (url, arrivals) = serve(vec![503]).await;
        let fetcher = HttpFetcher::new(&config(0)).unwrap();

        let result = fetcher.fetch(&url).await;
        assert!(matches!(
            result,
            Err(CrawlerError::HttpStatus { status, .. }) if status == StatusCode::SERVICE_UNAVAILABLE
        ));
        assert_eq!(arrivals.lock().await.len(), 4);
    }

    #[tokio::test]
    async fn test_other_status_fails_without_retry() {
        let (url, arrivals) = serve(vec![404, 200]).await;
        let fetcher = HttpFetcher::new(&config(0)).unwrap();

        let result = fetcher.fetch(&url).await;
        assert!(matches!(
            result,
            Err(CrawlerError::HttpStatus { status, .. }) if status == StatusCode::NOT_FOUND
        ));
        assert_eq!(arrivals.lock().await.len(), 1);
    }

    #[test]
    fn test_default_headers_carry_user_agent() {
        let headers = default_headers("test-agent").unwrap();
        assert_eq!(headers.get(header::USER_AGENT).unwrap(), "test-agent");
        assert!(default_headers("bad\nagent").is_err());
    }
}
