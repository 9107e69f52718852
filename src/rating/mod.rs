//! External quality ratings scraped from a javdb-style site.
//!
//! A lookup searches the site for a code, follows the first result to its
//! detail page and reads the rating from it. Every request waits a random
//! delay first and blocked (403) requests back off linearly. Lookups never
//! fail loudly: anything that goes wrong ends as "no rating".

mod extract;

use rand::Rng;
use reqwest::header::{self, HeaderMap, HeaderValue};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::RatingConfig;
use crate::jobs::{JobEntry, JobRun};
use crate::storage::Database;

const MAX_PAGE_SIZE: usize = 5 * 1024 * 1024; // 5MB

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
enum ScrapeError {
    #[error("Request timed out")]
    Timeout,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Blocked by site (403)")]
    Blocked,
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Response too large")]
    ResponseTooLarge,
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl ScrapeError {
    /// Returns true if this error is transient and the request should be retried.
    fn is_retryable(&self) -> bool {
        match self {
            ScrapeError::Timeout | ScrapeError::Network(_) | ScrapeError::Blocked => true,
            ScrapeError::HttpStatus(_)
            | ScrapeError::ResponseTooLarge
            | ScrapeError::InvalidUrl(_) => false,
        }
    }
}

/// Uniformly random delay in `[min, max]`; `min` when the range is empty
fn random_delay(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let millis = rand::rng().random_range(min.as_millis() as u64..=max.as_millis() as u64);
    Duration::from_millis(millis)
}

pub struct RatingScraper {
    client: reqwest::Client,
    config: RatingConfig,
}

impl RatingScraper {
    /// Build a scraper with a browser-like session: Chrome user agent,
    /// browser accept headers and a cookie store shared across requests.
    pub fn new(config: RatingConfig) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("zh-TW,zh;q=0.9,en-US;q=0.8,en;q=0.7"),
        );

        let client = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(headers)
            .cookie_store(true)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    fn search_url(&self, code: &str) -> Result<Url, ScrapeError> {
        let mut url = Url::parse(&format!(
            "{}/search",
            self.config.base_url.trim_end_matches('/')
        ))?;
        url.query_pairs_mut()
            .append_pair("q", code)
            .append_pair("f", "all");
        Ok(url)
    }

    /// Look up the rating of one code. `None` means not found for any reason.
    pub async fn fetch_rating(&self, code: &str) -> Option<f64> {
        tracing::debug!(code = %code, "Fetching rating");

        let search_url = match self.search_url(code) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(code = %code, error = %e, "Cannot build search URL");
                return None;
            }
        };

        let search_page = match self.get_page(&search_url).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(code = %code, error = %e, "Rating search failed");
                return None;
            }
        };

        let Some(link) = extract::detail_link(&search_page) else {
            if extract::is_empty_result(&search_page) {
                tracing::info!(code = %code, "No search results");
            } else {
                tracing::warn!(code = %code, "No detail link in search results");
            }
            return None;
        };

        let detail_url = match search_url.join(link) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(code = %code, link = %link, error = %e, "Bad detail link");
                return None;
            }
        };

        let detail_page = match self.get_page(&detail_url).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(code = %code, url = %detail_url, error = %e, "Detail page failed");
                return None;
            }
        };

        match extract::rating(&detail_page) {
            Some((rating, strategy)) => {
                tracing::info!(code = %code, rating = rating, strategy = strategy, "Found rating");
                Some(rating)
            }
            None => {
                tracing::info!(code = %code, "No rating on detail page");
                None
            }
        }
    }

    /// Repeat the whole lookup up to `attempts` times while it finds nothing,
    /// waiting `(i + 1) × retry_wait` between rounds.
    pub async fn fetch_rating_with_retry(&self, code: &str, attempts: u32) -> Option<f64> {
        for i in 0..attempts {
            if let Some(rating) = self.fetch_rating(code).await {
                return Some(rating);
            }
            if i + 1 < attempts {
                let wait = Duration::from_millis(self.config.retry_wait_ms).saturating_mul(i + 1);
                tracing::info!(
                    code = %code,
                    round = i + 1,
                    wait_ms = wait.as_millis() as u64,
                    "Retrying rating lookup"
                );
                tokio::time::sleep(wait).await;
            }
        }
        None
    }

    /// Look up every unrated catalog title and store what is found.
    ///
    /// Each title is recorded on `run` as success, not-found or failed.
    pub async fn backfill(&self, db: &Database, run: &JobRun, limit: Option<i64>) {
        let titles = match db.titles_missing_rating(limit).await {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load unrated titles");
                return;
            }
        };
        run.plan(titles.len());
        tracing::info!(titles = titles.len(), "Starting rating backfill");

        for title in titles {
            let entry = match self.fetch_rating(&title.code).await {
                Some(rating) => match db.set_rating(&title.code, rating).await {
                    Ok(()) => JobEntry::success(&title.code).with_rating(rating),
                    Err(e) => {
                        tracing::warn!(code = %title.code, error = %e, "Failed to store rating");
                        JobEntry::failed(&title.code, e.to_string()).with_rating(rating)
                    }
                },
                None => JobEntry::not_found(&title.code),
            };
            run.record(entry);
        }
    }

    /// GET a page, pausing first and retrying transient failures.
    async fn get_page(&self, url: &Url) -> Result<String, ScrapeError> {
        let max_attempts = self.config.max_retries.max(1);
        let mut retry = 0;

        loop {
            tokio::time::sleep(random_delay(
                Duration::from_millis(self.config.min_delay_ms),
                Duration::from_millis(self.config.max_delay_ms),
            ))
            .await;

            match self.request(url).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && retry + 1 < max_attempts => {
                    let wait =
                        Duration::from_millis(self.config.block_backoff_ms).saturating_mul(retry + 1);
                    tracing::warn!(
                        url = %url,
                        error = %e,
                        retry = retry + 1,
                        max_attempts = max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        "Retrying rating site request"
                    );
                    tokio::time::sleep(wait).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn request(&self, url: &Url) -> Result<String, ScrapeError> {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let response = tokio::time::timeout(timeout, self.client.get(url.clone()).send())
            .await
            .map_err(|_| ScrapeError::Timeout)?
            .map_err(ScrapeError::Network)?;

        match response.status().as_u16() {
            200 => {}
            403 => return Err(ScrapeError::Blocked),
            status => return Err(ScrapeError::HttpStatus(status)),
        }

        if response
            .content_length()
            .is_some_and(|len| len as usize > MAX_PAGE_SIZE)
        {
            return Err(ScrapeError::ResponseTooLarge);
        }
        let body = response.text().await?;
        if body.len() > MAX_PAGE_SIZE {
            return Err(ScrapeError::ResponseTooLarge);
        }
        Ok(body)
    }
}
