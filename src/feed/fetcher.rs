use futures::stream::StreamExt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::FeedConfig;
use crate::feed::parser::{parse_feed, ParseResult};
use crate::jobs::{JobEntry, JobRun};
use crate::storage::{Database, Performer};

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Statuses that mean "slow down" or "try again shortly"
const RETRYABLE_STATUSES: [u16; 4] = [429, 502, 503, 504];

/// Errors that can occur while polling one performer's feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Non-2xx status that is not worth retrying
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Feed XML could not be parsed as RSS or Atom
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Database error: {0}")]
    Database(String),
    /// Hub kept answering with a retryable status
    #[error("Status {status} after {retries} retries")]
    RetriesExhausted { status: u16, retries: u32 },
    /// Every configured hub domain timed out
    #[error("All {domains} hub domain(s) timed out")]
    EndpointsExhausted { domains: usize },
    #[error("Performer has no feed id")]
    MissingFeedId,
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
}

/// Result of polling one performer.
#[derive(Debug)]
pub struct FetchResult {
    pub performer_id: i64,
    pub performer: String,
    /// Backoff retries spent, across all domains
    pub retries: u32,
    /// Number of new feed items inserted, or the error that occurred
    pub result: Result<usize, FetchError>,
}

impl FetchResult {
    /// Job log entry describing this outcome
    pub fn to_entry(&self) -> JobEntry {
        let entry = match &self.result {
            Ok(added) => JobEntry::success(&self.performer).with_added(*added),
            Err(e) => JobEntry::failed(&self.performer, e.to_string()),
        };
        entry.with_retries(self.retries)
    }
}

/// Delay before retry number `attempt + 1`: `base × 2^attempt`
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

/// Polls performer feeds from a syndication hub and stores new items.
#[derive(Clone)]
pub struct FeedPoller {
    client: reqwest::Client,
    config: FeedConfig,
    db: Database,
}

impl FeedPoller {
    pub fn new(client: reqwest::Client, config: FeedConfig, db: Database) -> Self {
        Self { client, config, db }
    }

    /// Number of hub domains to rotate through; at least one
    fn domain_count(&self) -> usize {
        self.config.domains.len().max(1)
    }

    /// Feed URL of a performer on the domain at `domain_index`
    pub fn feed_url(&self, feed_id: &str, domain_index: usize) -> Result<Url, FetchError> {
        let route = self.config.route.replace("{id}", feed_id);
        let mut url = Url::parse(&format!(
            "{}{}",
            self.config.hub_url.trim_end_matches('/'),
            route
        ))?;

        if let Some(domain) = self.config.domains.get(domain_index) {
            url.query_pairs_mut().append_pair("domain", domain);
        }
        if !self.config.language.is_empty() {
            url.query_pairs_mut()
                .append_pair("language", &self.config.language);
        }
        Ok(url)
    }

    /// Poll every performer with a feed id, in name order.
    ///
    /// Waits the configured request delay between performers and records
    /// each outcome on `run`. Failures are recorded, never returned.
    pub async fn poll_all(&self, run: &JobRun) -> Vec<FetchResult> {
        let performers = match self.db.feed_performers().await {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load performers for feed refresh");
                return Vec::new();
            }
        };
        run.plan(performers.len());

        let mut results = Vec::with_capacity(performers.len());
        for (i, performer) in performers.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.request_delay()).await;
            }

            let result = self.poll_one(performer).await;
            run.record(result.to_entry());
            results.push(result);
        }

        results
    }

    /// Fetch one performer's feed and insert the new items.
    pub async fn poll_one(&self, performer: &Performer) -> FetchResult {
        let mut retries = 0;
        let result = self.fetch_and_store(performer, &mut retries).await;

        match &result {
            Ok(added) => tracing::info!(
                performer = %performer.name,
                added = added,
                retries = retries,
                "Feed polled"
            ),
            Err(e) => tracing::warn!(
                performer = %performer.name,
                error = %e,
                retries = retries,
                "Feed poll failed"
            ),
        }

        FetchResult {
            performer_id: performer.id,
            performer: performer.name.clone(),
            retries,
            result,
        }
    }

    async fn fetch_and_store(
        &self,
        performer: &Performer,
        retries: &mut u32,
    ) -> Result<usize, FetchError> {
        let feed_id = performer
            .feed_id
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .ok_or(FetchError::MissingFeedId)?;

        let bytes = self.fetch_bytes(&performer.name, feed_id, retries).await?;

        let ParseResult { entries, skipped } =
            parse_feed(&bytes).map_err(|e| FetchError::Parse(e.to_string()))?;
        if skipped > 0 {
            tracing::debug!(
                performer = %performer.name,
                skipped = skipped,
                "Feed entries without a code skipped"
            );
        }

        let mut added = 0;
        for entry in &entries {
            let watched = self
                .db
                .title_has_performer(&entry.code, &performer.name)
                .await
                .map_err(|e| FetchError::Database(e.to_string()))?;
            if self
                .db
                .insert_feed_item(performer.id, entry, watched)
                .await
                .map_err(|e| FetchError::Database(e.to_string()))?
            {
                added += 1;
            }
        }

        self.db
            .touch_performer_sync(performer.id)
            .await
            .map_err(|e| FetchError::Database(e.to_string()))?;

        Ok(added)
    }

    /// Download the feed body, retrying and rotating domains as needed.
    async fn fetch_bytes(
        &self,
        performer: &str,
        feed_id: &str,
        retries: &mut u32,
    ) -> Result<Vec<u8>, FetchError> {
        let max_retries = self.config.max_retries;
        let domains = self.domain_count();

        let mut attempt: u32 = 0;
        let mut domain_index: usize = 0;

        loop {
            let url = self.feed_url(feed_id, domain_index)?;
            let sent =
                tokio::time::timeout(self.config.timeout(), self.client.get(url).send()).await;

            let response = match sent {
                Err(_) => {
                    if domain_index + 1 < domains {
                        domain_index += 1;
                        attempt = 0;
                        tracing::warn!(
                            performer = %performer,
                            domain_index = domain_index,
                            "Feed request timed out, switching hub domain"
                        );
                        continue;
                    }
                    if attempt < max_retries {
                        self.back_off(performer, "timeout", attempt).await;
                        attempt += 1;
                        *retries += 1;
                        continue;
                    }
                    return Err(FetchError::EndpointsExhausted { domains });
                }
                Ok(Err(e)) => {
                    if attempt < max_retries {
                        self.back_off(performer, "network error", attempt).await;
                        attempt += 1;
                        *retries += 1;
                        continue;
                    }
                    return Err(FetchError::Network(e));
                }
                Ok(Ok(response)) => response,
            };

            let status = response.status().as_u16();
            if RETRYABLE_STATUSES.contains(&status) {
                if attempt < max_retries {
                    self.back_off(performer, "retryable status", attempt).await;
                    attempt += 1;
                    *retries += 1;
                    continue;
                }
                return Err(FetchError::RetriesExhausted {
                    status,
                    retries: max_retries,
                });
            }

            if !response.status().is_success() {
                return Err(FetchError::HttpStatus(status));
            }

            return read_limited_bytes(response, MAX_FEED_SIZE).await;
        }
    }

    async fn back_off(&self, performer: &str, reason: &str, attempt: u32) {
        let delay = backoff_delay(self.config.retry_base_delay(), attempt);
        tracing::warn!(
            performer = %performer,
            reason = reason,
            retry = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "Backing off before retrying feed"
        );
        tokio::time::sleep(delay).await;
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
