//! Media-library synchronization.
//!
//! Pulls every movie from a Jellyfin/Emby compatible `/Items` endpoint page by
//! page and upserts the ones whose name starts with a code. Score and rating of
//! existing titles are left alone by the upsert.

use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::LibraryConfig;
use crate::storage::{CatalogItem, Database, DatabaseError};
use crate::util::extract_code;

const MAX_PAGE_SIZE: usize = 50 * 1024 * 1024; // 50MB
const ITEM_FIELDS: &str = "ProviderIds,ProductionYear,DateCreated,People";
const AUTH_HEADER: &str = "X-Emby-Token";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Invalid library URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Request timed out")]
    Timeout,
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Response too large")]
    ResponseTooLarge,
    #[error("Unexpected library response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ItemsPage {
    #[serde(default)]
    items: Vec<LibraryItem>,
    total_record_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LibraryItem {
    id: Option<String>,
    #[serde(default)]
    name: String,
    production_year: Option<i64>,
    date_created: Option<String>,
    #[serde(default)]
    people: Vec<LibraryPerson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LibraryPerson {
    #[serde(default)]
    name: String,
    #[serde(rename = "Type")]
    kind: Option<String>,
}

impl LibraryItem {
    /// Convert to a catalog row; `None` when the name carries no code
    fn into_catalog_item(self) -> Option<CatalogItem> {
        let code = extract_code(&self.name)?.to_string();
        let performers = self
            .people
            .into_iter()
            .filter(|p| p.kind.as_deref() == Some("Actor"))
            .map(|p| p.name)
            .filter(|n| !n.trim().is_empty())
            .collect();
        let date_added = self
            .date_created
            .map(|d| d.chars().take(10).collect::<String>())
            .filter(|d| !d.is_empty());

        Some(CatalogItem {
            code,
            title: self.name,
            year: self.production_year,
            performers,
            library_id: self.id,
            date_added,
        })
    }
}

// ============================================================================
// Synchronizer
// ============================================================================

pub struct CatalogSynchronizer {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    page_size: u32,
    timeout: Duration,
    db: Database,
}

impl CatalogSynchronizer {
    pub fn new(client: reqwest::Client, config: &LibraryConfig, db: Database) -> Self {
        Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.secret_key(),
            page_size: config.page_size.max(1),
            timeout: config.timeout(),
            db,
        }
    }

    /// Pull the whole library and upsert every coded item.
    ///
    /// Returns the number of titles written. Any network, HTTP or decode
    /// failure aborts the run; rows written before the failure stay.
    pub async fn sync(&self) -> Result<usize, SyncError> {
        let mut start_index: u64 = 0;
        let mut synced = 0;
        let mut skipped = 0;
        let mut previous_first_id: Option<String> = None;

        loop {
            let page = self.fetch_page(start_index).await?;
            let received = page.items.len();
            let total = page.total_record_count;

            // A server that ignores StartIndex hands back the same page again
            let first_id = page.items.first().and_then(|item| item.id.clone());
            if start_index > 0 && first_id.is_some() && first_id == previous_first_id {
                tracing::warn!(
                    start_index = start_index,
                    "Library returned the previous page again, stopping"
                );
                break;
            }
            previous_first_id = first_id;

            for item in page.items {
                match item.into_catalog_item() {
                    Some(catalog_item) => {
                        self.db.upsert_title(&catalog_item).await?;
                        synced += 1;
                    }
                    None => skipped += 1,
                }
            }

            tracing::debug!(
                start_index = start_index,
                received = received,
                "Fetched library page"
            );

            start_index += received as u64;
            if received < self.page_size as usize || total.is_some_and(|t| start_index >= t) {
                break;
            }
        }

        tracing::info!(synced = synced, skipped = skipped, "Catalog sync complete");
        Ok(synced)
    }

    fn page_url(&self, start_index: u64) -> Result<Url, SyncError> {
        let mut url = Url::parse(&format!("{}/Items", self.base_url))?;
        url.query_pairs_mut()
            .append_pair("Recursive", "true")
            .append_pair("IncludeItemTypes", "Movie")
            .append_pair("Fields", ITEM_FIELDS)
            .append_pair("StartIndex", &start_index.to_string())
            .append_pair("Limit", &self.page_size.to_string());
        Ok(url)
    }

    async fn fetch_page(&self, start_index: u64) -> Result<ItemsPage, SyncError> {
        let mut request = self.client.get(self.page_url(start_index)?);
        if let Some(key) = &self.api_key {
            request = request.header(AUTH_HEADER, key.expose_secret());
        }

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| SyncError::Timeout)?
            .map_err(SyncError::Network)?;

        if !response.status().is_success() {
            return Err(SyncError::HttpStatus(response.status().as_u16()));
        }

        let bytes = read_limited_bytes(response, MAX_PAGE_SIZE).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, SyncError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(SyncError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(SyncError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(SyncError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}
