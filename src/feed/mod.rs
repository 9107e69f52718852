//! Performer feed polling.
//!
//! - [`parser`] turns RSS/Atom documents into coded entries using `feed-rs`
//! - [`fetcher`] fetches each performer's hub feed with exponential backoff
//!   on throttling statuses and hub-domain rotation on timeouts, then stores
//!   new items idempotently
//!
//! # Example
//!
//! ```ignore
//! let poller = FeedPoller::new(client, config.feeds.clone(), db);
//! let run = tracker.try_start()?;
//! let results = poller.poll_all(&run).await;
//! ```

mod fetcher;
mod parser;

pub use fetcher::{backoff_delay, FeedPoller, FetchError, FetchResult};
pub use parser::{parse_feed, ParseResult};
