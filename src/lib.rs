//! Local media catalog reconciler.
//!
//! Keeps a SQLite catalog of coded titles in step with a Jellyfin/Emby media
//! library, curated CSV ranking lists, per-performer syndication feeds and a
//! scraped external rating, and derives a composite score per title.
//!
//! - [`catalog`] pulls the media library
//! - [`ranking`] loads ranking lists and builds reports from them
//! - [`feed`] polls performer feeds into the store
//! - [`rating`] scrapes ratings
//! - [`score`] computes the composite score
//! - [`jobs`] tracks background batches
//! - [`service`] is the facade the command line drives

pub mod catalog;
pub mod config;
pub mod feed;
pub mod jobs;
pub mod ranking;
pub mod rating;
pub mod score;
pub mod service;
pub mod storage;
pub mod util;

pub use config::Config;
pub use service::Curator;
