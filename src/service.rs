//! The request-handling surface of the system.
//!
//! [`Curator`] ties the store, configuration, HTTP session and job trackers
//! together. Read operations answer directly from the store and the ranking
//! files; feed refresh and rating backfill run as tracked batches that may be
//! started in the background or awaited in place.

use anyhow::{Context, Result};
use reqwest::redirect::Policy;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::catalog::{CatalogSynchronizer, SyncError};
use crate::config::Config;
use crate::feed::FeedPoller;
use crate::jobs::{JobError, JobKind, JobRun, JobSnapshot, JobSummary, JobTracker};
use crate::ranking::report::{self, MissingList, RankedPage};
use crate::ranking::{self, RankingSnapshot, RankingSource};
use crate::rating::RatingScraper;
use crate::score::{self, ScoreEngine};
use crate::storage::{CatalogStats, Database, FeedItem, MediaTitle, Performer, TitleQuery};
use crate::util::catch_task_panic;

/// A catalog title with the labels of every ranking list that contains it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaggedTitle {
    #[serde(flatten)]
    pub title: MediaTitle,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    #[serde(flatten)]
    pub catalog: CatalogStats,
    /// Size of every configured ranking list; 0 when a list failed to load
    pub lists: BTreeMap<String, usize>,
}

/// How often a performer is credited across the catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformerCount {
    pub name: String,
    pub count: usize,
    pub codes: Vec<String>,
}

/// One tracker per job kind.
#[derive(Debug, Clone)]
pub struct Jobs {
    pub feed_refresh: Arc<JobTracker>,
    pub rating_backfill: Arc<JobTracker>,
}

impl Default for Jobs {
    fn default() -> Self {
        Self {
            feed_refresh: Arc::new(JobTracker::new(JobKind::FeedRefresh)),
            rating_backfill: Arc::new(JobTracker::new(JobKind::RatingBackfill)),
        }
    }
}

fn create_redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 3 {
            return attempt.error("Too many redirects (max 3)");
        }
        tracing::debug!(
            to = %attempt.url(),
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );
        attempt.follow()
    })
}

#[derive(Clone)]
pub struct Curator {
    db: Database,
    config: Arc<Config>,
    http: reqwest::Client,
    scraper: Arc<RatingScraper>,
    jobs: Jobs,
}

impl Curator {
    /// Open the configured database and build the HTTP sessions.
    pub async fn open(config: Config) -> Result<Self> {
        if let Some(parent) = config.database.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
            }
        }
        let db = Database::open(&config.database.to_string_lossy())
            .await
            .with_context(|| format!("Failed to open {}", config.database.display()))?;
        Self::with_database(config, db)
    }

    /// Build a curator around an already-open database
    pub fn with_database(config: Config, db: Database) -> Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(create_redirect_policy())
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client")?;
        let scraper = RatingScraper::new(config.rating.clone())
            .context("Failed to build rating scraper session")?;

        Ok(Self {
            db,
            config: Arc::new(config),
            http,
            scraper: Arc::new(scraper),
            jobs: Jobs::default(),
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Ranking lists as currently on disk; re-read on every call
    pub fn rankings(&self) -> RankingSnapshot {
        let sources: Vec<RankingSource> =
            self.config.rankings.iter().map(RankingSource::from).collect();
        ranking::load(&sources)
    }

    // ========================================================================
    // Catalog
    // ========================================================================

    /// Pull the media library into the catalog
    pub async fn sync_catalog(&self) -> Result<usize, SyncError> {
        CatalogSynchronizer::new(self.http.clone(), &self.config.library, self.db.clone())
            .sync()
            .await
    }

    /// Recompute every stored score; returns how many changed
    pub async fn recompute_scores(&self) -> Result<usize> {
        let rankings = self.rankings();
        let feed_linked = self.db.feed_linked_names().await?;
        let engine = ScoreEngine::new(&rankings, &self.config.score, &feed_linked);
        score::recompute_scores(&self.db, &engine).await
    }

    pub async fn list_titles(&self, query: &TitleQuery) -> Result<Vec<TaggedTitle>> {
        let rankings = self.rankings();
        let titles = self.db.list_titles(query).await?;
        Ok(tag_titles(&rankings, titles))
    }

    pub async fn list_by_label(
        &self,
        label: &str,
        offset: usize,
        limit: usize,
    ) -> Result<RankedPage> {
        let rankings = self.rankings();
        let catalog: HashMap<String, MediaTitle> = self
            .db
            .all_titles()
            .await?
            .into_iter()
            .map(|t| (t.code.clone(), t))
            .collect();
        Ok(report::list_by_label(&rankings, label, &catalog, offset, limit))
    }

    /// Ranked codes absent from the catalog, per list
    pub async fn missing(&self) -> Result<Vec<MissingList>> {
        let rankings = self.rankings();
        let codes = self.db.catalog_codes().await?;
        Ok(report::missing_report(&rankings, &codes))
    }

    pub async fn stats(&self) -> Result<Stats> {
        let rankings = self.rankings();
        let catalog = self.db.stats().await?;
        let lists = self
            .config
            .rankings
            .iter()
            .map(|source| (source.label.clone(), rankings.len_of(&source.label)))
            .collect();
        Ok(Stats { catalog, lists })
    }

    // ========================================================================
    // Performers
    // ========================================================================

    pub async fn list_performers(&self) -> Result<Vec<Performer>> {
        self.db.list_performers().await
    }

    pub async fn add_performer(&self, name: &str, feed_id: Option<&str>) -> Result<Performer> {
        self.db.insert_performer(name, feed_id).await?;
        self.db
            .get_performer(name.trim())
            .await?
            .with_context(|| format!("Performer {name} vanished after insert"))
    }

    /// Returns `false` when no performer has that id
    pub async fn update_performer(
        &self,
        performer_id: i64,
        feed_id: Option<&str>,
        watch: Option<bool>,
    ) -> Result<bool> {
        Ok(self.db.update_performer(performer_id, feed_id, watch).await?)
    }

    pub async fn remove_performer(&self, performer_id: i64) -> Result<bool> {
        Ok(self.db.delete_performer(performer_id).await?)
    }

    /// Register every performer credited in the catalog; returns how many were new
    pub async fn import_performers(&self) -> Result<usize> {
        let names = self.db.catalog_performer_names().await?;
        let added = self.db.import_performers(&names).await?;
        tracing::info!(candidates = names.len(), added = added, "Imported performers");
        Ok(added)
    }

    /// Credit counts per performer, most credited first
    pub async fn performer_counts(&self) -> Result<Vec<PerformerCount>> {
        let mut counts: HashMap<String, Vec<String>> = HashMap::new();
        for title in self.db.all_titles().await? {
            for name in title.performers {
                counts.entry(name).or_default().push(title.code.clone());
            }
        }

        let mut counts: Vec<PerformerCount> = counts
            .into_iter()
            .map(|(name, codes)| PerformerCount {
                name,
                count: codes.len(),
                codes,
            })
            .collect();
        counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        Ok(counts)
    }

    /// Catalog titles crediting one performer, with list tags
    pub async fn performer_titles(&self, name: &str) -> Result<Vec<TaggedTitle>> {
        let rankings = self.rankings();
        let titles = self.db.titles_for_performer(name).await?;
        Ok(tag_titles(&rankings, titles))
    }

    // ========================================================================
    // Feed Items
    // ========================================================================

    /// Feed items of one performer; `None` when the performer is unknown
    pub async fn feed_items_for(
        &self,
        name: &str,
        unwatched_only: bool,
    ) -> Result<Option<Vec<FeedItem>>> {
        let Some(performer) = self.db.get_performer(name).await? else {
            return Ok(None);
        };
        let items = self
            .db
            .feed_items_for_performer(performer.id, unwatched_only)
            .await?;
        Ok(Some(items))
    }

    pub async fn feed_items_grouped(
        &self,
        unwatched_only: bool,
    ) -> Result<BTreeMap<String, Vec<FeedItem>>> {
        self.db.feed_items_grouped(unwatched_only).await
    }

    pub async fn mark_watched(&self, ids: &[i64], watched: bool) -> Result<u64> {
        Ok(self.db.mark_feed_items_watched(ids, watched).await?)
    }

    // ========================================================================
    // Background Jobs
    // ========================================================================

    fn feed_poller(&self) -> FeedPoller {
        FeedPoller::new(self.http.clone(), self.config.feeds.clone(), self.db.clone())
    }

    /// Start a feed refresh in the background.
    ///
    /// Returns once the run is claimed; fails if a refresh is already running.
    pub fn start_feed_refresh(&self) -> Result<JoinHandle<()>, JobError> {
        let run = self.jobs.feed_refresh.try_start()?;
        let poller = self.feed_poller();
        Ok(spawn_batch(run, move |run| async move {
            poller.poll_all(&run).await;
            run
        }))
    }

    /// Run a feed refresh to completion
    pub async fn refresh_feeds_now(&self) -> Result<JobSummary, JobError> {
        let run = self.jobs.feed_refresh.try_start()?;
        self.feed_poller().poll_all(&run).await;
        Ok(run.finish())
    }

    pub fn feed_refresh_status(&self) -> JobSnapshot {
        self.jobs.feed_refresh.snapshot()
    }

    /// Start a rating backfill in the background
    pub fn start_rating_backfill(&self, limit: Option<i64>) -> Result<JoinHandle<()>, JobError> {
        let run = self.jobs.rating_backfill.try_start()?;
        let scraper = Arc::clone(&self.scraper);
        let db = self.db.clone();
        Ok(spawn_batch(run, move |run| async move {
            scraper.backfill(&db, &run, limit).await;
            run
        }))
    }

    /// Run a rating backfill to completion
    pub async fn backfill_ratings_now(&self, limit: Option<i64>) -> Result<JobSummary, JobError> {
        let run = self.jobs.rating_backfill.try_start()?;
        self.scraper.backfill(&self.db, &run, limit).await;
        Ok(run.finish())
    }

    pub fn rating_backfill_status(&self) -> JobSnapshot {
        self.jobs.rating_backfill.snapshot()
    }

    /// Look up one title's rating, retrying whole lookups, and store it when
    /// the title is in the catalog
    pub async fn fetch_rating(&self, code: &str, attempts: u32) -> Result<Option<f64>> {
        let Some(rating) = self.scraper.fetch_rating_with_retry(code, attempts).await else {
            return Ok(None);
        };
        self.db.set_rating(code, rating).await?;
        Ok(Some(rating))
    }
}

fn tag_titles(rankings: &RankingSnapshot, titles: Vec<MediaTitle>) -> Vec<TaggedTitle> {
    titles
        .into_iter()
        .map(|title| TaggedTitle {
            tags: report::tags_for(rankings, &title.code),
            title,
        })
        .collect()
}

/// Spawn a batch that owns `run`. The batch hands the run back when done; if
/// it panics instead, the run is dropped along with the batch future, which
/// completes it.
fn spawn_batch<F, Fut>(run: JobRun, batch: F) -> JoinHandle<()>
where
    F: FnOnce(JobRun) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = JobRun> + Send + 'static,
{
    let kind = run.kind();
    tokio::spawn(async move {
        match catch_task_panic(batch(run)).await {
            Ok(run) => {
                run.finish();
            }
            Err(panic_msg) => {
                tracing::error!(job = %kind, error = %panic_msg, "Background job panicked");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RankingSourceConfig;
    use crate::jobs::JobStatus;
    use crate::storage::CatalogItem;
    use pretty_assertions::assert_eq;
    use std::path::{Path, PathBuf};

    fn write_list(dir: &Path, name: &str, content: &str) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    async fn curator(dir: &str) -> Curator {
        let dir = std::env::temp_dir().join(dir);
        let mut config = Config::default();
        config.rankings = vec![
            RankingSourceConfig {
                label: "TOP250".into(),
                path: write_list(&dir, "top250.csv", "name,rank\nABC-001 a,1\nABC-002 b,2\n"),
            },
            RankingSourceConfig {
                label: "TOP500".into(),
                path: write_list(&dir, "top500.csv", "name,rank\nABC-001 a,5\n"),
            },
            RankingSourceConfig {
                label: "2025 TOP250".into(),
                path: dir.join("missing.csv"),
            },
        ];
        config.feeds.hub_url = "http://127.0.0.1:9".into();
        config.feeds.max_retries = 0;
        config.feeds.request_delay_ms = 0;

        let db = Database::open(":memory:").await.unwrap();
        for (code, performers) in [("ABC-001", vec!["Alice", "Bea"]), ("XYZ-010", vec!["Alice"])] {
            db.upsert_title(&CatalogItem {
                code: code.into(),
                title: format!("{code} Title"),
                year: Some(2024),
                performers: performers.into_iter().map(String::from).collect(),
                library_id: None,
                date_added: None,
            })
            .await
            .unwrap();
        }
        Curator::with_database(config, db).unwrap()
    }

    #[tokio::test]
    async fn test_titles_carry_tags_in_source_order() {
        let curator = curator("curator_service_tags").await;
        let titles = curator.list_titles(&TitleQuery::default()).await.unwrap();

        assert_eq!(titles.len(), 2);
        assert_eq!(titles[0].title.code, "ABC-001");
        assert_eq!(titles[0].tags, vec!["TOP250", "TOP500"]);
        assert!(titles[1].tags.is_empty());
    }

    #[tokio::test]
    async fn test_stats_include_every_configured_list() {
        let curator = curator("curator_service_stats").await;
        let stats = curator.stats().await.unwrap();

        assert_eq!(stats.catalog.titles, 2);
        assert_eq!(stats.lists["TOP250"], 2);
        assert_eq!(stats.lists["TOP500"], 1);
        assert_eq!(stats.lists["2025 TOP250"], 0);
    }

    #[tokio::test]
    async fn test_missing_and_ranked_views() {
        let curator = curator("curator_service_missing").await;

        let missing = curator.missing().await.unwrap();
        assert_eq!(missing[0].label, "TOP250");
        assert_eq!(missing[0].missing, vec!["ABC-002"]);

        let page = curator.list_by_label("TOP250", 0, 10).await.unwrap();
        assert_eq!(page.total, 2);
        assert!(page.entries[0].in_catalog);
        assert!(!page.entries[1].in_catalog);
    }

    #[tokio::test]
    async fn test_recompute_uses_feed_links() {
        let curator = curator("curator_service_rescore").await;
        curator.add_performer("Alice", Some("a1")).await.unwrap();

        assert_eq!(curator.recompute_scores().await.unwrap(), 2);
        let db = curator.database();
        // 50 + 30 (both lists) + 5 (two performers) + 15 (followed)
        assert_eq!(db.get_title("ABC-001").await.unwrap().unwrap().score, 100);
        assert_eq!(db.get_title("XYZ-010").await.unwrap().unwrap().score, 65);
    }

    #[tokio::test]
    async fn test_performer_reports() {
        let curator = curator("curator_service_performers").await;

        let counts = curator.performer_counts().await.unwrap();
        assert_eq!(counts[0].name, "Alice");
        assert_eq!(counts[0].count, 2);
        assert_eq!(counts[1].name, "Bea");

        assert_eq!(curator.import_performers().await.unwrap(), 2);
        assert_eq!(curator.import_performers().await.unwrap(), 0);

        let titles = curator.performer_titles("Bea").await.unwrap();
        assert_eq!(titles.len(), 1);
        assert_eq!(titles[0].tags, vec!["TOP250", "TOP500"]);
        assert!(curator.feed_items_for("Nobody", false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_background_refresh_completes_and_blocks_second_start() {
        let curator = curator("curator_service_jobs").await;
        curator.add_performer("Alice", Some("a1")).await.unwrap();

        let handle = curator.start_feed_refresh().unwrap();
        assert_eq!(
            curator.start_feed_refresh().unwrap_err(),
            JobError::AlreadyRunning(JobKind::FeedRefresh)
        );
        handle.await.unwrap();

        let status = curator.feed_refresh_status();
        assert_eq!(status.status, JobStatus::Complete);
        assert_eq!(status.summary.total, 1);
        assert_eq!(status.summary.failed, 1);

        // Backfill tracker is independent
        assert_eq!(curator.rating_backfill_status().status, JobStatus::Idle);
    }
}
