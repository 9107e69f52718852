//! Integration tests for the full reconcile cycle: library sync, ranking
//! lists, performer feeds, ratings and scoring.
//!
//! Every external collaborator is a wiremock server and every test uses its
//! own in-memory SQLite database.

use curator::config::{Config, RankingSourceConfig};
use curator::jobs::{EntryOutcome, JobStatus};
use curator::storage::{Database, TitleQuery};
use curator::Curator;
use serde_json::json;
use std::path::{Path, PathBuf};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ranking_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("curator_it_{name}"));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn ranking(dir: &Path, label: &str, file: &str, content: &str) -> RankingSourceConfig {
    let path = dir.join(file);
    std::fs::write(&path, content).unwrap();
    RankingSourceConfig {
        label: label.to_string(),
        path,
    }
}

fn library_item(name: &str, actors: &[&str]) -> serde_json::Value {
    json!({
        "Id": format!("lib-{name}"),
        "Name": name,
        "ProductionYear": 2024,
        "DateCreated": "2024-03-01T10:00:00Z",
        "People": actors
            .iter()
            .map(|a| json!({ "Name": a, "Type": "Actor" }))
            .collect::<Vec<_>>(),
    })
}

async fn mount_library(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/Items"))
        .and(header("X-Emby-Token", "it-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Items": [
                library_item("ABC-123 Big Title", &["Alice", "Bea"]),
                library_item("DEF-001 Solo", &["Alice"]),
                library_item("Home movie", &["Nobody"]),
            ]
        })))
        .mount(server)
        .await;
}

fn config(server: &MockServer, dir: &Path) -> Config {
    let mut config = Config::default();
    config.library.url = server.uri();
    config.library.api_key = Some("it-key".into());
    config.rankings = vec![
        ranking(dir, "TOP250", "top250.csv", "\"SUBSTR(name,0,40)\",rank\nABC-123 x,3\nZZZ-777 y,9\n"),
        ranking(dir, "TOP500", "top500.csv", "name\nABC-123 x\n"),
        ranking(dir, "2025 TOP250", "2025.csv", "name,rank\nABC-123 x,40\nABC-123 x,12\n"),
    ];
    config.feeds.hub_url = server.uri();
    config.feeds.route = "/hub/star/{id}".into();
    config.feeds.request_delay_ms = 0;
    config.feeds.retry_base_delay_ms = 1;
    config.rating.base_url = server.uri();
    config.rating.min_delay_ms = 0;
    config.rating.max_delay_ms = 0;
    config.rating.block_backoff_ms = 1;
    config.rating.retry_wait_ms = 1;
    config
}

async fn curator(server: &MockServer, name: &str) -> Curator {
    let db = Database::open(":memory:").await.unwrap();
    Curator::with_database(config(server, &ranking_dir(name)), db).unwrap()
}

#[tokio::test]
async fn test_sync_then_score_worked_example() {
    let server = MockServer::start().await;
    mount_library(&server).await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "ABC-123"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"<a href="/v/k1" class="box">ABC-123</a>"#),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v/k1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"<i data-score="4.6"></i>"#))
        .mount(&server)
        .await;

    let curator = curator(&server, "worked_example").await;
    assert_eq!(curator.sync_catalog().await.unwrap(), 2);
    assert_eq!(curator.fetch_rating("ABC-123", 1).await.unwrap(), Some(4.6));
    curator.recompute_scores().await.unwrap();

    let db = curator.database();
    // 50 + 20 (rating) + 30 (both core lists) + 10 (annual) + 5 (two performers)
    assert_eq!(db.get_title("ABC-123").await.unwrap().unwrap().score, 115);
    assert_eq!(db.get_title("DEF-001").await.unwrap().unwrap().score, 50);

    // Re-sync keeps score and rating
    curator.sync_catalog().await.unwrap();
    let title = db.get_title("ABC-123").await.unwrap().unwrap();
    assert_eq!(title.score, 115);
    assert_eq!(title.rating, Some(4.6));
}

#[tokio::test]
async fn test_reports_reflect_catalog_and_lists() {
    let server = MockServer::start().await;
    mount_library(&server).await;

    let curator = curator(&server, "reports").await;
    curator.sync_catalog().await.unwrap();

    let titles = curator
        .list_titles(&TitleQuery {
            search: Some("abc".into()),
            ..TitleQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(titles.len(), 1);
    assert_eq!(titles[0].tags, vec!["TOP250", "TOP500", "2025 TOP250"]);

    let missing = curator.missing().await.unwrap();
    assert_eq!(missing[0].missing, vec!["ZZZ-777"]);

    let annual = curator.list_by_label("2025 TOP250", 0, 10).await.unwrap();
    assert_eq!(annual.entries[0].rank, 12);

    let stats = curator.stats().await.unwrap();
    assert_eq!(stats.catalog.titles, 2);
    assert_eq!(stats.lists["TOP250"], 2);
}

#[tokio::test]
async fn test_feed_refresh_marks_owned_titles_watched() {
    let server = MockServer::start().await;
    mount_library(&server).await;
    Mock::given(method("GET"))
        .and(path("/hub/star/alice01"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Alice</title>
                <item><title>ABC-123 Big Title</title></item>
                <item><title>NEW-555 Fresh Release</title></item>
            </channel></rss>"#,
        ))
        .expect(2)
        .mount(&server)
        .await;

    let curator = curator(&server, "feed_refresh").await;
    curator.sync_catalog().await.unwrap();
    assert_eq!(curator.import_performers().await.unwrap(), 2);
    let alice = curator
        .list_performers()
        .await
        .unwrap()
        .into_iter()
        .find(|p| p.name == "Alice")
        .unwrap();
    assert!(curator
        .update_performer(alice.id, Some("alice01"), None)
        .await
        .unwrap());

    let summary = curator.refresh_feeds_now().await.unwrap();
    assert_eq!(summary.success, 1);
    let entries = curator.feed_refresh_status().entries;
    assert_eq!(entries[0].added, Some(2));

    let items = curator.feed_items_for("Alice", false).await.unwrap().unwrap();
    let owned = items.iter().find(|i| i.code == "ABC-123").unwrap();
    let fresh = items.iter().find(|i| i.code == "NEW-555").unwrap();
    assert!(owned.watched);
    assert!(!fresh.watched);

    // A second refresh inserts nothing new
    curator.refresh_feeds_now().await.unwrap();
    assert_eq!(curator.feed_refresh_status().entries[0].added, Some(0));

    let unwatched = curator.feed_items_grouped(true).await.unwrap();
    assert_eq!(unwatched["Alice"].len(), 1);
    assert_eq!(curator.mark_watched(&[fresh.id], true).await.unwrap(), 1);
    assert!(curator.feed_items_grouped(true).await.unwrap().is_empty());

    // Following Alice now adds +15 to both of her titles
    curator.recompute_scores().await.unwrap();
    let db = curator.database();
    assert_eq!(db.get_title("DEF-001").await.unwrap().unwrap().score, 65);
}

#[tokio::test]
async fn test_background_backfill_reports_outcomes() {
    let server = MockServer::start().await;
    mount_library(&server).await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "ABC-123"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"<a href="/v/k1" class="box">ABC-123</a>"#),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "DEF-001"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>沒有結果</p>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v/k1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<b>4.21 / 5</b>"))
        .mount(&server)
        .await;

    let curator = curator(&server, "backfill").await;
    curator.sync_catalog().await.unwrap();

    let handle = curator.start_rating_backfill(None).unwrap();
    assert!(curator.start_rating_backfill(None).is_err());
    handle.await.unwrap();

    let status = curator.rating_backfill_status();
    assert_eq!(status.status, JobStatus::Complete);
    assert_eq!(status.summary.planned, 2);
    assert_eq!(status.summary.success, 1);
    assert_eq!(status.summary.not_found, 1);
    assert_eq!(status.entries[1].outcome, EntryOutcome::NotFound);

    let rated = curator.database().get_title("ABC-123").await.unwrap().unwrap();
    assert_eq!(rated.rating, Some(4.21));
}

#[tokio::test]
async fn test_library_failure_surfaces_as_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Items"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let curator = curator(&server, "library_failure").await;
    assert!(curator.sync_catalog().await.is_err());
    assert_eq!(curator.stats().await.unwrap().catalog.titles, 0);
}
