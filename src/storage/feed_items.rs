use anyhow::Result;
use sqlx::QueryBuilder;
use std::collections::BTreeMap;

use super::schema::Database;
use super::types::{DatabaseError, FeedItem, GroupedFeedItemRow, ParsedEntry};

const FEED_ITEM_COLUMNS: &str =
    "fi.id, fi.performer_id, fi.code, fi.title, fi.link, fi.published, fi.watched, fi.detected_at";

impl Database {
    // ========================================================================
    // Feed Item Operations
    // ========================================================================

    /// Insert one detected feed entry for a performer.
    ///
    /// Existing `(performer, code)` rows are left untouched, including their
    /// watched flag. Returns `true` only when a new row was written.
    pub async fn insert_feed_item(
        &self,
        performer_id: i64,
        entry: &ParsedEntry,
        watched: bool,
    ) -> Result<bool, DatabaseError> {
        let now = crate::util::now_ts();
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO feed_items
                (performer_id, code, title, link, published, watched, detected_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(performer_id)
        .bind(&entry.code)
        .bind(&entry.title)
        .bind(&entry.link)
        .bind(entry.published)
        .bind(watched)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Feed items of one performer, newest first
    pub async fn feed_items_for_performer(
        &self,
        performer_id: i64,
        unwatched_only: bool,
    ) -> Result<Vec<FeedItem>> {
        let items = sqlx::query_as::<_, FeedItem>(&format!(
            "SELECT {FEED_ITEM_COLUMNS} FROM feed_items fi \
             WHERE fi.performer_id = ? AND (? = 0 OR fi.watched = 0) \
             ORDER BY fi.published DESC, fi.detected_at DESC, fi.code"
        ))
        .bind(performer_id)
        .bind(unwatched_only)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Feed items of all performers grouped by performer name
    pub async fn feed_items_grouped(
        &self,
        unwatched_only: bool,
    ) -> Result<BTreeMap<String, Vec<FeedItem>>> {
        let rows = sqlx::query_as::<_, GroupedFeedItemRow>(&format!(
            "SELECT p.name AS performer_name, {FEED_ITEM_COLUMNS} \
             FROM feed_items fi JOIN performers p ON p.id = fi.performer_id \
             WHERE (? = 0 OR fi.watched = 0) \
             ORDER BY p.name, fi.published DESC, fi.detected_at DESC, fi.code"
        ))
        .bind(unwatched_only)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: BTreeMap<String, Vec<FeedItem>> = BTreeMap::new();
        for row in rows {
            grouped.entry(row.performer_name).or_default().push(row.item);
        }
        Ok(grouped)
    }

    /// Set the watched flag on the given feed items; returns rows changed
    pub async fn mark_feed_items_watched(
        &self,
        ids: &[i64],
        watched: bool,
    ) -> Result<u64, DatabaseError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("UPDATE feed_items SET watched = ");
        builder.push_bind(watched);
        builder.push(" WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
