use anyhow::Result;
use std::collections::HashSet;

use super::schema::Database;
use super::types::{DatabaseError, Performer};

impl Database {
    // ========================================================================
    // Performer Operations
    // ========================================================================

    /// Register a performer, or update the feed id of an existing one.
    ///
    /// Returns the performer id. A `None` feed id never clears an existing one.
    pub async fn insert_performer(
        &self,
        name: &str,
        feed_id: Option<&str>,
    ) -> Result<i64, DatabaseError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO performers (name, feed_id) VALUES (?, ?)
            ON CONFLICT(name) DO UPDATE SET feed_id = COALESCE(excluded.feed_id, performers.feed_id)
            RETURNING id
        "#,
        )
        .bind(name.trim())
        .bind(feed_id.map(str::trim).filter(|f| !f.is_empty()))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    /// Insert every name that is not registered yet; returns how many were new
    pub async fn import_performers(&self, names: &[String]) -> Result<usize> {
        let mut inserted = 0;
        for name in names {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let result = sqlx::query("INSERT OR IGNORE INTO performers (name) VALUES (?)")
                .bind(name)
                .execute(&self.pool)
                .await?;
            inserted += result.rows_affected() as usize;
        }
        Ok(inserted)
    }

    /// All performers ordered by name
    pub async fn list_performers(&self) -> Result<Vec<Performer>> {
        let performers = sqlx::query_as::<_, Performer>(
            "SELECT id, name, feed_id, watch, last_sync FROM performers ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(performers)
    }

    /// Performers that have a feed identifier configured, ordered by name
    pub async fn feed_performers(&self) -> Result<Vec<Performer>> {
        let performers = sqlx::query_as::<_, Performer>(
            "SELECT id, name, feed_id, watch, last_sync FROM performers \
             WHERE feed_id IS NOT NULL AND feed_id != '' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(performers)
    }

    /// Look up a performer by exact name
    pub async fn get_performer(&self, name: &str) -> Result<Option<Performer>> {
        let performer = sqlx::query_as::<_, Performer>(
            "SELECT id, name, feed_id, watch, last_sync FROM performers WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(performer)
    }

    /// Names of performers with a configured feed identifier
    pub async fn feed_linked_names(&self) -> Result<HashSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM performers WHERE feed_id IS NOT NULL AND feed_id != ''",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    /// Update a performer's feed configuration.
    ///
    /// `feed_id: Some("")` clears the identifier; `None` leaves it unchanged.
    /// Returns `false` when no performer has that id.
    pub async fn update_performer(
        &self,
        performer_id: i64,
        feed_id: Option<&str>,
        watch: Option<bool>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE performers SET
                feed_id = CASE WHEN ?1 IS NULL THEN feed_id ELSE NULLIF(?1, '') END,
                watch = COALESCE(?2, watch)
            WHERE id = ?3
        "#,
        )
        .bind(feed_id.map(str::trim))
        .bind(watch)
        .bind(performer_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a performer; its feed items go with it (ON DELETE CASCADE)
    pub async fn delete_performer(&self, performer_id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM performers WHERE id = ?")
            .bind(performer_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a successful feed poll
    pub async fn touch_performer_sync(&self, performer_id: i64) -> Result<(), DatabaseError> {
        let now = crate::util::now_ts();
        sqlx::query("UPDATE performers SET last_sync = ? WHERE id = ?")
            .bind(now)
            .bind(performer_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
