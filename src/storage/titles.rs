use anyhow::Result;
use std::collections::HashSet;

use super::schema::Database;
use super::types::{
    join_performers, split_performers, CatalogItem, CatalogStats, DatabaseError, MediaTitle,
    TitleQuery, TitleRow,
};

const TITLE_COLUMNS: &str =
    "code, title, year, performers, rating, score, library_id, date_added";

impl Database {
    // ========================================================================
    // Title Operations
    // ========================================================================

    /// Insert or update one catalog title keyed by its code.
    ///
    /// Library-owned columns are overwritten; `score` and `rating` keep their
    /// stored values (or the column defaults for a new row). Each call is its
    /// own statement, so a sync that aborts halfway keeps the rows it wrote.
    pub async fn upsert_title(&self, item: &CatalogItem) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO titles (code, title, year, performers, library_id, date_added)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(code) DO UPDATE SET
                title = excluded.title,
                year = excluded.year,
                performers = excluded.performers,
                library_id = excluded.library_id,
                date_added = excluded.date_added
        "#,
        )
        .bind(&item.code)
        .bind(&item.title)
        .bind(item.year)
        .bind(join_performers(&item.performers))
        .bind(&item.library_id)
        .bind(&item.date_added)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch a single title by code
    pub async fn get_title(&self, code: &str) -> Result<Option<MediaTitle>> {
        let row: Option<TitleRow> =
            sqlx::query_as(&format!("SELECT {TITLE_COLUMNS} FROM titles WHERE code = ?"))
                .bind(code)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(TitleRow::into_title))
    }

    /// List titles ordered by code, optionally filtered by a search string.
    ///
    /// The search is a case-insensitive substring match on the code and on
    /// the joined performer names.
    pub async fn list_titles(&self, query: &TitleQuery) -> Result<Vec<MediaTitle>> {
        let rows: Vec<TitleRow> = match query.search.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => {
                let pattern = format!("%{}%", term.to_lowercase());
                sqlx::query_as(&format!(
                    "SELECT {TITLE_COLUMNS} FROM titles \
                     WHERE lower(code) LIKE ? OR lower(performers) LIKE ? \
                     ORDER BY code LIMIT ? OFFSET ?"
                ))
                .bind(&pattern)
                .bind(&pattern)
                .bind(query.limit)
                .bind(query.offset)
                .fetch_all(&self.pool)
                .await?
            }
            _ => {
                sqlx::query_as(&format!(
                    "SELECT {TITLE_COLUMNS} FROM titles ORDER BY code LIMIT ? OFFSET ?"
                ))
                .bind(query.limit)
                .bind(query.offset)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.into_iter().map(TitleRow::into_title).collect())
    }

    /// Every title in the catalog, ordered by code
    pub async fn all_titles(&self) -> Result<Vec<MediaTitle>> {
        let rows: Vec<TitleRow> =
            sqlx::query_as(&format!("SELECT {TITLE_COLUMNS} FROM titles ORDER BY code"))
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(TitleRow::into_title).collect())
    }

    /// Titles that have no rating yet, oldest code first
    pub async fn titles_missing_rating(&self, limit: Option<i64>) -> Result<Vec<MediaTitle>> {
        let rows: Vec<TitleRow> = sqlx::query_as(&format!(
            "SELECT {TITLE_COLUMNS} FROM titles WHERE rating IS NULL ORDER BY code LIMIT ?"
        ))
        // SQLite treats a negative LIMIT as unbounded
        .bind(limit.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(TitleRow::into_title).collect())
    }

    /// The set of all codes in the catalog
    pub async fn catalog_codes(&self) -> Result<HashSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT code FROM titles")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(code,)| code).collect())
    }

    /// Whether the catalog holds `code` with `performer` among its credits.
    ///
    /// Matches whole names only: "Ai" does not match a title credited to "Aika".
    pub async fn title_has_performer(&self, code: &str, performer: &str) -> Result<bool> {
        let row: Option<(String,)> = sqlx::query_as("SELECT performers FROM titles WHERE code = ?")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some_and(|(joined,)| split_performers(&joined).iter().any(|n| n == performer)))
    }

    /// Titles crediting the given performer (exact name match)
    pub async fn titles_for_performer(&self, performer: &str) -> Result<Vec<MediaTitle>> {
        let pattern = format!("%{}%", performer);
        let rows: Vec<TitleRow> = sqlx::query_as(&format!(
            "SELECT {TITLE_COLUMNS} FROM titles WHERE performers LIKE ? ORDER BY code"
        ))
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(TitleRow::into_title)
            .filter(|t| t.performers.iter().any(|n| n == performer))
            .collect())
    }

    /// Distinct performer names across the catalog, sorted
    pub async fn catalog_performer_names(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT performers FROM titles WHERE performers != ''")
                .fetch_all(&self.pool)
                .await?;
        let mut names: Vec<String> = rows
            .iter()
            .flat_map(|(joined,)| split_performers(joined))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        names.sort();
        Ok(names)
    }

    /// Store a scraped rating for a title
    pub async fn set_rating(&self, code: &str, rating: f64) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE titles SET rating = ? WHERE code = ?")
            .bind(rating)
            .bind(code)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Store a recomputed score for a title
    pub async fn set_score(&self, code: &str, score: i64) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE titles SET score = ? WHERE code = ?")
            .bind(score)
            .bind(code)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Aggregate counts across all tables
    pub async fn stats(&self) -> Result<CatalogStats> {
        let (titles, rated_titles): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COUNT(rating) FROM titles")
                .fetch_one(&self.pool)
                .await?;
        let (performers, feed_linked_performers): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COUNT(feed_id) FROM performers")
                .fetch_one(&self.pool)
                .await?;
        let (feed_items, unwatched_feed_items): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(CASE WHEN watched = 0 THEN 1 END) FROM feed_items",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(CatalogStats {
            titles,
            rated_titles,
            performers,
            feed_linked_performers,
            feed_items,
            unwatched_feed_items,
        })
    }
}
