use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("The catalog database is locked by another process. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Input Types
// ============================================================================

/// A catalog item as pulled from the media library, ready for upsert.
#[derive(Debug, Clone)]
pub struct CatalogItem {
    pub code: String,
    pub title: String,
    pub year: Option<i64>,
    /// Credited performers in the order the library returned them
    pub performers: Vec<String>,
    pub library_id: Option<String>,
    /// `YYYY-MM-DD`
    pub date_added: Option<String>,
}

/// A feed entry that carried a code, ready for insertion.
#[derive(Debug, Clone)]
pub struct ParsedEntry {
    pub code: String,
    pub title: String,
    pub link: Option<String>,
    pub published: Option<i64>,
}

/// Paging and filtering for title listings.
#[derive(Debug, Clone)]
pub struct TitleQuery {
    /// Case-insensitive substring matched against code and performers
    pub search: Option<String>,
    pub offset: i64,
    pub limit: i64,
}

impl Default for TitleQuery {
    fn default() -> Self {
        Self {
            search: None,
            offset: 0,
            limit: 50,
        }
    }
}

// ============================================================================
// Helper Types
// ============================================================================

/// Internal row type for title queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TitleRow {
    pub code: String,
    pub title: String,
    pub year: Option<i64>,
    pub performers: String,
    pub rating: Option<f64>,
    pub score: i64,
    pub library_id: Option<String>,
    pub date_added: Option<String>,
}

impl TitleRow {
    pub(crate) fn into_title(self) -> MediaTitle {
        MediaTitle {
            code: self.code,
            title: self.title,
            year: self.year,
            performers: split_performers(&self.performers),
            rating: self.rating,
            score: self.score,
            library_id: self.library_id,
            date_added: self.date_added,
        }
    }
}

/// Feed item joined with its performer's name, for grouped listings
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct GroupedFeedItemRow {
    pub performer_name: String,
    #[sqlx(flatten)]
    pub item: FeedItem,
}

/// Canonical storage form of a performer list: names joined by `,` in order.
pub(crate) fn join_performers(names: &[String]) -> String {
    names
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

pub(crate) fn split_performers(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect()
}

// ============================================================================
// Data Structures
// ============================================================================

/// A catalog title keyed by its code.
///
/// `score` and `rating` survive re-synchronization; only explicit
/// recomputation or a rating backfill changes them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaTitle {
    pub code: String,
    pub title: String,
    pub year: Option<i64>,
    pub performers: Vec<String>,
    pub rating: Option<f64>,
    pub score: i64,
    pub library_id: Option<String>,
    pub date_added: Option<String>,
}

/// A performer whose feed may be polled.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Performer {
    pub id: i64,
    pub name: String,
    /// Identifier of the performer on the syndication hub
    pub feed_id: Option<String>,
    pub watch: bool,
    pub last_sync: Option<i64>,
}

/// A title detected in a performer's feed.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct FeedItem {
    pub id: i64,
    pub performer_id: i64,
    pub code: String,
    pub title: String,
    pub link: Option<String>,
    pub published: Option<i64>,
    pub watched: bool,
    pub detected_at: i64,
}

/// Aggregate counts for the stats view.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CatalogStats {
    pub titles: i64,
    pub rated_titles: i64,
    pub performers: i64,
    pub feed_linked_performers: i64,
    pub feed_items: i64,
    pub unwatched_feed_items: i64,
}
