mod feed_items;
mod performers;
mod schema;
mod titles;
mod types;

pub use schema::Database;
pub use types::{
    CatalogItem, CatalogStats, DatabaseError, FeedItem, MediaTitle, ParsedEntry, Performer,
    TitleQuery,
};
