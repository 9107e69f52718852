use feed_rs::parser;

use crate::storage::ParsedEntry;
use crate::util::extract_code;

/// Entries of one feed document that carried a code.
#[derive(Debug, Default)]
pub struct ParseResult {
    pub entries: Vec<ParsedEntry>,
    /// Entries dropped because their title has no leading code
    pub skipped: usize,
}

/// Parse an RSS or Atom document into coded entries.
pub fn parse_feed(bytes: &[u8]) -> Result<ParseResult, parser::ParseFeedError> {
    let feed = parser::parse(bytes)?;

    let mut result = ParseResult::default();
    for entry in feed.entries {
        let title = entry
            .title
            .map(|t| t.content.trim().to_string())
            .unwrap_or_default();

        let Some(code) = extract_code(&title).map(str::to_string) else {
            result.skipped += 1;
            continue;
        };

        result.entries.push(ParsedEntry {
            code,
            link: entry.links.first().map(|l| l.href.clone()),
            published: entry.published.or(entry.updated).map(|dt| dt.timestamp()),
            title,
        });
    }

    Ok(result)
}
