//! Curated ranking lists.
//!
//! Each source is a CSV export of a top-N list. Rows carry a name-like column
//! whose leading token is a code and, optionally, a numeric rank. Sources are
//! re-read on every request; nothing here caches.
//!
//! - [`load`] turns the configured sources into a [`RankingSnapshot`]
//! - [`report`] derives per-label listings and missing-from-catalog reports

pub mod report;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::RankingSourceConfig;
use crate::util::extract_code;

/// Header names accepted for the name column, in preference order
const NAME_COLUMNS: [&str; 3] = ["substr(name,0,40)", "name", "title"];
const RANK_COLUMN: &str = "rank";

#[derive(Debug, Error)]
pub enum RankingError {
    #[error("Failed to read ranking source: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed ranking source: {0}")]
    Csv(#[from] csv::Error),
    #[error("Ranking source has no name column")]
    MissingNameColumn,
}

/// A named ranking file.
#[derive(Debug, Clone)]
pub struct RankingSource {
    pub label: String,
    pub path: PathBuf,
}

impl From<&RankingSourceConfig> for RankingSource {
    fn from(config: &RankingSourceConfig) -> Self {
        Self {
            label: config.label.clone(),
            path: config.path.clone(),
        }
    }
}

/// Every list that loaded, keyed by label, plus the configured label order.
#[derive(Debug, Clone, Default)]
pub struct RankingSnapshot {
    lists: BTreeMap<String, HashMap<String, u32>>,
    order: Vec<String>,
}

impl RankingSnapshot {
    /// Build a snapshot directly from `(label, [(code, rank)])` pairs.
    ///
    /// Duplicate codes keep their minimum rank, as when loading from files.
    pub fn from_lists<L, C>(lists: L) -> Self
    where
        L: IntoIterator<Item = (String, C)>,
        C: IntoIterator<Item = (String, u32)>,
    {
        let mut snapshot = Self::default();
        for (label, entries) in lists {
            let mut codes = HashMap::new();
            for (code, rank) in entries {
                insert_min(&mut codes, code, rank);
            }
            snapshot.insert(label, codes);
        }
        snapshot
    }

    fn insert(&mut self, label: String, codes: HashMap<String, u32>) {
        if !self.lists.contains_key(&label) {
            self.order.push(label.clone());
        }
        self.lists.insert(label, codes);
    }

    /// Rank of `code` in the list `label`, if both exist
    pub fn rank(&self, label: &str, code: &str) -> Option<u32> {
        self.lists.get(label).and_then(|codes| codes.get(code)).copied()
    }

    pub fn contains(&self, label: &str, code: &str) -> bool {
        self.rank(label, code).is_some()
    }

    /// The code → rank map of one list
    pub fn list(&self, label: &str) -> Option<&HashMap<String, u32>> {
        self.lists.get(label)
    }

    /// Number of codes in a list; 0 when the list did not load
    pub fn len_of(&self, label: &str) -> usize {
        self.lists.get(label).map_or(0, HashMap::len)
    }

    /// Labels that loaded, in source order
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}

fn insert_min(codes: &mut HashMap<String, u32>, code: String, rank: u32) {
    codes
        .entry(code)
        .and_modify(|existing| *existing = (*existing).min(rank))
        .or_insert(rank);
}

/// Load every source, skipping the ones that cannot be read.
///
/// A missing or malformed file is logged and left out of the snapshot; the
/// remaining sources still load.
pub fn load(sources: &[RankingSource]) -> RankingSnapshot {
    let mut snapshot = RankingSnapshot::default();

    for source in sources {
        match load_source(&source.path) {
            Ok(codes) => {
                tracing::debug!(
                    label = %source.label,
                    path = %source.path.display(),
                    codes = codes.len(),
                    "Loaded ranking source"
                );
                snapshot.insert(source.label.clone(), codes);
            }
            Err(e) => {
                tracing::warn!(
                    label = %source.label,
                    path = %source.path.display(),
                    error = %e,
                    "Skipping ranking source"
                );
            }
        }
    }

    snapshot
}

/// Parse one ranking file into `code → minimum rank`.
///
/// Invalid UTF-8 is replaced rather than rejected. When there is no usable
/// rank column the 1-based data row position stands in for the rank.
pub fn load_source(path: &Path) -> Result<HashMap<String, u32>, RankingError> {
    let bytes = std::fs::read(path)?;
    parse_source(&String::from_utf8_lossy(&bytes))
}

fn parse_source(content: &str) -> Result<HashMap<String, u32>, RankingError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_lowercase())
        .collect();

    let name_idx = NAME_COLUMNS
        .iter()
        .find_map(|wanted| headers.iter().position(|h| h == wanted))
        .ok_or(RankingError::MissingNameColumn)?;
    let rank_idx = headers.iter().position(|h| h == RANK_COLUMN);

    let mut codes = HashMap::new();
    for (row, record) in reader.records().enumerate() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(row = row + 1, error = %e, "Skipping unreadable ranking row");
                continue;
            }
        };

        let Some(code) = record.get(name_idx).and_then(extract_code) else {
            continue;
        };

        let position = u32::try_from(row + 1).unwrap_or(u32::MAX);
        let rank = rank_idx
            .and_then(|i| record.get(i))
            .and_then(|r| r.trim().parse::<u32>().ok())
            .unwrap_or(position);

        insert_min(&mut codes, code.to_string(), rank);
    }

    Ok(codes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write_source(dir: &Path, name: &str, content: &str) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_duplicate_code_keeps_minimum_rank() {
        let codes = parse_source("name,rank\nABC-123 First,40\nABC-123 Again,12\n").unwrap();
        assert_eq!(codes.get("ABC-123"), Some(&12));
        assert_eq!(codes.len(), 1);
    }

    #[test]
    fn test_rows_without_code_skipped() {
        let codes =
            parse_source("name,rank\nABC-001 Ok,1\nnot a code,2\n,3\nXYZ-9 Fine,4\n").unwrap();
        let mut keys: Vec<_> = codes.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["ABC-001", "XYZ-9"]);
    }

    #[test]
    fn test_code_must_open_the_name_field() {
        let codes = parse_source("name,rank\n ABC-001 indented,1\nABC-002 b,2\n").unwrap();
        assert!(!codes.contains_key("ABC-001"));
        assert_eq!(codes.get("ABC-002"), Some(&2));
    }

    #[test]
    fn test_missing_rank_uses_row_position() {
        let codes = parse_source("\"SUBSTR(name,0,40)\"\nABC-001 a\nskip me\nABC-003 c\n").unwrap();
        assert_eq!(codes.get("ABC-001"), Some(&1));
        assert_eq!(codes.get("ABC-003"), Some(&3));
    }

    #[test]
    fn test_unparsable_rank_falls_back_to_position() {
        let codes = parse_source("name,rank\nABC-001 a,n/a\nABC-002 b,7\n").unwrap();
        assert_eq!(codes.get("ABC-001"), Some(&1));
        assert_eq!(codes.get("ABC-002"), Some(&7));
    }

    #[test]
    fn test_bom_and_header_case_ignored() {
        let codes = parse_source("\u{feff}Name,Rank\nABC-001 a,5\n").unwrap();
        assert_eq!(codes.get("ABC-001"), Some(&5));
    }

    #[test]
    fn test_no_name_column_is_an_error() {
        let result = parse_source("id,rank\n1,1\n");
        assert!(matches!(result, Err(RankingError::MissingNameColumn)));
    }

    #[test]
    fn test_failed_source_skipped_others_load() {
        let dir = std::env::temp_dir().join("curator_ranking_test_skip");
        let good = write_source(&dir, "good.csv", "name,rank\nABC-001 a,1\n");
        let bad = write_source(&dir, "bad.csv", "id\n1\n");

        let sources = vec![
            RankingSource {
                label: "Missing".into(),
                path: dir.join("does-not-exist.csv"),
            },
            RankingSource {
                label: "Bad".into(),
                path: bad,
            },
            RankingSource {
                label: "Good".into(),
                path: good,
            },
        ];
        let snapshot = load(&sources);

        assert_eq!(snapshot.labels().collect::<Vec<_>>(), vec!["Good"]);
        assert_eq!(snapshot.rank("Good", "ABC-001"), Some(1));
        assert_eq!(snapshot.len_of("Missing"), 0);
        assert!(!snapshot.contains("Bad", "ABC-001"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_utf8_tolerated() {
        let dir = std::env::temp_dir().join("curator_ranking_test_utf8");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("latin1.csv");
        let mut bytes = b"name,rank\nABC-001 caf".to_vec();
        bytes.push(0xE9);
        bytes.extend_from_slice(b",2\n");
        std::fs::write(&path, bytes).unwrap();

        let codes = load_source(&path).unwrap();
        assert_eq!(codes.get("ABC-001"), Some(&2));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_from_lists_dedups() {
        let snapshot = RankingSnapshot::from_lists(vec![(
            "L".to_string(),
            vec![("ABC-1".to_string(), 9), ("ABC-1".to_string(), 3)],
        )]);
        assert_eq!(snapshot.rank("L", "ABC-1"), Some(3));
    }
}
