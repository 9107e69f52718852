//! Views derived from a ranking snapshot and the local catalog.

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use super::RankingSnapshot;
use crate::storage::MediaTitle;

/// One entry of a ranking list, joined with the catalog when present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedTitle {
    pub code: String,
    pub rank: u32,
    pub in_catalog: bool,
    pub title: Option<String>,
    pub year: Option<i64>,
    pub performers: Vec<String>,
    pub rating: Option<f64>,
    pub score: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedPage {
    pub label: String,
    /// Entries in the whole list, not just this page
    pub total: usize,
    pub in_catalog: usize,
    pub entries: Vec<RankedTitle>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingList {
    pub label: String,
    pub total: usize,
    pub missing: Vec<String>,
}

/// Page through one ranking list in rank order.
///
/// An unknown label yields an empty page.
pub fn list_by_label(
    snapshot: &RankingSnapshot,
    label: &str,
    catalog: &HashMap<String, MediaTitle>,
    offset: usize,
    limit: usize,
) -> RankedPage {
    let mut ranked: Vec<(&String, u32)> = snapshot
        .list(label)
        .map(|codes| codes.iter().map(|(code, rank)| (code, *rank)).collect())
        .unwrap_or_default();
    ranked.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));

    let in_catalog = ranked
        .iter()
        .filter(|(code, _)| catalog.contains_key(*code))
        .count();

    let entries = ranked
        .iter()
        .skip(offset)
        .take(limit)
        .map(|(code, rank)| match catalog.get(*code) {
            Some(title) => RankedTitle {
                code: (*code).clone(),
                rank: *rank,
                in_catalog: true,
                title: Some(title.title.clone()),
                year: title.year,
                performers: title.performers.clone(),
                rating: title.rating,
                score: Some(title.score),
            },
            None => RankedTitle {
                code: (*code).clone(),
                rank: *rank,
                in_catalog: false,
                title: None,
                year: None,
                performers: Vec::new(),
                rating: None,
                score: None,
            },
        })
        .collect();

    RankedPage {
        label: label.to_string(),
        total: ranked.len(),
        in_catalog,
        entries,
    }
}

/// Per list, the codes that are ranked but absent from the catalog
pub fn missing_report(
    snapshot: &RankingSnapshot,
    catalog_codes: &HashSet<String>,
) -> Vec<MissingList> {
    snapshot
        .labels()
        .map(|label| {
            let codes = snapshot.list(label);
            let mut missing: Vec<String> = codes
                .into_iter()
                .flat_map(|c| c.keys())
                .filter(|code| !catalog_codes.contains(*code))
                .cloned()
                .collect();
            missing.sort();
            MissingList {
                label: label.to_string(),
                total: snapshot.len_of(label),
                missing,
            }
        })
        .collect()
}

/// Labels of every list containing `code`, in source order
pub fn tags_for(snapshot: &RankingSnapshot, code: &str) -> Vec<String> {
    snapshot
        .labels()
        .filter(|label| snapshot.contains(label, code))
        .map(str::to_string)
        .collect()
}
