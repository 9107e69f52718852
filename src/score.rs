//! Composite relevance score.
//!
//! A title starts at [`BASE_SCORE`] and collects independent adjustments from
//! its external rating, its presence on the primary, secondary and annual
//! ranking lists, the size of its cast and whether any credited performer is
//! followed through a feed. The result is not clamped.

use anyhow::Result;
use std::collections::HashSet;

use crate::config::ScoreConfig;
use crate::ranking::RankingSnapshot;
use crate::storage::{Database, MediaTitle};

pub const BASE_SCORE: i64 = 50;

const BOTH_CORE_LISTS: i64 = 30;
const ONE_CORE_LIST: i64 = 20;
const ANNUAL_LIST: i64 = 10;
const ENSEMBLE_CAST: i64 = 5;
const FOLLOWED_PERFORMER: i64 = 15;

/// Rating tiers as `(minimum rating, adjustment)`, highest first
const RATING_TIERS: [(f64, i64); 4] = [(4.5, 20), (4.2, 10), (3.9, 0), (3.5, -15)];
const LOW_RATING: i64 = -25;

/// Adjustment contributed by an external rating
pub fn rating_adjustment(rating: f64) -> i64 {
    RATING_TIERS
        .iter()
        .find(|(min, _)| rating >= *min)
        .map_or(LOW_RATING, |(_, adjustment)| *adjustment)
}

/// Scores titles against one ranking snapshot. Performs no I/O.
pub struct ScoreEngine<'a> {
    rankings: &'a RankingSnapshot,
    rules: &'a ScoreConfig,
    feed_linked: &'a HashSet<String>,
}

impl<'a> ScoreEngine<'a> {
    pub fn new(
        rankings: &'a RankingSnapshot,
        rules: &'a ScoreConfig,
        feed_linked: &'a HashSet<String>,
    ) -> Self {
        Self {
            rankings,
            rules,
            feed_linked,
        }
    }

    pub fn score(&self, code: &str, performers: &[String], rating: Option<f64>) -> i64 {
        let mut score = BASE_SCORE;

        if let Some(rating) = rating {
            score += rating_adjustment(rating);
        }

        let in_primary = self.rankings.contains(&self.rules.primary, code);
        let in_secondary = self.rankings.contains(&self.rules.secondary, code);
        score += match (in_primary, in_secondary) {
            (true, true) => BOTH_CORE_LISTS,
            (true, false) | (false, true) => ONE_CORE_LIST,
            (false, false) => 0,
        };

        // Only the highest-priority annual list counts
        if self
            .rules
            .annual
            .iter()
            .any(|label| self.rankings.contains(label, code))
        {
            score += ANNUAL_LIST;
        }

        let distinct: HashSet<&str> = performers
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect();
        if distinct.len() >= 2 {
            score += ENSEMBLE_CAST;
        }

        if performers.iter().any(|p| self.feed_linked.contains(p.trim())) {
            score += FOLLOWED_PERFORMER;
        }

        score
    }

    pub fn score_title(&self, title: &MediaTitle) -> i64 {
        self.score(&title.code, &title.performers, title.rating)
    }
}

/// Recompute and store the score of every catalog title; returns how many changed
pub async fn recompute_scores(db: &Database, engine: &ScoreEngine<'_>) -> Result<usize> {
    let titles = db.all_titles().await?;
    let mut changed = 0;

    for title in &titles {
        let score = engine.score_title(title);
        if score != title.score {
            db.set_score(&title.code, score).await?;
            changed += 1;
        }
    }

    tracing::info!(titles = titles.len(), changed = changed, "Scores recomputed");
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::CatalogItem;
    use pretty_assertions::assert_eq;

    fn rankings() -> RankingSnapshot {
        RankingSnapshot::from_lists(vec![
            (
                "TOP250".to_string(),
                vec![("ABC-123".to_string(), 1), ("ONE-001".to_string(), 2)],
            ),
            ("TOP500".to_string(), vec![("ABC-123".to_string(), 4)]),
            (
                "2025 TOP250".to_string(),
                vec![("ABC-123".to_string(), 7), ("ANN-001".to_string(), 1)],
            ),
            ("2024 TOP250".to_string(), vec![("ANN-001".to_string(), 3)]),
        ])
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_worked_example_scores_115() {
        let rankings = rankings();
        let rules = ScoreConfig::default();
        let feed_linked = HashSet::new();
        let engine = ScoreEngine::new(&rankings, &rules, &feed_linked);

        // 50 + 20 (rating) + 30 (both lists) + 10 (annual) + 5 (two performers)
        assert_eq!(engine.score("ABC-123", &names(&["A", "B"]), Some(4.6)), 115);
    }

    #[test]
    fn test_rating_tiers() {
        assert_eq!(rating_adjustment(4.5), 20);
        assert_eq!(rating_adjustment(4.49), 10);
        assert_eq!(rating_adjustment(4.2), 10);
        assert_eq!(rating_adjustment(3.9), 0);
        assert_eq!(rating_adjustment(3.5), -15);
        assert_eq!(rating_adjustment(3.49), -25);
        assert_eq!(rating_adjustment(0.5), -25);
    }

    #[test]
    fn test_unknown_title_scores_base() {
        let rankings = rankings();
        let rules = ScoreConfig::default();
        let feed_linked = HashSet::new();
        let engine = ScoreEngine::new(&rankings, &rules, &feed_linked);

        assert_eq!(engine.score("ZZZ-1", &[], None), BASE_SCORE);
        assert_eq!(engine.score("ONE-001", &[], None), 70);
        assert_eq!(engine.score("ZZZ-1", &[], Some(3.0)), 25);
    }

    #[test]
    fn test_annual_lists_do_not_stack() {
        let rankings = rankings();
        let rules = ScoreConfig::default();
        let feed_linked = HashSet::new();
        let engine = ScoreEngine::new(&rankings, &rules, &feed_linked);

        // In both annual lists, counted once
        assert_eq!(engine.score("ANN-001", &[], None), 60);
    }

    #[test]
    fn test_duplicate_performer_names_are_one_performer() {
        let rankings = rankings();
        let rules = ScoreConfig::default();
        let feed_linked = HashSet::new();
        let engine = ScoreEngine::new(&rankings, &rules, &feed_linked);

        assert_eq!(engine.score("ZZZ-1", &names(&["A", " A "]), None), 50);
        assert_eq!(engine.score("ZZZ-1", &names(&["A", "B", "C"]), None), 55);
    }

    #[test]
    fn test_followed_performer_bonus_applies_once() {
        let rankings = rankings();
        let rules = ScoreConfig::default();
        let feed_linked: HashSet<String> = ["A".to_string(), "B".to_string()].into();
        let engine = ScoreEngine::new(&rankings, &rules, &feed_linked);

        assert_eq!(engine.score("ZZZ-1", &names(&["A"]), None), 65);
        assert_eq!(engine.score("ZZZ-1", &names(&["A", "B"]), None), 70);
    }

    #[test]
    fn test_score_is_deterministic() {
        let rankings = rankings();
        let rules = ScoreConfig::default();
        let feed_linked: HashSet<String> = ["B".to_string()].into();
        let engine = ScoreEngine::new(&rankings, &rules, &feed_linked);

        let performers = names(&["A", "B"]);
        let first = engine.score("ABC-123", &performers, Some(4.3));
        for _ in 0..10 {
            assert_eq!(engine.score("ABC-123", &performers, Some(4.3)), first);
        }
    }

    #[tokio::test]
    async fn test_recompute_scores_stores_results() {
        let db = Database::open(":memory:").await.unwrap();
        for (code, performers) in [("ABC-123", vec!["A", "B"]), ("ZZZ-1", vec![])] {
            db.upsert_title(&CatalogItem {
                code: code.into(),
                title: format!("{code} Title"),
                year: None,
                performers: names(&performers),
                library_id: None,
                date_added: None,
            })
            .await
            .unwrap();
        }
        db.set_rating("ABC-123", 4.6).await.unwrap();

        let rankings = rankings();
        let rules = ScoreConfig::default();
        let feed_linked = HashSet::new();
        let engine = ScoreEngine::new(&rankings, &rules, &feed_linked);

        assert_eq!(recompute_scores(&db, &engine).await.unwrap(), 2);
        assert_eq!(db.get_title("ABC-123").await.unwrap().unwrap().score, 115);
        assert_eq!(db.get_title("ZZZ-1").await.unwrap().unwrap().score, 50);

        // Nothing changes on a second pass
        assert_eq!(recompute_scores(&db, &engine).await.unwrap(), 0);
    }
}
