//! HTML extraction for the rating site.
//!
//! Pages are matched with ordered regex strategies rather than a DOM parser;
//! the first strategy that matches wins.

use regex::Regex;
use std::sync::LazyLock;

/// A named pattern whose first capture group is the extracted value.
pub(crate) struct Strategy {
    pub name: &'static str,
    pattern: Regex,
}

impl Strategy {
    fn new(name: &'static str, pattern: &str) -> Self {
        Self {
            name,
            pattern: Regex::new(pattern).expect("extraction pattern is valid"),
        }
    }

    fn capture<'h>(&self, html: &'h str) -> Option<&'h str> {
        self.pattern
            .captures(html)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }
}

/// Search-result link strategies: result cards first, then any detail link
static LINK_STRATEGIES: LazyLock<[Strategy; 2]> = LazyLock::new(|| {
    [
        Strategy::new(
            "result card",
            r#"<a\s+href="(/v/[^"]+)"[^>]*class="box[^"]*"[^>]*>"#,
        ),
        Strategy::new("detail link", r#"<a\s+href="(/v/[^"]+)"[^>]*>"#),
    ]
});

static RATING_STRATEGIES: LazyLock<[Strategy; 4]> = LazyLock::new(|| {
    [
        Strategy::new("data-score attribute", r#"data-score="(\d+\.?\d*)""#),
        Strategy::new(
            "rating element",
            r#"<[^>]*class="[^"]*rating[^"]*"[^>]*>(\d+\.?\d*)"#,
        ),
        Strategy::new("five-point fraction", r"(\d+\.?\d*)\s*/\s*5"),
        Strategy::new("score suffix", r">([\d.]+)\s*分<"),
    ]
});

/// Markers the site shows on an empty search result (traditional and simplified)
const NO_RESULT_MARKERS: [&str; 2] = ["沒有結果", "没有结果"];

/// Relative path of the first detail page linked from a search result page
pub(crate) fn detail_link(html: &str) -> Option<&str> {
    LINK_STRATEGIES.iter().find_map(|s| s.capture(html))
}

pub(crate) fn is_empty_result(html: &str) -> bool {
    NO_RESULT_MARKERS.iter().any(|m| html.contains(m))
}

/// Rating shown on a detail page, with the name of the strategy that found it.
///
/// Only the first strategy that matches is consulted. The site shows 0 for
/// unrated titles, so a capture that is not a positive number means no rating.
pub(crate) fn rating(html: &str) -> Option<(f64, &'static str)> {
    let (raw, name) = RATING_STRATEGIES
        .iter()
        .find_map(|s| s.capture(html).map(|raw| (raw, s.name)))?;
    raw.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value > 0.0)
        .map(|value| (value, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_card_preferred_over_plain_link() {
        let html = r#"<a href="/v/other">nav</a>
            <a href="/v/abc123" title="ABC-123" class="box">card</a>"#;
        assert_eq!(detail_link(html), Some("/v/abc123"));
    }

    #[test]
    fn test_plain_link_fallback() {
        let html = r#"<div><a href="/v/zz9" title="x">ABC-123</a></div>"#;
        assert_eq!(detail_link(html), Some("/v/zz9"));
        assert_eq!(detail_link("<p>nothing</p>"), None);
    }

    #[test]
    fn test_empty_result_markers() {
        assert!(is_empty_result("<div class=\"empty\">沒有結果</div>"));
        assert!(is_empty_result("没有结果"));
        assert!(!is_empty_result("<div>results</div>"));
    }

    #[test]
    fn test_rating_strategies_in_order() {
        let all = r#"<span class="rating">3.1</span> 2.5 / 5 <i data-score="4.35"></i>"#;
        assert_eq!(rating(all), Some((4.35, "data-score attribute")));

        let element = r#"<span class="value rating-num">3.9</span> 2.5 / 5"#;
        assert_eq!(rating(element), Some((3.9, "rating element")));

        let fraction = r#"<span>4.12 / 5, by 120 users</span>"#;
        assert_eq!(rating(fraction), Some((4.12, "five-point fraction")));

        let suffix = r#"<span>4.6 分</span>"#;
        assert_eq!(rating(suffix), Some((4.6, "score suffix")));
    }

    #[test]
    fn test_zero_rating_stops_at_first_match() {
        let html = r#"<i data-score="0"></i><span>3.8 / 5</span>"#;
        assert_eq!(rating(html), None);

        let unrated = r#"<span class="score-stars" data-score="0"></span>
            <div class="pagination">1 / 5</div>"#;
        assert_eq!(rating(unrated), None);
        assert_eq!(rating(r#"<i data-score="0.0"></i>"#), None);
    }

    #[test]
    fn test_unparsable_capture_is_no_rating() {
        assert_eq!(rating(r#"<span>1.2.3 分</span>"#), None);
    }
}
