use regex::Regex;
use std::sync::LazyLock;

static CODE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]+-[0-9]+").expect("code pattern is valid"));

/// Extracts the canonical code from the start of a title.
///
/// Only a match anchored at position 0 counts: uppercase ASCII letters, a dash,
/// then digits. Anything after the digits is ignored, so `"ABC-123A"` still
/// yields `"ABC-123"`.
pub fn extract_code(title: &str) -> Option<&str> {
    CODE_PATTERN.find(title).map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_leading_code_extracted() {
        assert_eq!(extract_code("ABC-123 Some Title"), Some("ABC-123"));
        assert_eq!(extract_code("SSIS-001"), Some("SSIS-001"));
        assert_eq!(extract_code("MIDV-0042-C extra"), Some("MIDV-0042"));
    }

    #[test]
    fn test_no_code() {
        assert_eq!(extract_code("no code here"), None);
        assert_eq!(extract_code(""), None);
        assert_eq!(extract_code("abc-123 lowercase"), None);
        assert_eq!(extract_code("ABC123"), None);
        assert_eq!(extract_code("ABC-"), None);
    }

    #[test]
    fn test_code_must_be_at_start() {
        assert_eq!(extract_code(" ABC-123"), None);
        assert_eq!(extract_code("[Sub] ABC-123"), None);
    }

    proptest! {
        #[test]
        fn prop_prefix_always_recovered(
            letters in "[A-Z]{1,6}",
            digits in "[0-9]{1,5}",
            rest in "( [ -~]{0,20})?",
        ) {
            let code = format!("{letters}-{digits}");
            let title = format!("{code}{rest}");
            prop_assert_eq!(extract_code(&title), Some(code.as_str()));
        }

        #[test]
        fn prop_result_is_a_prefix(title in "\\PC{0,40}") {
            if let Some(code) = extract_code(&title) {
                prop_assert!(title.starts_with(code));
                prop_assert!(code.contains('-'));
            }
        }

        #[test]
        fn prop_lowercase_start_never_matches(title in "[a-z][ -~]{0,30}") {
            prop_assert_eq!(extract_code(&title), None);
        }
    }
}
