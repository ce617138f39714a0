//! Abnormal-finding detection over free-text analysis.
//!
//! A keyword heuristic: any case-insensitive substring match counts, so
//! "Hyperelevated" is flagged along with "elevated".

use std::sync::LazyLock;

use regex::Regex;

static ABNORMAL_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(abnormal|critical|urgent|elevated|low|high|infection|tb|tuberculosis)")
        .expect("keyword regex must compile")
});

/// Whether the analysis text mentions any abnormal-finding keyword.
pub fn has_abnormal_findings(analysis: &str) -> bool {
    ABNORMAL_KEYWORDS.is_match(analysis)
}

/// The distinct keywords found, lowercased, in order of first appearance.
pub fn matched_keywords(analysis: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for m in ABNORMAL_KEYWORDS.find_iter(analysis) {
        let word = m.as_str().to_ascii_lowercase();
        if !found.contains(&word) {
            found.push(word);
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_keywords_in_any_case() {
        assert!(has_abnormal_findings("Glucose is ELEVATED."));
        assert!(has_abnormal_findings("Signs consistent with TB."));
        assert!(has_abnormal_findings("Possible infection; critical follow-up."));
    }

    #[test]
    fn detects_keywords_embedded_in_other_words() {
        assert!(has_abnormal_findings("Hyperelevated troponin"));
        assert!(has_abnormal_findings("ELEVATEDLDL noted"));
        assert!(has_abnormal_findings("elevated_ldl=true"));
        assert!(!has_abnormal_findings("Everything is within range."));
    }

    #[test]
    fn collects_distinct_keywords() {
        assert_eq!(
            matched_keywords("High LDL, high triglycerides, low HDL"),
            vec!["high".to_string(), "low".to_string()]
        );
    }
}
