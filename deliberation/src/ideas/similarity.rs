//! Pluggable title similarity for idea deduplication.

use similar::TextDiff;

/// Scores how alike two idea titles are, in `[0, 1]`.
pub trait TitleSimilarity: Send + Sync {
    fn ratio(&self, a: &str, b: &str) -> f64;

    fn name(&self) -> &str;
}

/// Character-level matching-blocks ratio, `2·M / (|a| + |b|)`, on lowercased
/// titles. Titles equal after dropping non-alphanumerics score 1.0.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceRatio;

impl TitleSimilarity for SequenceRatio {
    fn ratio(&self, a: &str, b: &str) -> f64 {
        let a = a.trim().to_lowercase();
        let b = b.trim().to_lowercase();
        if a.is_empty() && b.is_empty() {
            return 1.0;
        }
        if squash(&a) == squash(&b) {
            return 1.0;
        }
        TextDiff::from_chars(a.as_str(), b.as_str()).ratio() as f64
    }

    fn name(&self) -> &str {
        "sequence_ratio"
    }
}

fn squash(s: &str) -> String {
    s.chars().filter(|c| c.is_alphanumeric()).collect()
}
