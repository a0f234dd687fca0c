//! Small text utilities shared by the heuristics.

use std::collections::HashSet;

/// Lowercased whitespace tokens.
pub fn words(text: &str) -> Vec<String> {
    text.split_whitespace().map(|w| w.to_lowercase()).collect()
}

/// Every 3-word phrase in order, duplicates kept.
pub fn trigram_list(text: &str) -> Vec<String> {
    let tokens = words(text);
    tokens.windows(3).map(|w| w.join(" ")).collect()
}

/// Distinct 3-word phrases.
pub fn trigrams(text: &str) -> HashSet<String> {
    trigram_list(text).into_iter().collect()
}

/// Truncate to at most `max_chars` characters, marking the cut with "...".
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars <= 3 {
        return text.chars().take(max_chars).collect();
    }
    let mut out: String = text.chars().take(max_chars - 3).collect();
    out.push_str("...");
    out
}

/// Whether the lowercased text contains any of the phrases.
pub fn contains_any(text: &str, phrases: &[String]) -> bool {
    let lower = text.to_lowercase();
    phrases.iter().any(|p| lower.contains(&p.to_lowercase()))
}

/// Alphabetic word tokens, lowercased, punctuation stripped.
pub fn alpha_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// First sentence of `text`, or the whole text if it has no terminator.
pub fn first_sentence(text: &str) -> &str {
    let trimmed = text.trim();
    match trimmed.find(['.', '!', '?']) {
        Some(idx) => &trimmed[..=idx],
        None => trimmed,
    }
}
