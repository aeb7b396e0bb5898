//! Tokenisation helpers shared by the embedder, lexical index and graph store.

use std::collections::HashSet;

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been",
    "in", "on", "at", "to", "for", "of", "with", "by", "from",
    "and", "or", "but", "not", "this", "that", "these", "those",
    "it", "its", "as", "do", "does", "did", "has", "have", "had",
    "can", "could", "will", "would", "should", "may", "might",
    "what", "which", "who", "how", "why", "when", "where", "please",
    "about", "into", "than", "then", "there", "their", "they", "you",
];

/// Returns true for common English function words.
pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Lowercased alphanumeric tokens, stop words removed.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .filter(|w| !is_stop_word(w))
        .collect()
}

/// Distinct content-bearing terms in order of first appearance.
///
/// Single characters and pure numbers are skipped; at most `limit` terms are
/// returned.
pub fn key_terms(text: &str, limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(text)
        .into_iter()
        .filter(|t| t.chars().count() > 2 && !t.chars().all(|c| c.is_ascii_digit()))
        .filter(|t| seen.insert(t.clone()))
        .take(limit)
        .collect()
}
