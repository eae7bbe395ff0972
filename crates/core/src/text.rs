//! Small text heuristics shared by the resolver, observers, and memory service.

use std::collections::BTreeSet;

const STOPWORDS: &[&str] = &[
    "a", "about", "after", "again", "all", "also", "am", "an", "and", "any", "are", "as", "at",
    "be", "been", "being", "but", "by", "can", "could", "did", "do", "does", "doing", "don't",
    "for", "from", "get", "got", "had", "has", "have", "having", "he", "her", "him", "his", "how",
    "i", "i'm", "i've", "if", "in", "into", "is", "it", "it's", "its", "just", "like", "me",
    "might", "more", "my", "myself", "no", "not", "now", "of", "on", "or", "our", "out", "really",
    "she", "should", "so", "some", "still", "that", "the", "their", "them", "then", "there",
    "they", "this", "to", "too", "up", "very", "was", "we", "were", "what", "when", "which",
    "who", "will", "with", "would", "you", "your",
];

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

/// Lowercased content words (length ≥ 3, stopwords removed), deduplicated and sorted.
pub fn keywords(text: &str) -> Vec<String> {
    let set: BTreeSet<String> = text
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|w| w.trim_matches('\'').to_lowercase())
        .filter(|w| w.chars().count() >= 3 && !is_stopword(w))
        .collect();
    set.into_iter().collect()
}

/// Jaccard overlap of two keyword sets, 0.0 when both are empty.
pub fn jaccard(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let a: BTreeSet<&String> = a.iter().collect();
    let b: BTreeSet<&String> = b.iter().collect();
    let intersection = a.intersection(&b).count() as f64;
    let union = a.union(&b).count() as f64;
    intersection / union
}

/// Number of keywords the two sets share.
pub fn shared_keywords(a: &[String], b: &[String]) -> usize {
    a.iter().filter(|w| b.contains(w)).count()
}

/// Whether `text` contains any of `phrases` (case-insensitive, phrase match).
pub fn contains_any(text: &str, phrases: &[&str]) -> bool {
    let lower = text.to_lowercase();
    phrases.iter().any(|p| lower.contains(p))
}
