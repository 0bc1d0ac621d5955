//! Keyword extraction: lowercase, split on non-alphanumerics, drop stop words.
//!
//! Deterministic: the same text always yields the same sorted set.

use std::collections::BTreeSet;

/// Common English words that carry no retrieval signal.
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "it", "in", "on", "of", "to", "and", "or", "for", "with", "this",
    "that", "be", "are", "was", "were", "been", "being", "have", "has", "had", "do", "does",
    "did", "will", "would", "could", "should", "may", "might", "can", "shall", "not", "no",
    "but", "if", "at", "by", "from", "as", "into", "about", "up", "out", "so", "its", "you",
    "your", "i", "my", "me", "we", "our", "they", "them", "their", "he", "she", "his", "her",
    "what", "which", "who", "whom", "how", "why", "when", "where", "there", "here", "than",
    "then", "these", "those", "some", "any", "all", "more", "most", "such", "very", "just",
    "also", "please", "tell", "explain",
];

/// Extract the keyword set of a text.
pub fn extract_keywords(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 1)
        .filter(|w| !STOP_WORDS.contains(w))
        .map(|w| w.to_string())
        .collect()
}

/// Number of keywords two sets share.
pub fn overlap(a: &BTreeSet<String>, b: &BTreeSet<String>) -> usize {
    a.intersection(b).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_filters_stop_words() {
        let kw = extract_keywords("What are the Benefits of Renewable Energy?");
        let got: Vec<&str> = kw.iter().map(String::as_str).collect();
        assert_eq!(got, vec!["benefits", "energy", "renewable"]);
    }

    #[test]
    fn single_characters_are_dropped() {
        let kw = extract_keywords("x y z solar");
        assert_eq!(kw.len(), 1);
        assert!(kw.contains("solar"));
    }

    #[test]
    fn extraction_is_deterministic() {
        let text = "Wind, solar & hydro: which renewable is cheapest in 2024?";
        assert_eq!(extract_keywords(text), extract_keywords(text));
        assert!(extract_keywords(text).contains("2024"));
    }

    #[test]
    fn overlap_counts_shared_terms() {
        let a = extract_keywords("solar panels on roofs");
        let b = extract_keywords("cheap solar panels");
        assert_eq!(overlap(&a, &b), 2);
        assert_eq!(overlap(&a, &extract_keywords("quantum chromodynamics")), 0);
    }

    #[test]
    fn empty_text_has_no_keywords() {
        assert!(extract_keywords("").is_empty());
        assert!(extract_keywords("the of and").is_empty());
    }
}
