//! Direct string-to-string matching.
//!
//! Used when no concept store covers a string, and by the terminology mapper
//! itself to score synonym candidates, so both paths classify a pair the same
//! way: exact > contains > token-overlap, with identical thresholds.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::config::MapperConfig;
use crate::models::{normalize_text, MatchKind};

/// Function words ignored by token overlap ("cancer of the liver" ~ "liver cancer").
///
/// Negations such as "without" are kept: they change meaning.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "at", "by", "due", "for", "from", "in", "of", "on", "the", "to", "with",
];

/// Classification and score of a text pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TextMatch {
    pub kind: MatchKind,
    /// 1.0 for exact, length ratio for contains, Jaccard for token overlap
    pub score: f64,
}

/// Content tokens of a text: lowercased, edge punctuation trimmed, stopwords dropped.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty() && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Jaccard similarity of two token sets. Two empty sets score 0.0.
pub fn jaccard_tokens(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Jaccard similarity of two texts' content tokens.
pub fn jaccard(a: &str, b: &str) -> f64 {
    jaccard_tokens(&tokenize(a), &tokenize(b))
}

/// Substring containment in either direction of two normalized texts.
///
/// Returns the length ratio shorter/longer when the shorter text is at least
/// `min_len` characters and occurs inside the longer one. Identical texts are
/// not a containment.
pub fn contains_score(a: &str, b: &str, min_len: usize) -> Option<f64> {
    if a == b {
        return None;
    }
    let (a_len, b_len) = (a.chars().count(), b.chars().count());
    let (short, short_len, long, long_len) = if a_len <= b_len {
        (a, a_len, b, b_len)
    } else {
        (b, b_len, a, a_len)
    };
    if short_len == 0 || short_len < min_len || !long.contains(short) {
        return None;
    }
    Some(short_len as f64 / long_len as f64)
}

/// Text matcher with the mapper's thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextMatcher {
    pub token_threshold: f64,
    pub min_contains_len: usize,
}

impl Default for TextMatcher {
    fn default() -> Self {
        Self::from_config(&MapperConfig::default())
    }
}

impl TextMatcher {
    pub fn new(token_threshold: f64, min_contains_len: usize) -> Self {
        Self {
            token_threshold,
            min_contains_len,
        }
    }

    pub fn from_config(config: &MapperConfig) -> Self {
        Self::new(config.token_overlap_threshold, config.min_contains_len)
    }

    /// Classify a pair of raw strings. `None` means no acceptable match.
    pub fn compare(&self, a: &str, b: &str) -> Option<TextMatch> {
        let (a, b) = (normalize_text(a), normalize_text(b));
        if a.is_empty() || b.is_empty() {
            return None;
        }
        self.compare_normalized(&a, &b)
    }

    /// Classify a pair of already-normalized strings.
    pub fn compare_normalized(&self, a: &str, b: &str) -> Option<TextMatch> {
        if a == b {
            return Some(TextMatch {
                kind: MatchKind::Exact,
                score: 1.0,
            });
        }
        if let Some(score) = contains_score(a, b, self.min_contains_len) {
            return Some(TextMatch {
                kind: MatchKind::Contains,
                score,
            });
        }
        let score = jaccard(a, b);
        if self.accepts_overlap(score) {
            return Some(TextMatch {
                kind: MatchKind::TokenOverlap,
                score,
            });
        }
        None
    }

    /// Whether a Jaccard score is high enough for a token-overlap match.
    pub fn accepts_overlap(&self, score: f64) -> bool {
        score > 0.0 && score >= self.token_threshold
    }
}
