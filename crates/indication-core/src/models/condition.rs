//! Candidate conditions and the structured (substance, condition) key.

use serde::{Deserialize, Serialize};

/// Lowercase, trim, and collapse internal whitespace.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Structured key for per-(substance, condition) state.
///
/// Both fields are stored separately so names containing any separator
/// character can never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConditionKey {
    /// Normalized substance name
    pub substance: String,
    /// Normalized condition text
    pub condition: String,
}

impl ConditionKey {
    /// Build a key, normalizing both parts.
    pub fn new(substance: &str, condition: &str) -> Self {
        Self {
            substance: normalize_text(substance),
            condition: normalize_text(condition),
        }
    }
}

/// A free-text condition proposed by a method as an indication for a substance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateCondition {
    /// Condition text as proposed
    pub text: String,
    /// Document the condition was observed in
    pub document_id: String,
    /// Method that proposed it
    pub method: String,
    /// Text this record replaces, when it is a corrected/normalized version
    pub corrected_from: Option<String>,
}

impl CandidateCondition {
    /// Create a new candidate.
    pub fn new(text: impl Into<String>, document_id: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            document_id: document_id.into(),
            method: method.into(),
            corrected_from: None,
        }
    }

    /// A new record carrying corrected text; `self` is left untouched for audit.
    pub fn corrected(&self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            document_id: self.document_id.clone(),
            method: self.method.clone(),
            corrected_from: Some(self.text.clone()),
        }
    }
}

/// A unique condition found during identification, with the documents
/// mentioning it in scan order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentifiedCondition {
    /// First-seen spelling (trimmed)
    pub text: String,
    /// Normalized dedup key
    pub key: String,
    /// Documents in which the condition was mentioned (at least one)
    pub documents: Vec<String>,
    /// Every mention, for audit; a variant spelling is followed by its corrected record
    pub mentions: Vec<CandidateCondition>,
}

impl IdentifiedCondition {
    /// Number of scanned documents mentioning the condition.
    pub fn mention_count(&self) -> usize {
        self.documents.len()
    }
}
