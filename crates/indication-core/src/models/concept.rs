//! Canonical medical concepts.

use serde::{Deserialize, Serialize};

/// A canonical concept with synonyms, classification codes and parents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Concept {
    /// Concept identifier (e.g. a UMLS CUI)
    pub concept_id: String,
    /// Preferred name
    pub preferred_name: String,
    /// Alternative names (the preferred name is always indexed as a synonym)
    #[serde(default)]
    pub synonyms: Vec<String>,
    /// Classification codes, in priority order
    #[serde(default)]
    pub codes: Vec<String>,
    /// Parent concept identifiers, in priority order
    #[serde(default)]
    pub parents: Vec<String>,
    /// Semantic types (e.g. "T047")
    #[serde(default)]
    pub semantic_types: Vec<String>,
}

impl Concept {
    /// Create a new concept with required fields.
    pub fn new(concept_id: impl Into<String>, preferred_name: impl Into<String>) -> Self {
        Self {
            concept_id: concept_id.into(),
            preferred_name: preferred_name.into(),
            synonyms: Vec::new(),
            codes: Vec::new(),
            parents: Vec::new(),
            semantic_types: Vec::new(),
        }
    }

    pub fn with_synonyms(mut self, synonyms: &[&str]) -> Self {
        self.synonyms.extend(synonyms.iter().map(|s| s.to_string()));
        self
    }

    pub fn with_codes(mut self, codes: &[&str]) -> Self {
        self.codes.extend(codes.iter().map(|s| s.to_string()));
        self
    }

    pub fn with_parents(mut self, parents: &[&str]) -> Self {
        self.parents.extend(parents.iter().map(|s| s.to_string()));
        self
    }

    /// Preferred name followed by synonyms, without duplicates.
    pub fn all_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = vec![self.preferred_name.as_str()];
        for s in &self.synonyms {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(s)) {
                names.push(s);
            }
        }
        names
    }
}

/// A synonym row returned by the concept store.
#[derive(Debug, Clone, PartialEq)]
pub struct SynonymHit {
    pub concept_id: String,
    pub preferred_name: String,
    /// Normalized synonym text
    pub synonym: String,
    /// Position in store iteration order
    pub ordinal: i64,
}
