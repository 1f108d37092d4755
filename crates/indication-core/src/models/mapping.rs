//! Concept mapping results.

use serde::{Deserialize, Serialize};

/// How a text matched a synonym (or another text). Declared strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Contains,
    TokenOverlap,
}

/// How a mapping's code was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingMethod {
    Exact,
    Contains,
    TokenOverlap,
    HierarchicalAscent,
    Unmapped,
}

impl From<MatchKind> for MappingMethod {
    fn from(kind: MatchKind) -> Self {
        match kind {
            MatchKind::Exact => MappingMethod::Exact,
            MatchKind::Contains => MappingMethod::Contains,
            MatchKind::TokenOverlap => MappingMethod::TokenOverlap,
        }
    }
}

/// A top-level grouping of classification codes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Chapter {
    /// Roman numeral identifier
    pub id: String,
    /// Code range covered, e.g. "E00-E90"
    pub range: String,
    pub title: String,
}

/// A candidate concept for a text, with the quality of its best synonym match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredConcept {
    pub concept_id: String,
    pub preferred_name: String,
    /// Normalized synonym that matched
    pub matched_synonym: String,
    pub kind: MatchKind,
    /// 1.0 for exact, length ratio for contains, Jaccard for token overlap
    pub score: f64,
}

/// Result of mapping free text to a concept, code and chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptMapping {
    /// Text as given
    pub input: String,
    /// Normalized text used for lookup
    pub normalized: String,
    pub concept_id: Option<String>,
    pub preferred_name: Option<String>,
    pub code: Option<String>,
    pub chapter: Option<Chapter>,
    pub method: MappingMethod,
    /// How the concept itself was found (absent when unmapped)
    pub match_kind: Option<MatchKind>,
    /// Score of the concept match
    pub score: f64,
    /// Levels ascended to reach the code; meaningful only for hierarchical ascent
    pub hierarchy_distance: u32,
    /// Concept that carries the code (an ancestor after ascent)
    pub code_concept_id: Option<String>,
    /// Ranked alternatives, best first (includes the chosen concept)
    pub candidates: Vec<ScoredConcept>,
    /// Store failure that forced an unmapped result
    pub failure: Option<String>,
}

impl ConceptMapping {
    /// An unmapped result. Not an error: an expected outcome.
    pub fn unmapped(input: impl Into<String>, normalized: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            normalized: normalized.into(),
            concept_id: None,
            preferred_name: None,
            code: None,
            chapter: None,
            method: MappingMethod::Unmapped,
            match_kind: None,
            score: 0.0,
            hierarchy_distance: 0,
            code_concept_id: None,
            candidates: Vec::new(),
            failure: None,
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.concept_id.is_some()
    }

    /// Group key at concept granularity: the code when present, else the concept.
    pub fn concept_key(&self) -> Option<String> {
        match (&self.code, &self.concept_id) {
            (Some(code), _) => Some(format!("code:{}", code)),
            (None, Some(id)) => Some(format!("concept:{}", id)),
            (None, None) => None,
        }
    }

    /// Group key at chapter granularity.
    pub fn chapter_key(&self) -> Option<String> {
        self.chapter.as_ref().map(|c| format!("chapter:{}", c.id))
    }
}
