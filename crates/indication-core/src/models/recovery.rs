//! Recovery analysis results.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::mapping::{MappingMethod, MatchKind};

/// Granularity at which reference and extracted items are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    ExactText,
    Concept,
    Chapter,
}

impl Granularity {
    pub const ALL: [Granularity; 3] = [
        Granularity::ExactText,
        Granularity::Concept,
        Granularity::Chapter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::ExactText => "exact_text",
            Granularity::Concept => "concept",
            Granularity::Chapter => "chapter",
        }
    }
}

/// Why a reference item and an extracted item were paired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "basis", rename_all = "snake_case")]
pub enum PairBasis {
    /// Identical normalized text
    SameText,
    /// Both mapped to the same group key
    SharedKey {
        reference_method: MappingMethod,
        extracted_method: MappingMethod,
    },
    /// Direct text comparison, used when a side has no group key
    TextFallback { kind: MatchKind },
}

/// A reference item matched by an extracted item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedPair {
    pub reference: String,
    pub extracted: String,
    /// Shared group key
    pub key: String,
    #[serde(flatten)]
    pub basis: PairBasis,
    pub score: f64,
}

/// Closest extracted string for an unrecovered reference item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearMiss {
    pub reference: String,
    pub closest_extracted: String,
    /// Jaro-Winkler similarity of the normalized texts
    pub similarity: f64,
}

/// Recovery at one granularity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GranularityResult {
    pub granularity: Granularity,
    /// One pair per recovered reference item (the strongest justification)
    pub matched: Vec<MatchedPair>,
    pub unmatched_reference: Vec<String>,
    pub unmatched_extracted: Vec<String>,
    /// |recovered reference items| / |reference items|, 0.0 when empty
    pub recovery_rate: f64,
    /// Group keys of recovered reference items
    pub matched_keys: BTreeSet<String>,
}

impl GranularityResult {
    pub fn empty(granularity: Granularity) -> Self {
        Self {
            granularity,
            matched: Vec::new(),
            unmatched_reference: Vec::new(),
            unmatched_extracted: Vec::new(),
            recovery_rate: 0.0,
            matched_keys: BTreeSet::new(),
        }
    }

    pub fn recovered_count(&self) -> usize {
        self.matched.len()
    }
}

/// Recovery of one method against the reference set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryResult {
    pub substance: Option<String>,
    pub method: String,
    /// Distinct reference items (after normalization)
    pub reference_size: usize,
    /// Distinct extracted items (after normalization)
    pub extracted_size: usize,
    /// The reference set was empty; every rate is 0.0 by convention
    pub no_ground_truth: bool,
    pub exact_text: GranularityResult,
    pub concept: GranularityResult,
    pub chapter: GranularityResult,
    pub near_misses: Vec<NearMiss>,
}

impl RecoveryResult {
    pub fn at(&self, granularity: Granularity) -> &GranularityResult {
        match granularity {
            Granularity::ExactText => &self.exact_text,
            Granularity::Concept => &self.concept,
            Granularity::Chapter => &self.chapter,
        }
    }

    pub fn recovery_rate(&self, granularity: Granularity) -> f64 {
        self.at(granularity).recovery_rate
    }
}

/// Cross-method contribution at one granularity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributionAnalysis {
    pub granularity: Granularity,
    /// Per method: matched keys no other method matched
    pub unique: BTreeMap<String, BTreeSet<String>>,
    /// Keys matched by every method
    pub consensus: BTreeSet<String>,
}

/// Recovery of every method plus the cross-method analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub substance: Option<String>,
    /// The reference set was empty after normalization
    #[serde(default)]
    pub no_ground_truth: bool,
    pub results: Vec<RecoveryResult>,
    pub contributions: Vec<ContributionAnalysis>,
}

impl RecoveryReport {
    pub fn result(&self, method: &str) -> Option<&RecoveryResult> {
        self.results.iter().find(|r| r.method == method)
    }

    pub fn contribution(&self, granularity: Granularity) -> Option<&ContributionAnalysis> {
        self.contributions.iter().find(|c| c.granularity == granularity)
    }
}
