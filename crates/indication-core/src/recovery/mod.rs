//! Recovery analysis: how much of a reference condition set each extraction
//! method recovers, at exact-text, concept and chapter granularity.

mod contribution;

pub use contribution::*;

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;
use tracing::debug;

use crate::config::RecoveryConfig;
use crate::models::{
    ConceptMapping, Granularity, GranularityResult, MatchedPair, NearMiss, PairBasis, RecoveryReport,
    RecoveryResult,
};
use crate::terminology::{ConceptStore, TerminologyMapper};
use crate::text_match::TextMatcher;

/// A named set of extracted condition strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodSet {
    pub method: String,
    pub conditions: Vec<String>,
}

impl MethodSet {
    pub fn new<T: Into<String>>(method: impl Into<String>, conditions: impl IntoIterator<Item = T>) -> Self {
        Self {
            method: method.into(),
            conditions: conditions.into_iter().map(Into::into).collect(),
        }
    }
}

/// A distinct condition string with its mapping.
#[derive(Debug, Clone)]
struct Item {
    text: String,
    mapping: ConceptMapping,
}

impl Item {
    fn normalized(&self) -> &str {
        &self.mapping.normalized
    }

    fn key(&self, granularity: Granularity) -> Option<String> {
        match granularity {
            Granularity::ExactText => Some(format!("text:{}", self.normalized())),
            Granularity::Concept => self.mapping.concept_key(),
            Granularity::Chapter => self.mapping.chapter_key(),
        }
    }

    /// Key a recovered reference item is reported under.
    fn identity(&self, granularity: Granularity) -> String {
        self.key(granularity)
            .unwrap_or_else(|| format!("text:{}", self.normalized()))
    }
}

/// Compares reference and extracted condition sets through the terminology
/// mapper, with the text matcher deciding pairs that have no group key.
pub struct RecoveryAnalyzer<'a, S: ConceptStore + ?Sized> {
    mapper: TerminologyMapper<'a, S>,
    matcher: TextMatcher,
    config: RecoveryConfig,
}

impl<'a, S: ConceptStore + ?Sized> RecoveryAnalyzer<'a, S> {
    pub fn new(mapper: TerminologyMapper<'a, S>, config: RecoveryConfig) -> Self {
        let matcher = mapper.matcher();
        Self {
            mapper,
            matcher,
            config,
        }
    }

    pub fn mapper(&self) -> &TerminologyMapper<'a, S> {
        &self.mapper
    }

    /// Recovery of every method plus cross-method contributions.
    pub fn analyze(&self, substance: Option<&str>, reference: &[String], methods: &[MethodSet]) -> RecoveryReport {
        let reference_items = self.prepare(reference);
        let results: Vec<RecoveryResult> = methods
            .iter()
            .map(|m| self.recover_prepared(substance, &reference_items, &m.method, &m.conditions))
            .collect();
        let contributions = Granularity::ALL
            .iter()
            .map(|g| contribution_analysis(*g, &results))
            .collect();

        RecoveryReport {
            substance: substance.map(str::to_string),
            no_ground_truth: reference_items.is_empty(),
            results,
            contributions,
        }
    }

    /// Recovery of one method against the reference set.
    pub fn recover(
        &self,
        substance: Option<&str>,
        reference: &[String],
        method: &str,
        extracted: &[String],
    ) -> RecoveryResult {
        let reference_items = self.prepare(reference);
        self.recover_prepared(substance, &reference_items, method, extracted)
    }

    fn recover_prepared(
        &self,
        substance: Option<&str>,
        reference: &[Item],
        method: &str,
        extracted: &[String],
    ) -> RecoveryResult {
        let extracted = self.prepare(extracted);
        let result = RecoveryResult {
            substance: substance.map(str::to_string),
            method: method.to_string(),
            reference_size: reference.len(),
            extracted_size: extracted.len(),
            no_ground_truth: reference.is_empty(),
            exact_text: self.at_granularity(Granularity::ExactText, reference, &extracted),
            concept: self.at_granularity(Granularity::Concept, reference, &extracted),
            chapter: self.at_granularity(Granularity::Chapter, reference, &extracted),
            near_misses: Vec::new(),
        };
        let near_misses = if self.config.near_misses {
            near_misses(&result.exact_text.unmatched_reference, &extracted)
        } else {
            Vec::new()
        };

        debug!(
            method,
            exact = result.exact_text.recovery_rate,
            concept = result.concept.recovery_rate,
            chapter = result.chapter.recovery_rate,
            "Recovery computed"
        );
        RecoveryResult {
            near_misses,
            ..result
        }
    }

    /// Map and deduplicate by normalized text; first spelling wins.
    fn prepare(&self, texts: &[String]) -> Vec<Item> {
        let mut seen = HashSet::new();
        self.mapper
            .map_all(texts)
            .into_iter()
            .zip(texts)
            .filter(|(mapping, _)| !mapping.normalized.is_empty())
            .filter(|(mapping, _)| seen.insert(mapping.normalized.clone()))
            .map(|(mapping, text)| Item {
                text: text.trim().to_string(),
                mapping,
            })
            .collect()
    }

    /// Why (if at all) a reference item and an extracted item pair up.
    fn pair(&self, granularity: Granularity, r: &Item, e: &Item) -> Option<(PairBasis, f64)> {
        if r.normalized() == e.normalized() {
            return Some((PairBasis::SameText, 1.0));
        }
        if granularity == Granularity::ExactText {
            return None;
        }
        match (r.key(granularity), e.key(granularity)) {
            (Some(a), Some(b)) if a == b => Some((
                PairBasis::SharedKey {
                    reference_method: r.mapping.method,
                    extracted_method: e.mapping.method,
                },
                r.mapping.score.min(e.mapping.score),
            )),
            (Some(_), Some(_)) => None,
            _ if self.config.text_fallback => self
                .matcher
                .compare_normalized(r.normalized(), e.normalized())
                .map(|m| (PairBasis::TextFallback { kind: m.kind }, m.score)),
            _ => None,
        }
    }

    fn at_granularity(&self, granularity: Granularity, reference: &[Item], extracted: &[Item]) -> GranularityResult {
        let mut result = GranularityResult::empty(granularity);
        let mut extracted_used = vec![false; extracted.len()];

        for r in reference {
            let mut best: Option<(usize, PairBasis, f64)> = None;
            for (i, e) in extracted.iter().enumerate() {
                let Some((basis, score)) = self.pair(granularity, r, e) else {
                    continue;
                };
                extracted_used[i] = true;
                let better = match &best {
                    None => true,
                    Some((_, best_basis, best_score)) => {
                        (basis_rank(&basis), -score) < (basis_rank(best_basis), -best_score)
                    }
                };
                if better {
                    best = Some((i, basis, score));
                }
            }

            match best {
                Some((i, basis, score)) => {
                    let key = r.identity(granularity);
                    result.matched_keys.insert(key.clone());
                    result.matched.push(MatchedPair {
                        reference: r.text.clone(),
                        extracted: extracted[i].text.clone(),
                        key,
                        basis,
                        score,
                    });
                }
                None => result.unmatched_reference.push(r.text.clone()),
            }
        }

        result.unmatched_extracted = extracted
            .iter()
            .zip(&extracted_used)
            .filter(|(_, used)| !**used)
            .map(|(e, _)| e.text.clone())
            .collect();
        result.recovery_rate = if reference.is_empty() {
            0.0
        } else {
            result.matched.len() as f64 / reference.len() as f64
        };
        result
    }
}

/// Same text beats a shared key beats a text-match fallback.
fn basis_rank(basis: &PairBasis) -> (u8, u8) {
    match basis {
        PairBasis::SameText => (0, 0),
        PairBasis::SharedKey { .. } => (1, 0),
        PairBasis::TextFallback { kind } => (2, *kind as u8),
    }
}

/// Closest extracted string (Jaro-Winkler over normalized text) for each
/// unrecovered reference item.
fn near_misses(unmatched_reference: &[String], extracted: &[Item]) -> Vec<NearMiss> {
    unmatched_reference
        .iter()
        .filter_map(|reference| {
            let normalized = crate::models::normalize_text(reference);
            extracted
                .iter()
                .map(|e| (e, jaro_winkler(&normalized, e.normalized())))
                .fold(None, |best: Option<(&Item, f64)>, (e, sim)| match best {
                    Some((_, best_sim)) if best_sim >= sim => best,
                    _ => Some((e, sim)),
                })
                .map(|(e, similarity)| NearMiss {
                    reference: reference.clone(),
                    closest_extracted: e.text.clone(),
                    similarity,
                })
        })
        .collect()
}

/// Keys matched at a granularity, for every result.
pub fn matched_keys(results: &[RecoveryResult], granularity: Granularity) -> Vec<(&str, &BTreeSet<String>)> {
    results
        .iter()
        .map(|r| (r.method.as_str(), &r.at(granularity).matched_keys))
        .collect()
}
