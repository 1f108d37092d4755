//! Free text → concept → code → chapter.

use std::collections::HashMap;

use tracing::{debug, warn};

use super::{chapter_for_code, resolve_code, ConceptStore, MappingCache, TermNormalizer};
use crate::config::MapperConfig;
use crate::db::DbResult;
use crate::models::{ConceptMapping, MappingMethod, ScoredConcept, SynonymHit};
use crate::text_match::{tokenize, TextMatcher};

/// Maps condition strings onto a concept store.
///
/// `map` never fails: a store error is logged and surfaces as an unmapped
/// result carrying a `failure` note.
pub struct TerminologyMapper<'a, S: ConceptStore + ?Sized> {
    store: &'a S,
    normalizer: TermNormalizer,
    matcher: TextMatcher,
    config: MapperConfig,
    cache: Option<&'a MappingCache>,
}

impl<'a, S: ConceptStore + ?Sized> TerminologyMapper<'a, S> {
    /// Create a mapper with default thresholds.
    pub fn new(store: &'a S) -> Self {
        Self::with_config(store, MapperConfig::default())
    }

    pub fn with_config(store: &'a S, config: MapperConfig) -> Self {
        Self {
            store,
            normalizer: TermNormalizer::new(),
            matcher: TextMatcher::from_config(&config),
            config,
            cache: None,
        }
    }

    /// Read and fill a shared cache.
    pub fn with_cache(mut self, cache: &'a MappingCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_normalizer(mut self, normalizer: TermNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn normalizer(&self) -> &TermNormalizer {
        &self.normalizer
    }

    /// Text matcher using the same thresholds as this mapper.
    pub fn matcher(&self) -> TextMatcher {
        self.matcher
    }

    /// Map one condition string.
    pub fn map(&self, text: &str) -> ConceptMapping {
        // Step 1: Normalize
        let normalized = self.normalizer.normalize(text);
        if normalized.is_empty() {
            return ConceptMapping::unmapped(text, normalized);
        }

        if let Some(cache) = self.cache {
            if let Some(mut cached) = cache.get(&normalized) {
                cached.input = text.to_string();
                return cached;
            }
        }

        match self.try_map(text, &normalized) {
            Ok(mapping) => {
                debug!(
                    input = text,
                    method = ?mapping.method,
                    concept = mapping.concept_id.as_deref().unwrap_or("-"),
                    code = mapping.code.as_deref().unwrap_or("-"),
                    "Mapped condition"
                );
                if let Some(cache) = self.cache {
                    cache.insert(mapping.clone());
                }
                mapping
            }
            Err(e) => {
                // Not cached: a later attempt may reach the store.
                warn!(input = text, error = %e, "Concept store lookup failed; leaving unmapped");
                let mut mapping = ConceptMapping::unmapped(text, normalized);
                mapping.failure = Some(e.to_string());
                mapping
            }
        }
    }

    /// Map a batch. Repeated normalized inputs are looked up once.
    pub fn map_all<T: AsRef<str>>(&self, texts: &[T]) -> Vec<ConceptMapping> {
        let mut seen: HashMap<String, ConceptMapping> = HashMap::new();
        texts
            .iter()
            .map(|t| {
                let text = t.as_ref();
                let normalized = self.normalizer.normalize(text);
                if let Some(prior) = seen.get(&normalized) {
                    let mut mapping = prior.clone();
                    mapping.input = text.to_string();
                    return mapping;
                }
                let mapping = self.map(text);
                if mapping.failure.is_none() {
                    seen.insert(normalized, mapping.clone());
                }
                mapping
            })
            .collect()
    }

    fn try_map(&self, text: &str, normalized: &str) -> DbResult<ConceptMapping> {
        // Steps 2-4: exact, contains, token overlap
        let candidates = self.candidates(normalized)?;
        let mut mapping = ConceptMapping::unmapped(text, normalized);
        let Some(best) = candidates.first().cloned() else {
            return Ok(mapping);
        };

        // Step 5: direct code, else breadth-first ascent
        let resolution = resolve_code(self.store, &best.concept_id, self.config.max_ascent_depth)?;

        mapping.method = best.kind.into();
        mapping.match_kind = Some(best.kind);
        mapping.score = best.score;
        if let Some(resolution) = resolution {
            if resolution.distance > 0 {
                mapping.method = MappingMethod::HierarchicalAscent;
                mapping.hierarchy_distance = resolution.distance;
            }
            // Step 6: chapter from the code
            mapping.chapter = chapter_for_code(&resolution.code);
            mapping.code = Some(resolution.code);
            mapping.code_concept_id = Some(resolution.concept_id);
        }
        mapping.concept_id = Some(best.concept_id);
        mapping.preferred_name = Some(best.preferred_name);
        mapping.candidates = candidates;
        Ok(mapping)
    }

    /// Ranked concepts for a normalized text, best first, one entry per concept.
    fn candidates(&self, normalized: &str) -> DbResult<Vec<ScoredConcept>> {
        let mut hits: Vec<(SynonymHit, &str)> = Vec::new();

        let exact = self.store.synonyms_exact(normalized)?;
        if exact.is_empty() {
            // Abbreviations only after the plain text found nothing
            if let Some(expanded) = self.normalizer.expand_alias(normalized) {
                for hit in self.store.synonyms_exact(expanded)? {
                    hits.push((hit, expanded));
                }
            }
        }
        for hit in exact {
            hits.push((hit, normalized));
        }
        for hit in self
            .store
            .synonyms_containing(normalized, self.config.min_contains_len)?
        {
            hits.push((hit, normalized));
        }
        let tokens: Vec<String> = tokenize(normalized).into_iter().collect();
        for hit in self.store.synonyms_sharing_tokens(&tokens)? {
            hits.push((hit, normalized));
        }

        // Classify each synonym exactly as the text matcher would
        let mut best: HashMap<String, (ScoredConcept, i64)> = HashMap::new();
        for (hit, query) in hits {
            let Some(m) = self.matcher.compare_normalized(query, &hit.synonym) else {
                continue;
            };
            let scored = ScoredConcept {
                concept_id: hit.concept_id.clone(),
                preferred_name: hit.preferred_name,
                matched_synonym: hit.synonym,
                kind: m.kind,
                score: m.score,
            };
            match best.get(&hit.concept_id) {
                Some((current, ordinal)) if !outranks(&scored, hit.ordinal, current, *ordinal) => {}
                _ => {
                    best.insert(hit.concept_id, (scored, hit.ordinal));
                }
            }
        }

        let mut ranked: Vec<(ScoredConcept, i64)> = best.into_values().collect();
        ranked.sort_by(|(a, a_ord), (b, b_ord)| {
            a.kind
                .cmp(&b.kind)
                .then(b.score.total_cmp(&a.score))
                .then(a_ord.cmp(b_ord))
        });
        ranked.truncate(self.config.max_candidates.max(1));
        Ok(ranked.into_iter().map(|(c, _)| c).collect())
    }
}

/// Stronger kind first, then higher score, then earlier in store order.
fn outranks(a: &ScoredConcept, a_ord: i64, b: &ScoredConcept, b_ord: i64) -> bool {
    a.kind
        .cmp(&b.kind)
        .then(b.score.total_cmp(&a.score))
        .then(a_ord.cmp(&b_ord))
        .is_lt()
}
