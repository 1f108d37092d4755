//! Concept store query contract and the in-memory index.

use std::collections::{BTreeSet, HashMap};

use crate::db::{Database, DbResult};
use crate::models::{normalize_text, Concept, SynonymHit};
use crate::text_match::{contains_score, tokenize};

/// Read access to canonical concepts.
///
/// Every synonym query returns hits in store iteration order; that order is
/// the tie-break between equally good matches.
pub trait ConceptStore {
    /// First concept (in store order) with a synonym equal to the normalized text.
    fn lookup_by_text(&self, normalized: &str) -> DbResult<Option<String>> {
        Ok(self
            .synonyms_exact(normalized)?
            .into_iter()
            .next()
            .map(|hit| hit.concept_id))
    }

    fn get_concept(&self, concept_id: &str) -> DbResult<Option<Concept>>;

    /// Classification codes of a concept, in priority order.
    fn get_codes(&self, concept_id: &str) -> DbResult<Vec<String>>;

    /// Parent concepts, in priority order.
    fn get_parents(&self, concept_id: &str) -> DbResult<Vec<String>>;

    /// Synonyms equal to the normalized text.
    fn synonyms_exact(&self, normalized: &str) -> DbResult<Vec<SynonymHit>>;

    /// Synonyms containing, or contained in, the normalized text. The
    /// contained side must be at least `min_len` characters.
    fn synonyms_containing(&self, normalized: &str, min_len: usize) -> DbResult<Vec<SynonymHit>>;

    /// Synonyms sharing at least one content token. May over-approximate;
    /// callers score the hits.
    fn synonyms_sharing_tokens(&self, tokens: &[String]) -> DbResult<Vec<SynonymHit>>;
}

impl<T: ConceptStore + ?Sized> ConceptStore for &T {
    fn lookup_by_text(&self, normalized: &str) -> DbResult<Option<String>> {
        (**self).lookup_by_text(normalized)
    }

    fn get_concept(&self, concept_id: &str) -> DbResult<Option<Concept>> {
        (**self).get_concept(concept_id)
    }

    fn get_codes(&self, concept_id: &str) -> DbResult<Vec<String>> {
        (**self).get_codes(concept_id)
    }

    fn get_parents(&self, concept_id: &str) -> DbResult<Vec<String>> {
        (**self).get_parents(concept_id)
    }

    fn synonyms_exact(&self, normalized: &str) -> DbResult<Vec<SynonymHit>> {
        (**self).synonyms_exact(normalized)
    }

    fn synonyms_containing(&self, normalized: &str, min_len: usize) -> DbResult<Vec<SynonymHit>> {
        (**self).synonyms_containing(normalized, min_len)
    }

    fn synonyms_sharing_tokens(&self, tokens: &[String]) -> DbResult<Vec<SynonymHit>> {
        (**self).synonyms_sharing_tokens(tokens)
    }
}

/// Immutable in-memory snapshot of a concept store.
///
/// `Send + Sync`, so one index can be shared by every worker behind an `Arc`
/// without locking. Store order matches the database it was loaded from.
#[derive(Debug, Default, Clone)]
pub struct ConceptIndex {
    concepts: HashMap<String, Concept>,
    /// Synonym rows in store order
    synonyms: Vec<SynonymHit>,
    /// Normalized synonym → positions in `synonyms`
    by_text: HashMap<String, Vec<usize>>,
    /// Content token → positions in `synonyms`
    by_token: HashMap<String, Vec<usize>>,
}

impl ConceptIndex {
    /// Build an index from concepts, in the given order.
    pub fn from_concepts<I>(concepts: I) -> Self
    where
        I: IntoIterator<Item = Concept>,
    {
        let mut index = Self::default();
        for concept in concepts {
            index.insert(concept);
        }
        index
    }

    /// Snapshot a database.
    pub fn load(db: &Database) -> DbResult<Self> {
        let mut index = Self::default();
        for concept in db.list_concepts()? {
            index.concepts.insert(concept.concept_id.clone(), concept);
        }
        for hit in db.list_synonyms()? {
            index.push_synonym(hit);
        }
        Ok(index)
    }

    /// Add a concept, or merge new names, codes and parents into an existing one.
    pub fn insert(&mut self, concept: Concept) {
        let existing: BTreeSet<String> = self
            .synonyms
            .iter()
            .filter(|h| h.concept_id == concept.concept_id)
            .map(|h| h.synonym.clone())
            .collect();

        let mut new_names = Vec::new();
        for name in concept.all_names() {
            let normalized = normalize_text(name);
            if !normalized.is_empty() && !existing.contains(&normalized) && !new_names.contains(&normalized) {
                new_names.push(normalized);
            }
        }

        for hit in self.synonyms.iter_mut().filter(|h| h.concept_id == concept.concept_id) {
            hit.preferred_name = concept.preferred_name.clone();
        }
        for synonym in new_names {
            let hit = SynonymHit {
                concept_id: concept.concept_id.clone(),
                preferred_name: concept.preferred_name.clone(),
                synonym,
                ordinal: self.synonyms.len() as i64 + 1,
            };
            self.push_synonym(hit);
        }

        match self.concepts.get_mut(&concept.concept_id) {
            Some(current) => {
                current.preferred_name = concept.preferred_name;
                current.semantic_types = concept.semantic_types;
                for s in concept.synonyms {
                    if !current.synonyms.contains(&s) {
                        current.synonyms.push(s);
                    }
                }
                for c in concept.codes {
                    if !current.codes.contains(&c) {
                        current.codes.push(c);
                    }
                }
                for p in concept.parents {
                    if !current.parents.contains(&p) {
                        current.parents.push(p);
                    }
                }
            }
            None => {
                self.concepts.insert(concept.concept_id.clone(), concept);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }

    fn push_synonym(&mut self, hit: SynonymHit) {
        let position = self.synonyms.len();
        self.by_text
            .entry(hit.synonym.clone())
            .or_default()
            .push(position);
        for token in tokenize(&hit.synonym) {
            self.by_token.entry(token).or_default().push(position);
        }
        self.synonyms.push(hit);
    }

    fn hits(&self, positions: impl IntoIterator<Item = usize>) -> Vec<SynonymHit> {
        positions
            .into_iter()
            .filter_map(|p| self.synonyms.get(p).cloned())
            .collect()
    }
}

impl ConceptStore for ConceptIndex {
    fn get_concept(&self, concept_id: &str) -> DbResult<Option<Concept>> {
        Ok(self.concepts.get(concept_id).cloned())
    }

    fn get_codes(&self, concept_id: &str) -> DbResult<Vec<String>> {
        Ok(self
            .concepts
            .get(concept_id)
            .map(|c| c.codes.clone())
            .unwrap_or_default())
    }

    fn get_parents(&self, concept_id: &str) -> DbResult<Vec<String>> {
        Ok(self
            .concepts
            .get(concept_id)
            .map(|c| c.parents.clone())
            .unwrap_or_default())
    }

    fn synonyms_exact(&self, normalized: &str) -> DbResult<Vec<SynonymHit>> {
        let positions = self.by_text.get(normalized).cloned().unwrap_or_default();
        Ok(self.hits(positions))
    }

    fn synonyms_containing(&self, normalized: &str, min_len: usize) -> DbResult<Vec<SynonymHit>> {
        Ok(self
            .synonyms
            .iter()
            .filter(|h| contains_score(normalized, &h.synonym, min_len).is_some())
            .cloned()
            .collect())
    }

    fn synonyms_sharing_tokens(&self, tokens: &[String]) -> DbResult<Vec<SynonymHit>> {
        let positions: BTreeSet<usize> = tokens
            .iter()
            .filter_map(|t| self.by_token.get(t))
            .flatten()
            .copied()
            .collect();
        Ok(self.hits(positions))
    }
}
