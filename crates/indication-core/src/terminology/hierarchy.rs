//! Code resolution by breadth-first ascent through parent concepts.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::ConceptStore;
use crate::db::DbResult;

/// A classification code found for a concept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeResolution {
    pub code: String,
    /// Concept carrying the code (the start concept, or an ancestor)
    pub concept_id: String,
    /// Parent levels ascended; 0 for a direct code
    pub distance: u32,
}

/// Find the nearest code for a concept.
///
/// Checks the concept itself, then ascends level by level up to `max_depth`.
/// The first ancestor with a code wins, so the distance is the minimum over
/// all paths and ties go to breadth-first order (parents in priority order).
/// Cycles in the parent graph are tolerated.
pub fn resolve_code<S: ConceptStore + ?Sized>(
    store: &S,
    concept_id: &str,
    max_depth: u32,
) -> DbResult<Option<CodeResolution>> {
    if let Some(code) = store.get_codes(concept_id)?.into_iter().next() {
        return Ok(Some(CodeResolution {
            code,
            concept_id: concept_id.to_string(),
            distance: 0,
        }));
    }

    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(concept_id.to_string());
    let mut queue: VecDeque<(String, u32)> = VecDeque::new();
    queue.push_back((concept_id.to_string(), 0));

    while let Some((current, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        for parent in store.get_parents(&current)? {
            if !visited.insert(parent.clone()) {
                continue;
            }
            if let Some(code) = store.get_codes(&parent)?.into_iter().next() {
                return Ok(Some(CodeResolution {
                    code,
                    concept_id: parent,
                    distance: depth + 1,
                }));
            }
            queue.push_back((parent, depth + 1));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Concept;
    use crate::terminology::ConceptIndex;

    /// Chain C0 → C1 → ... → C6, code only on C6; plus a diamond.
    fn index() -> ConceptIndex {
        let mut concepts = Vec::new();
        for i in 0..6 {
            let parent = format!("C{}", i + 1);
            concepts.push(Concept::new(format!("C{}", i), format!("level {}", i)).with_parents(&[parent.as_str()]));
        }
        concepts.push(Concept::new("C6", "level 6").with_codes(&["R69"]));

        // D0 has two parents; the second reaches a code sooner.
        concepts.push(Concept::new("D0", "diamond").with_parents(&["D1", "D2"]));
        concepts.push(Concept::new("D1", "long way").with_parents(&["D3"]));
        concepts.push(Concept::new("D2", "short way").with_codes(&["K76.9"]));
        concepts.push(Concept::new("D3", "far").with_codes(&["K70.9"]));

        // Cycle without codes
        concepts.push(Concept::new("X0", "loop a").with_parents(&["X1"]));
        concepts.push(Concept::new("X1", "loop b").with_parents(&["X0"]));
        ConceptIndex::from_concepts(concepts)
    }

    #[test]
    fn test_direct_code() {
        let r = resolve_code(&index(), "C6", 5).unwrap().unwrap();
        assert_eq!(r.distance, 0);
        assert_eq!(r.code, "R69");
    }

    #[test]
    fn test_ascent_distance() {
        let idx = index();
        let r = resolve_code(&idx, "C1", 5).unwrap().unwrap();
        assert_eq!(r.distance, 5);
        assert_eq!(r.concept_id, "C6");

        // Six levels is past the bound.
        assert!(resolve_code(&idx, "C0", 5).unwrap().is_none());
        assert_eq!(resolve_code(&idx, "C0", 6).unwrap().unwrap().distance, 6);
    }

    #[test]
    fn test_minimum_distance_wins() {
        let r = resolve_code(&index(), "D0", 5).unwrap().unwrap();
        assert_eq!(r.concept_id, "D2");
        assert_eq!(r.distance, 1);
    }

    #[test]
    fn test_cycle_terminates() {
        assert!(resolve_code(&index(), "X0", 5).unwrap().is_none());
    }

    #[test]
    fn test_zero_depth() {
        assert!(resolve_code(&index(), "C5", 0).unwrap().is_none());
    }
}
