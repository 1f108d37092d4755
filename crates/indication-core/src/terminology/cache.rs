//! Shared mapping cache.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use crate::db::{Database, DbResult};
use crate::models::ConceptMapping;

/// Normalized text → mapping, shared by reference between workers.
///
/// Inserts are first-writer-wins: a second insert for the same text is a
/// no-op, so workers racing to fill the same entry cannot disagree.
#[derive(Debug, Default)]
pub struct MappingCache {
    entries: RwLock<HashMap<String, ConceptMapping>>,
}

impl MappingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate from the database.
    pub fn load(db: &Database) -> DbResult<Self> {
        let cache = Self::new();
        for mapping in db.list_cached_mappings()? {
            cache.insert(mapping);
        }
        debug!(entries = cache.len(), "Loaded mapping cache");
        Ok(cache)
    }

    /// Write every entry not yet in the database. Returns rows written.
    pub fn persist(&self, db: &Database) -> DbResult<usize> {
        let snapshot: Vec<ConceptMapping> = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            entries.values().cloned().collect()
        };
        let mut written = 0;
        for mapping in &snapshot {
            if db.insert_cached_mapping(mapping)? {
                written += 1;
            }
        }
        Ok(written)
    }

    pub fn get(&self, normalized: &str) -> Option<ConceptMapping> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(normalized)
            .cloned()
    }

    /// Insert unless present. Returns true if this call stored the mapping.
    pub fn insert(&self, mapping: ConceptMapping) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&mapping.normalized) {
            return false;
        }
        entries.insert(mapping.normalized.clone(), mapping);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
