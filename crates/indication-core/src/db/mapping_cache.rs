//! Persisted mapping cache operations.

use rusqlite::{params, OptionalExtension};

use super::{Database, DbResult};
use crate::models::ConceptMapping;

impl Database {
    /// Insert a mapping unless one is already cached for its normalized text.
    ///
    /// Returns true if the row was written. Re-inserting is a no-op, so
    /// concurrent writers populating the same entry cannot conflict.
    pub fn insert_cached_mapping(&self, mapping: &ConceptMapping) -> DbResult<bool> {
        let json = serde_json::to_string(mapping)?;
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO mapping_cache (normalized, mapping) VALUES (?1, ?2)",
            params![mapping.normalized, json],
        )?;
        Ok(inserted > 0)
    }

    /// Get the cached mapping for a normalized text.
    pub fn get_cached_mapping(&self, normalized: &str) -> DbResult<Option<ConceptMapping>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT mapping FROM mapping_cache WHERE normalized = ?",
                [normalized],
                |row| row.get(0),
            )
            .optional()?;

        json.map(|j| serde_json::from_str(&j)).transpose().map_err(Into::into)
    }

    /// All cached mappings, oldest first.
    pub fn list_cached_mappings(&self) -> DbResult<Vec<ConceptMapping>> {
        let mut stmt = self
            .conn
            .prepare("SELECT mapping FROM mapping_cache ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut mappings = Vec::new();
        for row in rows {
            mappings.push(serde_json::from_str(&row?)?);
        }
        Ok(mappings)
    }
}
