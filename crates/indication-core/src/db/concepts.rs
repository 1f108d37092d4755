//! Concept store database operations.

use rusqlite::{params, OptionalExtension};

use super::{Database, DbError, DbResult};
use crate::models::{normalize_text, Concept, SynonymHit};
use crate::terminology::ConceptStore;

impl Database {
    /// Insert or update a concept with its synonyms, codes and parents.
    ///
    /// The preferred name is always indexed as a synonym. Re-upserting a
    /// concept keeps existing synonym rows (and so their store order).
    pub fn upsert_concept(&self, concept: &Concept) -> DbResult<()> {
        if concept.concept_id.trim().is_empty() {
            return Err(DbError::Constraint("concept_id must not be empty".into()));
        }
        let semantic_types_json = serde_json::to_string(&concept.semantic_types)?;

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            r#"
            INSERT INTO concepts (concept_id, preferred_name, semantic_types, updated_at)
            VALUES (?1, ?2, ?3, datetime('now'))
            ON CONFLICT(concept_id) DO UPDATE SET
                preferred_name = excluded.preferred_name,
                semantic_types = excluded.semantic_types,
                updated_at = datetime('now')
            "#,
            params![concept.concept_id, concept.preferred_name, semantic_types_json],
        )?;

        for name in concept.all_names() {
            let normalized = normalize_text(name);
            if normalized.is_empty() {
                continue;
            }
            tx.execute(
                "INSERT OR IGNORE INTO concept_synonyms (concept_id, synonym, normalized) VALUES (?1, ?2, ?3)",
                params![concept.concept_id, name.trim(), normalized],
            )?;
        }
        for code in &concept.codes {
            tx.execute(
                "INSERT OR IGNORE INTO concept_codes (concept_id, code) VALUES (?1, ?2)",
                params![concept.concept_id, code.trim()],
            )?;
        }
        for parent in &concept.parents {
            tx.execute(
                "INSERT OR IGNORE INTO concept_parents (concept_id, parent_id) VALUES (?1, ?2)",
                params![concept.concept_id, parent.trim()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Upsert many concepts in order.
    pub fn upsert_concepts(&self, concepts: &[Concept]) -> DbResult<()> {
        for concept in concepts {
            self.upsert_concept(concept)?;
        }
        Ok(())
    }

    /// Get a concept by identifier.
    pub fn get_concept(&self, concept_id: &str) -> DbResult<Option<Concept>> {
        let row = self
            .conn
            .query_row(
                "SELECT concept_id, preferred_name, semantic_types FROM concepts WHERE concept_id = ?",
                [concept_id],
                |row| {
                    Ok(ConceptRow {
                        concept_id: row.get(0)?,
                        preferred_name: row.get(1)?,
                        semantic_types: row.get(2)?,
                    })
                },
            )
            .optional()?;

        row.map(|r| self.hydrate(r)).transpose()
    }

    /// All concepts in insertion order.
    pub fn list_concepts(&self) -> DbResult<Vec<Concept>> {
        let mut stmt = self.conn.prepare(
            "SELECT concept_id, preferred_name, semantic_types FROM concepts ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ConceptRow {
                concept_id: row.get(0)?,
                preferred_name: row.get(1)?,
                semantic_types: row.get(2)?,
            })
        })?;

        let mut concepts = Vec::new();
        for row in rows {
            concepts.push(self.hydrate(row?)?);
        }
        Ok(concepts)
    }

    /// Every synonym row in store order.
    pub fn list_synonyms(&self) -> DbResult<Vec<SynonymHit>> {
        self.query_synonyms(
            r#"
            SELECT s.concept_id, c.preferred_name, s.normalized, s.rowid
            FROM concept_synonyms s
            JOIN concepts c ON c.concept_id = s.concept_id
            ORDER BY s.rowid
            "#,
            params![],
        )
    }

    /// Number of concepts in the store.
    pub fn concept_count(&self) -> DbResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM concepts", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn hydrate(&self, row: ConceptRow) -> DbResult<Concept> {
        let synonyms = self.query_strings(
            "SELECT synonym FROM concept_synonyms WHERE concept_id = ? ORDER BY rowid",
            &row.concept_id,
        )?;
        let codes = self.query_strings(
            "SELECT code FROM concept_codes WHERE concept_id = ? ORDER BY rowid",
            &row.concept_id,
        )?;
        let parents = self.query_strings(
            "SELECT parent_id FROM concept_parents WHERE concept_id = ? ORDER BY rowid",
            &row.concept_id,
        )?;

        Ok(Concept {
            // The preferred name is stored as the first synonym; keep only the others.
            synonyms: synonyms
                .into_iter()
                .filter(|s| !s.eq_ignore_ascii_case(&row.preferred_name))
                .collect(),
            codes,
            parents,
            semantic_types: serde_json::from_str(&row.semantic_types)?,
            concept_id: row.concept_id,
            preferred_name: row.preferred_name,
        })
    }

    fn query_strings(&self, sql: &str, key: &str) -> DbResult<Vec<String>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map([key], |row| row.get::<_, String>(0))?;
        let mut values = Vec::new();
        for row in rows {
            values.push(row?);
        }
        Ok(values)
    }

    fn query_synonyms<P: rusqlite::Params>(&self, sql: &str, params: P) -> DbResult<Vec<SynonymHit>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok(SynonymHit {
                concept_id: row.get(0)?,
                preferred_name: row.get(1)?,
                synonym: row.get(2)?,
                ordinal: row.get(3)?,
            })
        })?;
        let mut hits = Vec::new();
        for row in rows {
            hits.push(row?);
        }
        Ok(hits)
    }
}

impl ConceptStore for Database {
    fn get_concept(&self, concept_id: &str) -> DbResult<Option<Concept>> {
        Database::get_concept(self, concept_id)
    }

    fn get_codes(&self, concept_id: &str) -> DbResult<Vec<String>> {
        self.query_strings(
            "SELECT code FROM concept_codes WHERE concept_id = ? ORDER BY rowid",
            concept_id,
        )
    }

    fn get_parents(&self, concept_id: &str) -> DbResult<Vec<String>> {
        self.query_strings(
            "SELECT parent_id FROM concept_parents WHERE concept_id = ? ORDER BY rowid",
            concept_id,
        )
    }

    fn synonyms_exact(&self, normalized: &str) -> DbResult<Vec<SynonymHit>> {
        self.query_synonyms(
            r#"
            SELECT s.concept_id, c.preferred_name, s.normalized, s.rowid
            FROM concept_synonyms s
            JOIN concepts c ON c.concept_id = s.concept_id
            WHERE s.normalized = ?1
            ORDER BY s.rowid
            "#,
            [normalized],
        )
    }

    fn synonyms_containing(&self, normalized: &str, min_len: usize) -> DbResult<Vec<SynonymHit>> {
        // The contained side of the pair must be at least `min_len` characters.
        self.query_synonyms(
            r#"
            SELECT s.concept_id, c.preferred_name, s.normalized, s.rowid
            FROM concept_synonyms s
            JOIN concepts c ON c.concept_id = s.concept_id
            WHERE s.normalized != ?1
              AND ((length(?1) >= ?2 AND instr(s.normalized, ?1) > 0)
                OR (length(s.normalized) >= ?2 AND instr(?1, s.normalized) > 0))
            ORDER BY s.rowid
            "#,
            params![normalized, min_len as i64],
        )
    }

    fn synonyms_sharing_tokens(&self, tokens: &[String]) -> DbResult<Vec<SynonymHit>> {
        let query = fts_any_token_query(tokens);
        if query.is_empty() {
            return Ok(Vec::new());
        }
        self.query_synonyms(
            r#"
            SELECT s.concept_id, c.preferred_name, s.normalized, s.rowid
            FROM concept_synonyms s
            JOIN concept_synonyms_fts fts ON s.rowid = fts.rowid
            JOIN concepts c ON c.concept_id = s.concept_id
            WHERE concept_synonyms_fts MATCH ?1
            ORDER BY s.rowid
            "#,
            [query],
        )
    }
}

/// Internal row type for database mapping.
struct ConceptRow {
    concept_id: String,
    preferred_name: String,
    semantic_types: String,
}

/// Build an FTS5 query matching any of the tokens.
///
/// Each token becomes a quoted phrase so FTS5 operators in the input are
/// inert; tokens without alphanumerics are dropped.
fn fts_any_token_query(tokens: &[String]) -> String {
    tokens
        .iter()
        .filter(|t| t.chars().any(|c| c.is_alphanumeric()))
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}
