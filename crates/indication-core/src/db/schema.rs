//! SQLite schema definition.

/// Stamped into `PRAGMA user_version`; bump on incompatible changes.
pub const SCHEMA_VERSION: i64 = 1;

/// Complete database schema.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Concept Store
-- ============================================================================

CREATE TABLE IF NOT EXISTS concepts (
    concept_id TEXT PRIMARY KEY,
    preferred_name TEXT NOT NULL,
    semantic_types TEXT NOT NULL DEFAULT '[]',     -- JSON array of strings
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Rowid order is the store's iteration order (tie-break for matching)
CREATE TABLE IF NOT EXISTS concept_synonyms (
    concept_id TEXT NOT NULL REFERENCES concepts(concept_id),
    synonym TEXT NOT NULL,
    normalized TEXT NOT NULL,
    UNIQUE (concept_id, normalized)
);

CREATE INDEX IF NOT EXISTS idx_synonyms_normalized ON concept_synonyms(normalized);

-- FTS5 over normalized synonyms for token-overlap candidate retrieval
CREATE VIRTUAL TABLE IF NOT EXISTS concept_synonyms_fts USING fts5(
    normalized,
    content='concept_synonyms',
    content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS concept_synonyms_ai AFTER INSERT ON concept_synonyms BEGIN
    INSERT INTO concept_synonyms_fts(rowid, normalized) VALUES (new.rowid, new.normalized);
END;

CREATE TRIGGER IF NOT EXISTS concept_synonyms_ad AFTER DELETE ON concept_synonyms BEGIN
    INSERT INTO concept_synonyms_fts(concept_synonyms_fts, rowid, normalized)
    VALUES ('delete', old.rowid, old.normalized);
END;

CREATE TABLE IF NOT EXISTS concept_codes (
    concept_id TEXT NOT NULL REFERENCES concepts(concept_id),
    code TEXT NOT NULL,
    UNIQUE (concept_id, code)
);

CREATE INDEX IF NOT EXISTS idx_codes_concept ON concept_codes(concept_id);

-- Parent may be registered later than the child, so no foreign key here
CREATE TABLE IF NOT EXISTS concept_parents (
    concept_id TEXT NOT NULL REFERENCES concepts(concept_id),
    parent_id TEXT NOT NULL,
    UNIQUE (concept_id, parent_id)
);

CREATE INDEX IF NOT EXISTS idx_parents_concept ON concept_parents(concept_id);

-- ============================================================================
-- Mapping Cache (idempotent: first writer wins)
-- ============================================================================

CREATE TABLE IF NOT EXISTS mapping_cache (
    normalized TEXT PRIMARY KEY,
    mapping TEXT NOT NULL,                         -- JSON ConceptMapping
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- ============================================================================
-- Evidence (append-only per substance/condition)
-- ============================================================================

CREATE TABLE IF NOT EXISTS confirmation_states (
    substance TEXT NOT NULL,
    condition TEXT NOT NULL,
    display TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('pending', 'confirmed', 'exhausted')),
    aggregate_confidence REAL NOT NULL DEFAULT 0,
    documents_consumed INTEGER NOT NULL DEFAULT 0,
    attempts INTEGER NOT NULL DEFAULT 0,
    failed_attempts INTEGER NOT NULL DEFAULT 0,
    trigger TEXT,
    exhaustion TEXT,
    cancelled INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (substance, condition)
);

CREATE TABLE IF NOT EXISTS evidence_records (
    substance TEXT NOT NULL,
    condition TEXT NOT NULL,
    document_id TEXT NOT NULL,
    confidence REAL NOT NULL CHECK (confidence >= 0 AND confidence <= 1),
    recorded_at TEXT NOT NULL,
    PRIMARY KEY (substance, condition, document_id)
);

CREATE INDEX IF NOT EXISTS idx_evidence_substance ON evidence_records(substance);
"#;
