//! SQLite persistence: the concept store, the mapping cache, and the
//! evidence ledger.

mod schema;
mod concepts;
mod evidence;
mod mapping_cache;

pub use schema::*;

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use thiserror::Error;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Concept store unavailable: {0}")]
    Unavailable(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Database schema version {found} is newer than supported version {supported}")]
    SchemaVersion { found: i64, supported: i64 },
}

pub type DbResult<T> = Result<T, DbError>;

/// Concept store and evidence database.
///
/// One connection, not `Sync`: concurrent workers read through a
/// [`ConceptIndex`](crate::terminology::ConceptIndex) snapshot and results are
/// written back once a run is over.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) a database file.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        // The CLI may read while a run persists its results.
        conn.busy_timeout(Duration::from_secs(5))?;
        let _mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// In-memory database, used by tests and one-off analyses.
    pub fn open_in_memory() -> DbResult<Self> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.initialize()?;
        Ok(db)
    }

    fn initialize(&self) -> DbResult<()> {
        let found: i64 = self.conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if found > SCHEMA_VERSION {
            return Err(DbError::SchemaVersion {
                found,
                supported: SCHEMA_VERSION,
            });
        }
        self.conn.execute_batch(SCHEMA)?;
        self.conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    /// Raw connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Version stamped on the schema.
    pub fn schema_version(&self) -> DbResult<i64> {
        Ok(self.conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
    }
}
