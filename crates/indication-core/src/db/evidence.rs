//! Evidence and confirmation state persistence.

use rusqlite::{params, OptionalExtension};

use super::{Database, DbError, DbResult};
use crate::accumulator::AccumulationOutcome;
use crate::models::{
    ConditionKey, ConfirmationState, ConfirmationStatus, EvidenceRecord,
};

impl Database {
    /// Persist every confirmation state and evidence record of an outcome.
    pub fn save_outcome(&self, outcome: &AccumulationOutcome) -> DbResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        for state in &outcome.confirmations {
            save_state(&tx, state)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Persist one confirmation state with its evidence.
    pub fn save_confirmation(&self, state: &ConfirmationState) -> DbResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        save_state(&tx, state)?;
        tx.commit()?;
        Ok(())
    }

    /// Evidence for one (substance, condition) pair, oldest first.
    pub fn load_evidence(&self, key: &ConditionKey) -> DbResult<Vec<EvidenceRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT document_id, confidence, recorded_at
            FROM evidence_records
            WHERE substance = ?1 AND condition = ?2
            ORDER BY rowid
            "#,
        )?;
        let rows = stmt.query_map(params![key.substance, key.condition], |row| {
            Ok(EvidenceRecord {
                document_id: row.get(0)?,
                confidence: row.get(1)?,
                recorded_at: row.get(2)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Load one confirmation state with its evidence.
    pub fn load_confirmation(&self, key: &ConditionKey) -> DbResult<Option<ConfirmationState>> {
        let row = self
            .conn
            .query_row(
                &format!("{} WHERE substance = ?1 AND condition = ?2", SELECT_STATE),
                params![key.substance, key.condition],
                StateRow::from_row,
            )
            .optional()?;

        match row {
            Some(row) => {
                let evidence = self.load_evidence(key)?;
                Ok(Some(row.into_state(evidence)?))
            }
            None => Ok(None),
        }
    }

    /// All confirmation states for a substance, by condition.
    pub fn load_confirmations(&self, substance: &str) -> DbResult<Vec<ConfirmationState>> {
        let substance = crate::models::normalize_text(substance);
        let mut stmt = self
            .conn
            .prepare(&format!("{} WHERE substance = ?1 ORDER BY condition", SELECT_STATE))?;
        let rows = stmt.query_map([&substance], StateRow::from_row)?;

        let mut state_rows = Vec::new();
        for row in rows {
            state_rows.push(row?);
        }

        let mut states = Vec::new();
        for row in state_rows {
            let key = ConditionKey {
                substance: row.substance.clone(),
                condition: row.condition.clone(),
            };
            let evidence = self.load_evidence(&key)?;
            states.push(row.into_state(evidence)?);
        }
        Ok(states)
    }
}

const SELECT_STATE: &str = r#"
    SELECT substance, condition, display, status, aggregate_confidence,
           documents_consumed, attempts, failed_attempts, trigger, exhaustion, cancelled
    FROM confirmation_states
"#;

fn save_state(conn: &rusqlite::Connection, state: &ConfirmationState) -> DbResult<()> {
    let trigger = state.trigger.as_ref().map(serde_json::to_string).transpose()?;
    let exhaustion = state.exhaustion.as_ref().map(serde_json::to_string).transpose()?;

    // A confirmed row is final. An exhausted row only yields to a later
    // terminal state, whose counters match the evidence it adds.
    conn.execute(
        r#"
        INSERT INTO confirmation_states (
            substance, condition, display, status, aggregate_confidence,
            documents_consumed, attempts, failed_attempts, trigger, exhaustion, cancelled, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, datetime('now'))
        ON CONFLICT(substance, condition) DO UPDATE SET
            display = excluded.display,
            status = excluded.status,
            aggregate_confidence = excluded.aggregate_confidence,
            documents_consumed = excluded.documents_consumed,
            attempts = excluded.attempts,
            failed_attempts = excluded.failed_attempts,
            trigger = excluded.trigger,
            exhaustion = excluded.exhaustion,
            cancelled = excluded.cancelled,
            updated_at = datetime('now')
        WHERE confirmation_states.status = 'pending'
           OR (confirmation_states.status = 'exhausted' AND excluded.status != 'pending')
        "#,
        params![
            state.key.substance,
            state.key.condition,
            state.condition,
            status_to_string(&state.status),
            state.aggregate_confidence,
            state.documents_consumed as i64,
            state.attempts as i64,
            state.failed_attempts as i64,
            trigger,
            exhaustion,
            state.cancelled,
        ],
    )?;

    for record in &state.evidence {
        conn.execute(
            r#"
            INSERT OR IGNORE INTO evidence_records
                (substance, condition, document_id, confidence, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                state.key.substance,
                state.key.condition,
                record.document_id,
                record.confidence,
                record.recorded_at,
            ],
        )?;
    }
    Ok(())
}

/// Internal row type for database mapping.
struct StateRow {
    substance: String,
    condition: String,
    display: String,
    status: String,
    aggregate_confidence: f64,
    documents_consumed: i64,
    attempts: i64,
    failed_attempts: i64,
    trigger: Option<String>,
    exhaustion: Option<String>,
    cancelled: bool,
}

impl StateRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(StateRow {
            substance: row.get(0)?,
            condition: row.get(1)?,
            display: row.get(2)?,
            status: row.get(3)?,
            aggregate_confidence: row.get(4)?,
            documents_consumed: row.get(5)?,
            attempts: row.get(6)?,
            failed_attempts: row.get(7)?,
            trigger: row.get(8)?,
            exhaustion: row.get(9)?,
            cancelled: row.get(10)?,
        })
    }

    fn into_state(self, evidence: Vec<EvidenceRecord>) -> DbResult<ConfirmationState> {
        Ok(ConfirmationState {
            key: ConditionKey {
                substance: self.substance,
                condition: self.condition,
            },
            condition: self.display,
            status: string_to_status(&self.status)?,
            evidence,
            aggregate_confidence: self.aggregate_confidence,
            documents_consumed: self.documents_consumed as usize,
            attempts: self.attempts as usize,
            failed_attempts: self.failed_attempts as usize,
            consecutive_failures: 0,
            trigger: self.trigger.map(|t| serde_json::from_str(&t)).transpose()?,
            exhaustion: self.exhaustion.map(|e| serde_json::from_str(&e)).transpose()?,
            cancelled: self.cancelled,
        })
    }
}

fn status_to_string(status: &ConfirmationStatus) -> &'static str {
    match status {
        ConfirmationStatus::Pending => "pending",
        ConfirmationStatus::Confirmed => "confirmed",
        ConfirmationStatus::Exhausted => "exhausted",
    }
}

fn string_to_status(s: &str) -> Result<ConfirmationStatus, DbError> {
    match s {
        "pending" => Ok(ConfirmationStatus::Pending),
        "confirmed" => Ok(ConfirmationStatus::Confirmed),
        "exhausted" => Ok(ConfirmationStatus::Exhausted),
        _ => Err(DbError::Constraint(format!("Unknown confirmation status: {}", s))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Aggregation, ConfirmationTrigger, ExhaustionReason};

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn confirmed_state() -> ConfirmationState {
        let mut state = ConfirmationState::new(ConditionKey::new("Levothyroxine", "Hypothyroidism"), "Hypothyroidism");
        state.record_evidence(EvidenceRecord::new("pmid-1", 0.9), Aggregation::Mean);
        state.record_evidence(EvidenceRecord::new("pmid-2", 0.7), Aggregation::Mean);
        state.confirm(ConfirmationTrigger::ConfidenceThreshold);
        state
    }

    #[test]
    fn test_save_and_load_confirmation() {
        let db = setup_db();
        let state = confirmed_state();
        db.save_confirmation(&state).unwrap();

        let loaded = db.load_confirmation(&state.key).unwrap().unwrap();
        assert_eq!(loaded.status, ConfirmationStatus::Confirmed);
        assert_eq!(loaded.trigger, Some(ConfirmationTrigger::ConfidenceThreshold));
        assert_eq!(loaded.evidence, state.evidence);
        assert_eq!(loaded.condition, "Hypothyroidism");
        assert_eq!(loaded.documents_consumed, 2);
    }

    #[test]
    fn test_evidence_idempotent() {
        let db = setup_db();
        let state = confirmed_state();
        db.save_confirmation(&state).unwrap();
        db.save_confirmation(&state).unwrap();

        assert_eq!(db.load_evidence(&state.key).unwrap().len(), 2);
    }

    #[test]
    fn test_terminal_state_not_reopened() {
        let db = setup_db();
        let state = confirmed_state();
        db.save_confirmation(&state).unwrap();

        let mut later = ConfirmationState::new(state.key.clone(), "Hypothyroidism");
        later.exhaust(ExhaustionReason::BudgetConsumed);
        db.save_confirmation(&later).unwrap();

        let loaded = db.load_confirmation(&state.key).unwrap().unwrap();
        assert_eq!(loaded.status, ConfirmationStatus::Confirmed);
        // Evidence from the first save survives.
        assert_eq!(loaded.evidence.len(), 2);
    }

    #[test]
    fn test_exhausted_row_takes_later_confirmation() {
        let db = setup_db();
        let key = ConditionKey::new("Levothyroxine", "Hypothyroidism");

        // A small-budget run gives up after one weak document.
        let mut early = ConfirmationState::new(key.clone(), "Hypothyroidism");
        early.record_evidence(EvidenceRecord::new("pmid-0", 0.2), Aggregation::Mean);
        early.exhaust(ExhaustionReason::BudgetConsumed);
        db.save_confirmation(&early).unwrap();

        let later = confirmed_state();
        db.save_confirmation(&later).unwrap();

        let loaded = db.load_confirmation(&key).unwrap().unwrap();
        assert_eq!(loaded.status, ConfirmationStatus::Confirmed);
        assert_eq!(loaded.exhaustion, None);
        assert_eq!(loaded.trigger, Some(ConfirmationTrigger::ConfidenceThreshold));
        assert!((loaded.aggregate_confidence - later.aggregate_confidence).abs() < 1e-9);
        assert_eq!(loaded.documents_consumed, 2);
        assert_eq!(loaded.evidence.len(), 3);
    }

    #[test]
    fn test_exhausted_row_not_reopened_by_pending() {
        let db = setup_db();
        let key = ConditionKey::new("Levothyroxine", "Hypothyroidism");
        let mut early = ConfirmationState::new(key.clone(), "Hypothyroidism");
        early.exhaust(ExhaustionReason::DocumentsExhausted);
        db.save_confirmation(&early).unwrap();

        let mut interrupted = ConfirmationState::new(key.clone(), "Hypothyroidism");
        interrupted.cancelled = true;
        db.save_confirmation(&interrupted).unwrap();

        let loaded = db.load_confirmation(&key).unwrap().unwrap();
        assert_eq!(loaded.status, ConfirmationStatus::Exhausted);
        assert_eq!(loaded.exhaustion, Some(ExhaustionReason::DocumentsExhausted));
        assert!(!loaded.cancelled);
    }

    #[test]
    fn test_structured_key_no_collision() {
        let db = setup_db();
        let a = ConfirmationState::new(ConditionKey::new("drug||x", "y"), "y");
        let b = ConfirmationState::new(ConditionKey::new("drug", "x||y"), "x||y");
        db.save_confirmation(&a).unwrap();
        db.save_confirmation(&b).unwrap();

        assert_eq!(db.load_confirmations("drug||x").unwrap().len(), 1);
        assert_eq!(db.load_confirmations("drug").unwrap().len(), 1);
    }

    #[test]
    fn test_load_confirmations_normalizes_substance() {
        let db = setup_db();
        db.save_confirmation(&confirmed_state()).unwrap();
        assert_eq!(db.load_confirmations("  LEVOTHYROXINE ").unwrap().len(), 1);
    }
}
