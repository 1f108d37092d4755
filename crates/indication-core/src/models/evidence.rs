//! Evidence records and per-condition confirmation state.

use serde::{Deserialize, Serialize};

use super::condition::ConditionKey;

/// One document-backed data point for a (substance, condition) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceRecord {
    /// Supporting document
    pub document_id: String,
    /// Relationship confidence from the verify call (0.0 - 1.0)
    pub confidence: f64,
    /// When the record was created (RFC 3339)
    pub recorded_at: String,
}

impl EvidenceRecord {
    pub fn new(document_id: impl Into<String>, confidence: f64) -> Self {
        Self {
            document_id: document_id.into(),
            confidence,
            recorded_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// How per-document scores combine into the aggregate confidence.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    #[default]
    Mean,
    Max,
}

impl Aggregation {
    /// Aggregate a set of scores; empty evidence aggregates to 0.0.
    pub fn aggregate(&self, evidence: &[EvidenceRecord]) -> f64 {
        if evidence.is_empty() {
            return 0.0;
        }
        match self {
            Aggregation::Mean => {
                evidence.iter().map(|e| e.confidence).sum::<f64>() / evidence.len() as f64
            }
            Aggregation::Max => evidence
                .iter()
                .map(|e| e.confidence)
                .fold(0.0_f64, f64::max),
        }
    }
}

/// Lifecycle of a condition during confirmation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    Pending,
    Confirmed,
    Exhausted,
}

/// Which threshold confirmed a condition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationTrigger {
    ConfidenceThreshold,
    EvidenceCount,
}

/// Why a condition was exhausted without confirmation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionReason {
    /// The per-condition document budget was consumed
    BudgetConsumed,
    /// No further documents were available
    DocumentsExhausted,
    /// Too many inference attempts (successful or not) were spent
    AttemptBudget,
    /// Consecutive inference failures hit the limit
    InferenceUnavailable,
}

/// Thresholds that end confirmation for a condition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfirmationRule {
    /// Aggregate confidence threshold (T)
    pub confidence_threshold: Option<f64>,
    /// Supporting evidence count (K)
    pub min_evidence: Option<usize>,
    /// Score an evidence record needs to count towards K
    pub min_supporting_confidence: f64,
    pub aggregation: Aggregation,
}

/// Confirmation state for one (substance, condition) pair.
///
/// Once `Confirmed` or `Exhausted` the state is terminal: further records are
/// refused and the status never changes again.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfirmationState {
    pub key: ConditionKey,
    /// Display text of the condition
    pub condition: String,
    pub status: ConfirmationStatus,
    /// Accumulated evidence, append-only
    pub evidence: Vec<EvidenceRecord>,
    /// Aggregate of evidence scores
    pub aggregate_confidence: f64,
    /// Documents that produced evidence
    pub documents_consumed: usize,
    /// Verify calls issued (successful or failed)
    pub attempts: usize,
    /// Verify calls that failed after retries
    pub failed_attempts: usize,
    /// Current run of failures without a success in between
    pub consecutive_failures: usize,
    pub trigger: Option<ConfirmationTrigger>,
    pub exhaustion: Option<ExhaustionReason>,
    /// Confirmation was interrupted by cancellation while pending
    pub cancelled: bool,
}

impl ConfirmationState {
    /// Create a pending state.
    pub fn new(key: ConditionKey, condition: impl Into<String>) -> Self {
        Self {
            key,
            condition: condition.into(),
            status: ConfirmationStatus::Pending,
            evidence: Vec::new(),
            aggregate_confidence: 0.0,
            documents_consumed: 0,
            attempts: 0,
            failed_attempts: 0,
            consecutive_failures: 0,
            trigger: None,
            exhaustion: None,
            cancelled: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != ConfirmationStatus::Pending
    }

    /// Evidence records at or above the supporting score.
    pub fn supporting_count(&self, min_supporting_confidence: f64) -> usize {
        self.evidence
            .iter()
            .filter(|e| e.confidence >= min_supporting_confidence)
            .count()
    }

    /// Append a record and update the aggregate. Returns false if terminal.
    pub fn record_evidence(&mut self, record: EvidenceRecord, aggregation: Aggregation) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.evidence.push(record);
        self.documents_consumed += 1;
        self.attempts += 1;
        self.consecutive_failures = 0;
        self.aggregate_confidence = aggregation.aggregate(&self.evidence);
        true
    }

    /// Count a failed verify call. Returns false if terminal.
    pub fn record_failure(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.attempts += 1;
        self.failed_attempts += 1;
        self.consecutive_failures += 1;
        true
    }

    /// Which threshold (if any) the current evidence meets.
    pub fn threshold_met(&self, rule: &ConfirmationRule) -> Option<ConfirmationTrigger> {
        if let Some(t) = rule.confidence_threshold {
            if !self.evidence.is_empty() && self.aggregate_confidence >= t {
                return Some(ConfirmationTrigger::ConfidenceThreshold);
            }
        }
        if let Some(k) = rule.min_evidence {
            if self.supporting_count(rule.min_supporting_confidence) >= k {
                return Some(ConfirmationTrigger::EvidenceCount);
            }
        }
        None
    }

    /// Move to `Confirmed`. No effect on a terminal state.
    pub fn confirm(&mut self, trigger: ConfirmationTrigger) {
        if !self.is_terminal() {
            self.status = ConfirmationStatus::Confirmed;
            self.trigger = Some(trigger);
        }
    }

    /// Move to `Exhausted`. No effect on a terminal state.
    pub fn exhaust(&mut self, reason: ExhaustionReason) {
        if !self.is_terminal() {
            self.status = ConfirmationStatus::Exhausted;
            self.exhaustion = Some(reason);
        }
    }

    /// Whether exhaustion was caused by the inference service being unreachable.
    pub fn inference_unavailable(&self) -> bool {
        self.exhaustion == Some(ExhaustionReason::InferenceUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(t: Option<f64>, k: Option<usize>) -> ConfirmationRule {
        ConfirmationRule {
            confidence_threshold: t,
            min_evidence: k,
            min_supporting_confidence: 0.5,
            aggregation: Aggregation::Mean,
        }
    }

    fn state() -> ConfirmationState {
        ConfirmationState::new(ConditionKey::new("aspirin", "stroke"), "stroke")
    }

    #[test]
    fn test_aggregation() {
        let records = vec![EvidenceRecord::new("1", 0.2), EvidenceRecord::new("2", 0.8)];
        assert!((Aggregation::Mean.aggregate(&records) - 0.5).abs() < 1e-9);
        assert_eq!(Aggregation::Max.aggregate(&records), 0.8);
        assert_eq!(Aggregation::Mean.aggregate(&[]), 0.0);
    }

    #[test]
    fn test_threshold_confidence() {
        let mut s = state();
        s.record_evidence(EvidenceRecord::new("1", 0.9), Aggregation::Mean);
        assert_eq!(
            s.threshold_met(&rule(Some(0.8), None)),
            Some(ConfirmationTrigger::ConfidenceThreshold)
        );
        assert_eq!(s.threshold_met(&rule(Some(0.95), None)), None);
    }

    #[test]
    fn test_threshold_count_ignores_weak_evidence() {
        let mut s = state();
        for (i, score) in [0.9, 0.1, 0.6].iter().enumerate() {
            s.record_evidence(EvidenceRecord::new(i.to_string(), *score), Aggregation::Mean);
        }
        assert_eq!(s.supporting_count(0.5), 2);
        assert_eq!(s.threshold_met(&rule(None, Some(3))), None);
        assert_eq!(
            s.threshold_met(&rule(None, Some(2))),
            Some(ConfirmationTrigger::EvidenceCount)
        );
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut s = state();
        s.record_evidence(EvidenceRecord::new("1", 0.9), Aggregation::Mean);
        s.confirm(ConfirmationTrigger::ConfidenceThreshold);

        assert!(!s.record_evidence(EvidenceRecord::new("2", 0.1), Aggregation::Mean));
        assert!(!s.record_failure());
        s.exhaust(ExhaustionReason::BudgetConsumed);

        assert_eq!(s.status, ConfirmationStatus::Confirmed);
        assert_eq!(s.evidence.len(), 1);
        assert_eq!(s.exhaustion, None);
    }

    #[test]
    fn test_failures_reset_on_success() {
        let mut s = state();
        s.record_failure();
        s.record_failure();
        assert_eq!(s.consecutive_failures, 2);
        s.record_evidence(EvidenceRecord::new("1", 0.4), Aggregation::Mean);
        assert_eq!(s.consecutive_failures, 0);
        assert_eq!(s.attempts, 3);
        assert_eq!(s.failed_attempts, 2);
        assert_eq!(s.documents_consumed, 1);
    }
}
