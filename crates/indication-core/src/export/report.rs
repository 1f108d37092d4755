//! Per-substance report.

use serde::{Deserialize, Serialize};

use super::escape_csv;
use crate::accumulator::AccumulationOutcome;
use crate::models::{
    ConfirmationStatus, ConfirmationTrigger, EvidenceRecord, Granularity, RecoveryReport,
};

/// Phase of a substance run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Identification,
    Confirmation,
    Recovery,
}

/// Why a phase is incomplete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteReason {
    Cancelled,
    InferenceUnavailable,
    ConfigurationError,
    SourceUnavailable,
    NoGroundTruth,
    MalformedDocuments,
    FailedDocuments,
}

/// Annotation naming an incomplete phase and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseNote {
    pub phase: Phase,
    pub reason: NoteReason,
    pub detail: String,
}

impl PhaseNote {
    pub fn new(phase: Phase, reason: NoteReason, detail: impl Into<String>) -> Self {
        Self {
            phase,
            reason,
            detail: detail.into(),
        }
    }
}

/// Counts from the accumulation phases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulationSummary {
    pub scanned: usize,
    pub malformed: usize,
    pub failed_documents: usize,
    pub identified: usize,
    pub confirmed: usize,
    pub exhausted: usize,
    pub pending: usize,
    pub inference_unavailable: usize,
}

impl AccumulationSummary {
    pub fn from_outcome(outcome: &AccumulationOutcome) -> Self {
        Self {
            scanned: outcome.identification.scanned,
            malformed: outcome.identification.malformed.len(),
            failed_documents: outcome.identification.failed.len(),
            identified: outcome.identification.conditions.len(),
            confirmed: outcome.confirmed().len(),
            exhausted: outcome.exhausted().len(),
            pending: outcome.pending().len(),
            inference_unavailable: outcome.inference_unavailable().len(),
        }
    }
}

/// A confirmed condition with its supporting evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedCondition {
    pub condition: String,
    pub aggregate_confidence: f64,
    pub trigger: Option<ConfirmationTrigger>,
    pub evidence: Vec<EvidenceRecord>,
}

/// Everything known about one substance after a run, partial or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubstanceReport {
    pub run_id: String,
    pub substance: String,
    pub generated_at: String,
    pub summary: Option<AccumulationSummary>,
    pub confirmed: Vec<ConfirmedCondition>,
    /// Full accumulation outcome, every condition state included
    pub accumulation: Option<AccumulationOutcome>,
    pub recovery: Option<RecoveryReport>,
    pub notes: Vec<PhaseNote>,
}

impl SubstanceReport {
    pub fn new(run_id: impl Into<String>, substance: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            substance: substance.into(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            summary: None,
            confirmed: Vec::new(),
            accumulation: None,
            recovery: None,
            notes: Vec::new(),
        }
    }

    /// Attach an accumulation outcome and derive its phase notes.
    pub fn with_outcome(mut self, outcome: AccumulationOutcome) -> Self {
        let summary = AccumulationSummary::from_outcome(&outcome);

        if summary.malformed > 0 {
            self.note(
                Phase::Identification,
                NoteReason::MalformedDocuments,
                format!("{} document(s) skipped for a missing title or abstract", summary.malformed),
            );
        }
        if summary.failed_documents > 0 {
            self.note(
                Phase::Identification,
                NoteReason::FailedDocuments,
                format!("{} document(s) could not be analysed", summary.failed_documents),
            );
        }
        if summary.inference_unavailable > 0 {
            self.note(
                Phase::Confirmation,
                NoteReason::InferenceUnavailable,
                format!("{} condition(s) abandoned after repeated inference failures", summary.inference_unavailable),
            );
        }
        if outcome.cancelled {
            let phase = if outcome.identification.cancelled {
                Phase::Identification
            } else {
                Phase::Confirmation
            };
            self.note(
                phase,
                NoteReason::Cancelled,
                format!("{} condition(s) left pending", summary.pending),
            );
        }

        self.confirmed = outcome
            .confirmations
            .iter()
            .filter(|s| s.status == ConfirmationStatus::Confirmed)
            .map(|s| ConfirmedCondition {
                condition: s.condition.clone(),
                aggregate_confidence: s.aggregate_confidence,
                trigger: s.trigger,
                evidence: s.evidence.clone(),
            })
            .collect();
        self.summary = Some(summary);
        self.accumulation = Some(outcome);
        self
    }

    /// Attach a recovery report; an empty reference set is noted.
    pub fn with_recovery(mut self, recovery: RecoveryReport) -> Self {
        if recovery.no_ground_truth || recovery.results.iter().any(|r| r.no_ground_truth) {
            self.note(
                Phase::Recovery,
                NoteReason::NoGroundTruth,
                "reference set is empty; recovery rates reported as 0.0",
            );
        }
        self.recovery = Some(recovery);
        self
    }

    pub fn note(&mut self, phase: Phase, reason: NoteReason, detail: impl Into<String>) {
        self.notes.push(PhaseNote::new(phase, reason, detail));
    }

    pub fn has_note(&self, reason: NoteReason) -> bool {
        self.notes.iter().any(|n| n.reason == reason)
    }

    /// The substance could not be processed at all.
    pub fn is_failed(&self) -> bool {
        self.has_note(NoteReason::ConfigurationError) || self.has_note(NoteReason::SourceUnavailable)
    }

    /// No phase was left incomplete.
    pub fn is_complete(&self) -> bool {
        self.notes.is_empty()
    }

    /// Export to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// CSV rows of recovery rates, one per (method, granularity), without header.
    pub fn recovery_rows(&self) -> String {
        let mut csv = String::new();
        let Some(recovery) = &self.recovery else {
            return csv;
        };
        for result in &recovery.results {
            for g in Granularity::ALL {
                let at = result.at(g);
                csv.push_str(&format!(
                    "{},{},{},{},{},{},{:.4},{}\n",
                    escape_csv(&self.substance),
                    escape_csv(&result.method),
                    g.as_str(),
                    result.reference_size,
                    result.extracted_size,
                    at.recovered_count(),
                    at.recovery_rate,
                    result.no_ground_truth,
                ));
            }
        }
        csv
    }
}

/// Header matching [`SubstanceReport::recovery_rows`].
pub const RECOVERY_CSV_HEADER: &str =
    "substance,method,granularity,reference_size,extracted_size,recovered,recovery_rate,no_ground_truth\n";

/// Export recovery rates of many reports to CSV.
pub fn recovery_csv(reports: &[SubstanceReport]) -> String {
    let mut csv = String::from(RECOVERY_CSV_HEADER);
    for report in reports {
        csv.push_str(&report.recovery_rows());
    }
    csv
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::IdentificationReport;
    use crate::models::{
        Aggregation, ConditionKey, ConfirmationState, ExhaustionReason, GranularityResult, RecoveryResult,
    };

    fn outcome() -> AccumulationOutcome {
        let mut confirmed = ConfirmationState::new(ConditionKey::new("aspirin", "stroke"), "stroke");
        confirmed.record_evidence(EvidenceRecord::new("d1", 0.9), Aggregation::Mean);
        confirmed.confirm(ConfirmationTrigger::ConfidenceThreshold);

        let mut unavailable = ConfirmationState::new(ConditionKey::new("aspirin", "gout"), "gout");
        unavailable.record_failure();
        unavailable.exhaust(ExhaustionReason::InferenceUnavailable);

        AccumulationOutcome {
            substance: "aspirin".into(),
            method: "literature".into(),
            identification: IdentificationReport {
                scanned: 3,
                malformed: vec!["d3".into()],
                ..IdentificationReport::default()
            },
            confirmations: vec![confirmed, unavailable],
            cancelled: false,
            started_at: chrono::Utc::now(),
            finished_at: chrono::Utc::now(),
        }
    }

    fn recovery(no_ground_truth: bool) -> RecoveryReport {
        let mut exact = GranularityResult::empty(Granularity::ExactText);
        exact.recovery_rate = 0.5;
        RecoveryReport {
            substance: Some("aspirin".into()),
            no_ground_truth,
            results: vec![RecoveryResult {
                substance: Some("aspirin".into()),
                method: "literature".into(),
                reference_size: 2,
                extracted_size: 1,
                no_ground_truth,
                exact_text: exact,
                concept: GranularityResult::empty(Granularity::Concept),
                chapter: GranularityResult::empty(Granularity::Chapter),
                near_misses: vec![],
            }],
            contributions: vec![],
        }
    }

    #[test]
    fn test_outcome_notes() {
        let report = SubstanceReport::new("run-1", "aspirin").with_outcome(outcome());

        assert_eq!(report.confirmed.len(), 1);
        assert_eq!(report.confirmed[0].condition, "stroke");
        assert!(report.has_note(NoteReason::MalformedDocuments));
        assert!(report.has_note(NoteReason::InferenceUnavailable));
        assert!(!report.has_note(NoteReason::Cancelled));
        assert!(!report.is_failed());
        let summary = report.summary.as_ref().unwrap();
        assert_eq!(summary.confirmed, 1);
        assert_eq!(summary.exhausted, 1);
    }

    #[test]
    fn test_no_ground_truth_note() {
        let report = SubstanceReport::new("run-1", "aspirin").with_recovery(recovery(true));
        assert!(report.has_note(NoteReason::NoGroundTruth));
        assert!(!SubstanceReport::new("r", "s").with_recovery(recovery(false)).has_note(NoteReason::NoGroundTruth));
    }

    #[test]
    fn test_no_ground_truth_note_without_methods() {
        let mut empty = recovery(true);
        empty.results.clear();
        let report = SubstanceReport::new("run-1", "aspirin").with_recovery(empty);
        assert!(report.has_note(NoteReason::NoGroundTruth));
    }

    #[test]
    fn test_recovery_csv() {
        let report = SubstanceReport::new("run-1", "aspirin, buffered").with_recovery(recovery(false));
        let csv = recovery_csv(&[report]);
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 4); // Header + 3 granularities
        assert_eq!(lines[1], "\"aspirin, buffered\",literature,exact_text,2,1,0,0.5000,false");
        assert!(lines[3].contains(",chapter,"));
    }

    #[test]
    fn test_json_round_trip() {
        let report = SubstanceReport::new("run-1", "aspirin")
            .with_outcome(outcome())
            .with_recovery(recovery(false));
        let json = report.to_json().unwrap();
        let back: SubstanceReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.notes, report.notes);
        assert_eq!(back.confirmed[0].evidence[0].document_id, "d1");
        assert_eq!(back.accumulation.unwrap().confirmations.len(), 2);
    }
}
