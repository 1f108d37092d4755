//! Confirmation phase: accumulate per-document evidence for one condition
//! until a threshold is met or the budget runs out.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use indication_llm::{InferenceError, InferenceService};
use tracing::{debug, warn};

use super::cancel::CancellationToken;
use super::gateway::InferenceGateway;
use super::source::DocumentSource;
use crate::config::ConfirmationConfig;
use crate::models::{
    ConditionKey, ConfirmationState, Document, EvidenceRecord, ExhaustionReason, IdentifiedCondition,
};

/// Drive one condition to a terminal state (or leave it pending on cancel).
///
/// Documents from identification are consumed first, then co-occurring
/// documents fetched from the source when top-up is allowed. No document is
/// scored twice for the same condition.
pub async fn confirm_condition<S, D>(
    gateway: Arc<InferenceGateway<S>>,
    source: Arc<D>,
    substance: String,
    condition: IdentifiedCondition,
    identified: Vec<Document>,
    config: ConfirmationConfig,
    cancel: CancellationToken,
) -> ConfirmationState
where
    S: InferenceService,
    D: DocumentSource,
{
    let rule = config.rule();
    let attempt_budget = config.effective_attempt_budget();
    let key = ConditionKey::new(&substance, &condition.key);
    let mut state = ConfirmationState::new(key, condition.text.clone());

    let mut queue: VecDeque<Document> = identified.into();
    let mut queued: HashSet<String> = queue.iter().map(|d| d.id.clone()).collect();
    let mut used: HashSet<String> = HashSet::new();
    let mut topup_offset = 0;
    let mut topup_done = !config.allow_top_up;

    loop {
        if cancel.is_cancelled() {
            state.cancelled = true;
            break;
        }
        if state.documents_consumed >= config.budget {
            state.exhaust(ExhaustionReason::BudgetConsumed);
            break;
        }
        if state.attempts >= attempt_budget {
            state.exhaust(ExhaustionReason::AttemptBudget);
            break;
        }

        let Some(doc) = queue.pop_front() else {
            if topup_done {
                state.exhaust(ExhaustionReason::DocumentsExhausted);
                break;
            }
            // Step 1: Top up with co-occurring documents
            match source
                .fetch_cooccurring(&substance, &condition.text, topup_offset, config.budget.max(1))
                .await
            {
                Ok(page) if page.is_empty() => topup_done = true,
                Ok(page) => {
                    topup_offset += page.len();
                    for doc in page {
                        if !doc.is_well_formed() {
                            debug!(document = %doc.id, "Skipping malformed top-up document");
                        } else if !used.contains(&doc.id) && queued.insert(doc.id.clone()) {
                            queue.push_back(doc);
                        }
                    }
                }
                Err(e) => {
                    warn!(substance = %substance, condition = %condition.text, error = %e, "Top-up fetch failed");
                    topup_done = true;
                }
            }
            continue;
        };

        if !used.insert(doc.id.clone()) {
            continue;
        }

        // Step 2: Score the document
        match gateway
            .verify(&substance, &condition.text, &doc.text(), &cancel)
            .await
        {
            Ok(score) => {
                state.record_evidence(EvidenceRecord::new(doc.id, score), rule.aggregation);
                // Step 3: Stop at the first threshold met
                if let Some(trigger) = state.threshold_met(&rule) {
                    state.confirm(trigger);
                    break;
                }
            }
            Err(InferenceError::Cancelled) => {
                state.cancelled = true;
                break;
            }
            Err(e) => {
                state.record_failure();
                debug!(document = %doc.id, error = %e, failures = state.consecutive_failures, "Verify failed");
                if state.consecutive_failures >= config.max_consecutive_failures {
                    warn!(substance = %substance, condition = %condition.text, "Inference unavailable, giving up on condition");
                    state.exhaust(ExhaustionReason::InferenceUnavailable);
                    break;
                }
            }
        }
    }

    debug!(
        substance = %substance,
        condition = %condition.text,
        status = ?state.status,
        consumed = state.documents_consumed,
        aggregate = state.aggregate_confidence,
        "Confirmation finished"
    );
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::source::VecDocumentSource;
    use crate::config::GatewayConfig;
    use crate::models::{CandidateCondition, ConfirmationStatus, ConfirmationTrigger};
    use indication_llm::{Identification, ScriptedInference};
    use proptest::prelude::*;

    fn condition(text: &str, documents: &[&str]) -> IdentifiedCondition {
        IdentifiedCondition {
            text: text.to_string(),
            key: text.to_lowercase(),
            documents: documents.iter().map(|d| d.to_string()).collect(),
            mentions: documents
                .iter()
                .map(|d| CandidateCondition::new(text, *d, "test"))
                .collect(),
        }
    }

    fn docs(n: usize, body: &str) -> Vec<Document> {
        (0..n)
            .map(|i| Document::new(format!("d{i}"), "Aspirin", body))
            .collect()
    }

    fn config(t: Option<f64>, k: Option<usize>) -> ConfirmationConfig {
        ConfirmationConfig {
            budget: 10,
            confidence_threshold: t,
            min_evidence: k,
            ..ConfirmationConfig::default()
        }
    }

    fn scored(score: f64) -> ScriptedInference {
        ScriptedInference::new(|_, _| Ok(Identification::NoIndication), move |_, _, _| Ok(score))
    }

    async fn run(
        service: ScriptedInference,
        source: VecDocumentSource,
        identified: Vec<Document>,
        config: ConfirmationConfig,
    ) -> (ConfirmationState, usize) {
        let gateway = Arc::new(InferenceGateway::new(service, &GatewayConfig::default()));
        let ids: Vec<&str> = identified.iter().map(|d| d.id.as_str()).collect();
        let state = confirm_condition(
            Arc::clone(&gateway),
            Arc::new(source),
            "aspirin".to_string(),
            condition("stroke", &ids),
            identified.clone(),
            config,
            CancellationToken::new(),
        )
        .await;
        (state, gateway.service().verify_calls())
    }

    #[tokio::test]
    async fn test_confirms_on_confidence() {
        let (state, calls) = run(scored(0.9), VecDocumentSource::new(), docs(3, "stroke"), config(Some(0.8), None)).await;
        assert_eq!(state.status, ConfirmationStatus::Confirmed);
        assert_eq!(state.trigger, Some(ConfirmationTrigger::ConfidenceThreshold));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_confirms_on_count() {
        let (state, calls) = run(scored(0.6), VecDocumentSource::new(), docs(5, "stroke"), config(Some(0.8), Some(3))).await;
        assert_eq!(state.status, ConfirmationStatus::Confirmed);
        assert_eq!(state.trigger, Some(ConfirmationTrigger::EvidenceCount));
        assert_eq!(state.documents_consumed, 3);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_budget_caps_calls() {
        let source = VecDocumentSource::new().with_documents("aspirin", docs(40, "stroke"));
        let (state, calls) = run(scored(0.1), source, docs(2, "stroke"), config(Some(0.8), Some(3))).await;
        assert_eq!(state.status, ConfirmationStatus::Exhausted);
        assert_eq!(state.exhaustion, Some(ExhaustionReason::BudgetConsumed));
        assert_eq!(state.documents_consumed, 10);
        assert_eq!(calls, 10);
    }

    #[tokio::test]
    async fn test_documents_exhausted() {
        let (state, _) = run(scored(0.1), VecDocumentSource::new(), docs(4, "stroke"), config(Some(0.8), Some(3))).await;
        assert_eq!(state.status, ConfirmationStatus::Exhausted);
        assert_eq!(state.exhaustion, Some(ExhaustionReason::DocumentsExhausted));
        // Every available document was consumed.
        assert_eq!(state.documents_consumed, 4);
    }

    #[tokio::test]
    async fn test_top_up_skips_used_documents() {
        // The co-occurring sequence repeats the identified documents.
        let all = docs(6, "stroke");
        let source = VecDocumentSource::new().with_documents("aspirin", all.clone());
        let (state, calls) = run(scored(0.1), source, all[..2].to_vec(), config(None, Some(10))).await;

        assert_eq!(state.exhaustion, Some(ExhaustionReason::DocumentsExhausted));
        assert_eq!(calls, 6);
        let ids: Vec<&str> = state.evidence.iter().map(|e| e.document_id.as_str()).collect();
        assert_eq!(ids, vec!["d0", "d1", "d2", "d3", "d4", "d5"]);
    }

    #[tokio::test]
    async fn test_top_up_disabled() {
        let source = VecDocumentSource::new().with_documents("aspirin", docs(6, "stroke"));
        let config = ConfirmationConfig {
            allow_top_up: false,
            ..config(Some(0.8), None)
        };
        let (state, calls) = run(scored(0.1), source, docs(2, "stroke"), config).await;
        assert_eq!(state.exhaustion, Some(ExhaustionReason::DocumentsExhausted));
        assert_eq!(calls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_service_exhausts() {
        let service = ScriptedInference::failing(InferenceError::Unavailable("down".into()));
        let (state, _) = run(service, VecDocumentSource::new(), docs(8, "stroke"), config(Some(0.8), None)).await;

        assert_eq!(state.status, ConfirmationStatus::Exhausted);
        assert!(state.inference_unavailable());
        assert_eq!(state.failed_attempts, 3);
        assert!(state.evidence.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_budget() {
        // Alternate failure and low score so consecutive failures never reach the limit.
        let seen = std::sync::atomic::AtomicUsize::new(0);
        let service = ScriptedInference::new(
            |_, _| Ok(Identification::NoIndication),
            move |_, _, _| {
                if seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst) % 2 == 0 {
                    Err(InferenceError::Rejected("bad".into()))
                } else {
                    Ok(0.1)
                }
            },
        );
        let config = ConfirmationConfig {
            attempt_budget: Some(12),
            ..config(Some(0.8), None)
        };
        let (state, calls) = run(service, VecDocumentSource::new(), docs(30, "stroke"), config).await;

        assert_eq!(state.exhaustion, Some(ExhaustionReason::AttemptBudget));
        assert_eq!(state.attempts, 12);
        assert_eq!(calls, 12);
        assert_eq!(state.documents_consumed, 6);
    }

    #[tokio::test]
    async fn test_cancel_leaves_pending() {
        let gateway = Arc::new(InferenceGateway::new(scored(0.1), &GatewayConfig::default()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let state = confirm_condition(
            gateway,
            Arc::new(VecDocumentSource::new()),
            "aspirin".into(),
            condition("stroke", &["d0"]),
            docs(1, "stroke"),
            config(Some(0.8), None),
            cancel,
        )
        .await;

        assert_eq!(state.status, ConfirmationStatus::Pending);
        assert!(state.cancelled);
    }

    /// Documents whose abstract is their verify score.
    fn scored_docs(scores: &[f64]) -> Vec<Document> {
        scores
            .iter()
            .enumerate()
            .map(|(i, score)| Document::new(format!("d{i}"), "Aspirin", score.to_string()))
            .collect()
    }

    fn score_from_text() -> ScriptedInference {
        ScriptedInference::new(
            |_, _| Ok(Identification::NoIndication),
            |_, _, text| {
                text.rsplit("\n\n")
                    .next()
                    .and_then(|s| s.parse::<f64>().ok())
                    .ok_or_else(|| InferenceError::Rejected(text.to_string()))
            },
        )
    }

    fn confirm_blocking(scores: &[f64], budget: usize, t: Option<f64>, k: Option<usize>) -> ConfirmationState {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let config = ConfirmationConfig {
            budget,
            ..config(t, k)
        };
        let (state, _) = runtime.block_on(run(score_from_text(), VecDocumentSource::new(), scored_docs(scores), config));
        state
    }

    /// Shortest prefix of the scores that meets either threshold.
    fn first_confirming_prefix(scores: &[f64], t: Option<f64>, k: Option<usize>) -> Option<usize> {
        (1..=scores.len()).find(|&m| {
            let prefix = &scores[..m];
            let mean = prefix.iter().sum::<f64>() / m as f64;
            let supporting = prefix.iter().filter(|s| **s >= 0.5).count();
            t.is_some_and(|t| mean >= t) || k.is_some_and(|k| supporting >= k)
        })
    }

    fn document_ids(state: &ConfirmationState) -> Vec<String> {
        state.evidence.iter().map(|e| e.document_id.clone()).collect()
    }

    fn score() -> impl Strategy<Value = f64> {
        (0u8..=10).prop_map(|x| f64::from(x) / 10.0)
    }

    fn thresholds() -> impl Strategy<Value = (Option<f64>, Option<usize>)> {
        (prop::option::of((1u8..=10).prop_map(|x| f64::from(x) / 10.0)), prop::option::of(1usize..6))
            .prop_filter("one threshold enabled", |(t, k)| t.is_some() || k.is_some())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_confirmed_exactly_when_threshold_met(
            scores in prop::collection::vec(score(), 0..12),
            budget in 1usize..12,
            (t, k) in thresholds(),
        ) {
            let state = confirm_blocking(&scores, budget, t, k);
            let reachable = &scores[..scores.len().min(budget)];

            match first_confirming_prefix(reachable, t, k) {
                Some(m) => {
                    prop_assert_eq!(state.status, ConfirmationStatus::Confirmed);
                    prop_assert_eq!(state.documents_consumed, m);
                }
                None => {
                    prop_assert_eq!(state.status, ConfirmationStatus::Exhausted);
                    prop_assert_eq!(state.documents_consumed, reachable.len());
                }
            }
            prop_assert!(state.documents_consumed <= budget);
        }

        #[test]
        fn prop_larger_budget_keeps_evidence_and_confirmation(
            scores in prop::collection::vec(score(), 0..12),
            budget in 1usize..8,
            extra in 0usize..6,
            (t, k) in thresholds(),
        ) {
            let small = confirm_blocking(&scores, budget, t, k);
            let large = confirm_blocking(&scores, budget + extra, t, k);

            let small_ids = document_ids(&small);
            let large_ids = document_ids(&large);
            prop_assert!(large_ids.len() >= small_ids.len());
            prop_assert_eq!(&large_ids[..small_ids.len()], &small_ids[..]);
            if small.status == ConfirmationStatus::Confirmed {
                prop_assert_eq!(large.status, ConfirmationStatus::Confirmed);
                prop_assert_eq!(large_ids, small_ids);
            }
        }
    }
}
