//! Identification phase: scan a fixed-size document sample and collect the
//! unique candidate conditions.

use std::collections::HashMap;
use std::sync::Arc;

use indication_llm::{Identification, InferenceError, InferenceService};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::cancel::CancellationToken;
use super::gateway::InferenceGateway;
use super::source::{DocumentSource, SourceResult};
use crate::models::{normalize_text, CandidateCondition, Document, IdentifiedCondition};

/// What the identification phase saw.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IdentificationReport {
    /// Documents taken from the sample, malformed ones included
    pub scanned: usize,
    /// Documents skipped for a missing title or abstract
    pub malformed: Vec<String>,
    /// Documents whose identify call failed after retries
    pub failed: Vec<String>,
    /// Documents for which the service found no indication
    pub no_indication: usize,
    /// Unique conditions, in first-seen order
    pub conditions: Vec<IdentifiedCondition>,
    /// The phase stopped early on cancellation
    pub cancelled: bool,
}

/// Identification report plus the scanned documents, which confirmation
/// consumes first.
#[derive(Debug, Clone, Default)]
pub struct IdentificationPhase {
    pub report: IdentificationReport,
    pub documents: HashMap<String, Document>,
}

impl IdentificationPhase {
    /// Scanned documents mentioning a condition, in scan order.
    pub fn documents_for(&self, condition: &IdentifiedCondition) -> Vec<Document> {
        condition
            .documents
            .iter()
            .filter_map(|id| self.documents.get(id).cloned())
            .collect()
    }
}

/// Take the first `sample_size` documents of the substance's sequence.
async fn fetch_sample<D: DocumentSource>(
    source: &D,
    substance: &str,
    sample_size: usize,
) -> SourceResult<Vec<Document>> {
    let mut sample = Vec::with_capacity(sample_size);
    while sample.len() < sample_size {
        let page = source
            .fetch(substance, sample.len(), sample_size - sample.len())
            .await?;
        if page.is_empty() {
            break;
        }
        sample.extend(page);
    }
    sample.truncate(sample_size);
    Ok(sample)
}

/// Run the identification phase for one substance.
///
/// Identify calls run concurrently through the gateway; results are folded
/// in scan order so the first-seen spelling of each condition is stable.
pub async fn identify<S, D>(
    gateway: &Arc<InferenceGateway<S>>,
    source: &D,
    substance: &str,
    sample_size: usize,
    method: &str,
    cancel: &CancellationToken,
) -> SourceResult<IdentificationPhase>
where
    S: InferenceService + 'static,
    D: DocumentSource,
{
    let sample = fetch_sample(source, substance, sample_size).await?;
    info!(substance, documents = sample.len(), "Identification started");

    let mut phase = IdentificationPhase::default();
    phase.report.scanned = sample.len();

    // Step 1: Skip malformed documents
    let mut usable = Vec::new();
    for doc in sample {
        if doc.is_well_formed() {
            usable.push(doc);
        } else {
            warn!(substance, document = %doc.id, "Skipping malformed document");
            phase.report.malformed.push(doc.id);
        }
    }

    // Step 2: Identify concurrently
    let mut tasks = JoinSet::new();
    for (position, doc) in usable.iter().enumerate() {
        let gateway = Arc::clone(gateway);
        let cancel = cancel.clone();
        let substance = substance.to_string();
        let text = doc.text();
        tasks.spawn(async move {
            let result = gateway.identify(&substance, &text, &cancel).await;
            (position, result)
        });
    }
    let mut results = Vec::with_capacity(usable.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(entry) => results.push(entry),
            Err(e) => warn!(substance, error = %e, "Identify task aborted"),
        }
    }
    results.sort_by_key(|(position, _)| *position);

    // Step 3: Fold in scan order, deduplicating by normalized text
    let mut by_key: HashMap<String, usize> = HashMap::new();
    let mut seen_results = vec![false; usable.len()];
    for (position, result) in results {
        seen_results[position] = true;
        let doc = &usable[position];
        match result {
            Ok(Identification::NoIndication) => phase.report.no_indication += 1,
            Ok(Identification::Conditions(conditions)) => {
                for text in conditions {
                    record_mention(&mut phase.report, &mut by_key, doc, &text, method);
                }
            }
            Err(InferenceError::Cancelled) => phase.report.cancelled = true,
            Err(e) => {
                debug!(substance, document = %doc.id, error = %e, "Identify failed");
                phase.report.failed.push(doc.id.clone());
            }
        }
    }
    for (position, seen) in seen_results.iter().enumerate() {
        if !seen {
            phase.report.failed.push(usable[position].id.clone());
        }
    }
    phase.report.cancelled |= cancel.is_cancelled();

    for doc in usable {
        phase.documents.insert(doc.id.clone(), doc);
    }

    info!(
        substance,
        conditions = phase.report.conditions.len(),
        malformed = phase.report.malformed.len(),
        failed = phase.report.failed.len(),
        "Identification finished"
    );
    Ok(phase)
}

fn record_mention(
    report: &mut IdentificationReport,
    by_key: &mut HashMap<String, usize>,
    doc: &Document,
    text: &str,
    method: &str,
) {
    let key = normalize_text(text);
    if key.is_empty() {
        return;
    }
    let mention = CandidateCondition::new(text.trim(), doc.id.clone(), method);

    match by_key.get(&key) {
        Some(&index) => {
            let condition = &mut report.conditions[index];
            if !condition.documents.contains(&doc.id) {
                condition.documents.push(doc.id.clone());
            }
            // A variant spelling is kept as seen, followed by its canonical form.
            let canonical = (mention.text != condition.text).then(|| mention.corrected(condition.text.clone()));
            condition.mentions.push(mention);
            condition.mentions.extend(canonical);
        }
        None => {
            by_key.insert(key.clone(), report.conditions.len());
            report.conditions.push(IdentifiedCondition {
                text: text.trim().to_string(),
                key,
                documents: vec![doc.id.clone()],
                mentions: vec![mention],
            });
        }
    }
}
