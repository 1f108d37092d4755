//! Evidence accumulation for one substance.
//!
//! Pipeline: Sample → Identify (dedup by normalized text) → Confirm each
//! condition concurrently → Outcome
//!
//! All inference goes through a shared [`InferenceGateway`]; confirmation of
//! one condition never blocks another beyond the gateway's limits.

mod cancel;
mod confirm;
mod gateway;
mod identify;
mod source;

pub use cancel::*;
pub use confirm::*;
pub use gateway::*;
pub use identify::*;
pub use source::*;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use indication_llm::InferenceService;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::{ConfirmationConfig, PipelineConfig};
use crate::models::{normalize_text, ConditionKey, ConfirmationState, ConfirmationStatus};

/// Accumulation errors fatal for one substance.
#[derive(Error, Debug)]
pub enum AccumulatorError {
    #[error("Substance name is blank")]
    BlankSubstance,

    #[error("Document source error: {0}")]
    Source(#[from] SourceError),
}

pub type AccumulatorResult<T> = Result<T, AccumulatorError>;

/// Result of accumulating evidence for one substance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccumulationOutcome {
    /// Normalized substance name
    pub substance: String,
    /// Method tag stamped on every candidate
    pub method: String,
    pub identification: IdentificationReport,
    /// One state per identified condition, in identification order
    pub confirmations: Vec<ConfirmationState>,
    /// Accumulation was interrupted; pending states are partial
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl AccumulationOutcome {
    fn with_status(&self, status: ConfirmationStatus) -> impl Iterator<Item = &ConfirmationState> {
        self.confirmations.iter().filter(move |s| s.status == status)
    }

    /// Confirmed condition texts, in identification order.
    pub fn confirmed(&self) -> Vec<String> {
        self.with_status(ConfirmationStatus::Confirmed)
            .map(|s| s.condition.clone())
            .collect()
    }

    pub fn exhausted(&self) -> Vec<&ConfirmationState> {
        self.with_status(ConfirmationStatus::Exhausted).collect()
    }

    pub fn pending(&self) -> Vec<&ConfirmationState> {
        self.with_status(ConfirmationStatus::Pending).collect()
    }

    /// Conditions abandoned because the inference service stopped answering.
    pub fn inference_unavailable(&self) -> Vec<&ConfirmationState> {
        self.confirmations
            .iter()
            .filter(|s| s.inference_unavailable())
            .collect()
    }
}

/// Two-phase evidence accumulator.
pub struct EvidenceAccumulator<S, D> {
    gateway: Arc<InferenceGateway<S>>,
    source: Arc<D>,
    sample_size: usize,
    confirmation: ConfirmationConfig,
    method: String,
}

impl<S, D> EvidenceAccumulator<S, D>
where
    S: InferenceService + 'static,
    D: DocumentSource + 'static,
{
    pub fn new(gateway: Arc<InferenceGateway<S>>, source: Arc<D>, config: &PipelineConfig) -> Self {
        Self {
            gateway,
            source,
            sample_size: config.identification.sample_size,
            confirmation: config.confirmation.clone(),
            method: config.pipeline.method_tag.clone(),
        }
    }

    pub fn gateway(&self) -> &Arc<InferenceGateway<S>> {
        &self.gateway
    }

    /// Identify then confirm conditions for one substance.
    pub async fn accumulate(
        &self,
        substance: &str,
        cancel: &CancellationToken,
    ) -> AccumulatorResult<AccumulationOutcome> {
        let name = normalize_text(substance);
        if name.is_empty() {
            return Err(AccumulatorError::BlankSubstance);
        }
        let started_at = Utc::now();

        // Step 1: Identification
        let phase = identify(
            &self.gateway,
            self.source.as_ref(),
            substance.trim(),
            self.sample_size,
            &self.method,
            cancel,
        )
        .await?;

        // Step 2: Confirmation, one task per condition
        let mut tasks = JoinSet::new();
        for (position, condition) in phase.report.conditions.iter().enumerate() {
            let task = confirm_condition(
                Arc::clone(&self.gateway),
                Arc::clone(&self.source),
                substance.trim().to_string(),
                condition.clone(),
                phase.documents_for(condition),
                self.confirmation.clone(),
                cancel.clone(),
            );
            tasks.spawn(async move { (position, task.await) });
        }

        let mut confirmations: Vec<Option<ConfirmationState>> = vec![None; phase.report.conditions.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, state)) => confirmations[position] = Some(state),
                Err(e) => warn!(substance = %name, error = %e, "Confirmation task aborted"),
            }
        }
        // A lost task leaves its condition pending rather than dropping it.
        let confirmations: Vec<ConfirmationState> = confirmations
            .into_iter()
            .zip(&phase.report.conditions)
            .map(|(state, condition)| {
                state.unwrap_or_else(|| {
                    let mut pending = ConfirmationState::new(
                        ConditionKey::new(&name, &condition.key),
                        condition.text.clone(),
                    );
                    pending.cancelled = true;
                    pending
                })
            })
            .collect();

        let cancelled = phase.report.cancelled || cancel.is_cancelled();
        let outcome = AccumulationOutcome {
            substance: name,
            method: self.method.clone(),
            identification: phase.report,
            confirmations,
            cancelled,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            substance = %outcome.substance,
            identified = outcome.identification.conditions.len(),
            confirmed = outcome.confirmed().len(),
            exhausted = outcome.exhausted().len(),
            cancelled = outcome.cancelled,
            "Accumulation finished"
        );
        Ok(outcome)
    }
}
