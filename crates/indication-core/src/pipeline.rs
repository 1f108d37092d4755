//! Run orchestrator: many substances, bounded workers, shared gateway,
//! concept index and mapping cache.

use std::sync::Arc;

use indication_llm::InferenceService;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::accumulator::{
    AccumulatorError, CancellationToken, DocumentSource, EvidenceAccumulator, InferenceGateway,
};
use crate::config::{ConfigError, PipelineConfig};
use crate::db::{Database, DbError, DbResult};
use crate::export::{NoteReason, Phase, RunSummary, SubstanceReport};
use crate::models::normalize_text;
use crate::recovery::{MethodSet, RecoveryAnalyzer};
use crate::terminology::{ConceptIndex, MappingCache, TerminologyMapper};

/// Pipeline errors.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// One substance to process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubstanceJob {
    pub substance: String,
    /// Ground-truth condition strings
    #[serde(default)]
    pub reference: Vec<String>,
    /// Condition sets extracted by other methods, compared alongside ours
    #[serde(default)]
    pub methods: Vec<MethodSet>,
}

impl SubstanceJob {
    pub fn new<T: Into<String>>(substance: impl Into<String>, reference: impl IntoIterator<Item = T>) -> Self {
        Self {
            substance: substance.into(),
            reference: reference.into_iter().map(Into::into).collect(),
            methods: Vec::new(),
        }
    }

    pub fn with_method(mut self, method: MethodSet) -> Self {
        self.methods.push(method);
        self
    }
}

/// Reports of a run, in job order, plus the summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    pub run_id: String,
    pub reports: Vec<SubstanceReport>,
    pub summary: RunSummary,
}

impl RunOutput {
    /// Write every accumulation outcome and the mapping cache to a database.
    pub fn persist(&self, db: &Database, cache: &MappingCache) -> DbResult<usize> {
        let mut saved = 0;
        for outcome in self.reports.iter().filter_map(|r| r.accumulation.as_ref()) {
            db.save_outcome(outcome)?;
            saved += 1;
        }
        cache.persist(db)?;
        Ok(saved)
    }
}

struct Shared<S, D> {
    config: PipelineConfig,
    accumulator: EvidenceAccumulator<S, D>,
    index: Arc<ConceptIndex>,
    cache: Arc<MappingCache>,
}

/// Runs substance jobs concurrently, bounded by `pipeline.workers`.
pub struct Pipeline<S, D> {
    shared: Arc<Shared<S, D>>,
    cancel: CancellationToken,
}

impl<S, D> Pipeline<S, D>
where
    S: InferenceService + 'static,
    D: DocumentSource + 'static,
{
    /// Validate the configuration and wire the shared components.
    pub fn new(config: PipelineConfig, service: S, source: D, index: ConceptIndex) -> PipelineResult<Self> {
        Self::with_cache(config, service, source, Arc::new(index), Arc::new(MappingCache::new()))
    }

    pub fn with_cache(
        config: PipelineConfig,
        service: S,
        source: D,
        index: Arc<ConceptIndex>,
        cache: Arc<MappingCache>,
    ) -> PipelineResult<Self> {
        config.validate()?;
        let gateway = Arc::new(InferenceGateway::new(service, &config.gateway));
        let accumulator = EvidenceAccumulator::new(gateway, Arc::new(source), &config);
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                accumulator,
                index,
                cache,
            }),
            cancel: CancellationToken::new(),
        })
    }

    /// Token cancelling every substance of every run of this pipeline.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cache(&self) -> &Arc<MappingCache> {
        &self.shared.cache
    }

    pub fn gateway(&self) -> &Arc<InferenceGateway<S>> {
        self.shared.accumulator.gateway()
    }

    /// Process every job; one report per job, in job order.
    pub async fn run(&self, jobs: Vec<SubstanceJob>) -> RunOutput {
        let run_id = uuid::Uuid::new_v4().to_string();
        let workers = Arc::new(Semaphore::new(self.shared.config.pipeline.workers.max(1)));
        info!(run_id = %run_id, jobs = jobs.len(), "Run started");

        let mut tasks = JoinSet::new();
        let substances: Vec<String> = jobs.iter().map(|j| j.substance.clone()).collect();
        for (position, job) in jobs.into_iter().enumerate() {
            let shared = Arc::clone(&self.shared);
            let workers = Arc::clone(&workers);
            let cancel = self.cancel.child_token();
            let run_id = run_id.clone();
            tasks.spawn(async move {
                let _permit = workers.acquire_owned().await.ok();
                (position, process_job(&shared, &run_id, job, &cancel).await)
            });
        }

        let mut reports: Vec<Option<SubstanceReport>> = vec![None; substances.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, report)) => reports[position] = Some(report),
                Err(e) => warn!(run_id = %run_id, error = %e, "Substance task aborted"),
            }
        }
        let reports: Vec<SubstanceReport> = reports
            .into_iter()
            .zip(substances)
            .map(|(report, substance)| {
                report.unwrap_or_else(|| {
                    let mut failed = SubstanceReport::new(run_id.clone(), substance.trim());
                    failed.note(Phase::Identification, NoteReason::Cancelled, "substance task aborted");
                    failed
                })
            })
            .collect();

        let summary = RunSummary::from_reports(run_id.clone(), &reports).with_gateway(self.gateway().stats());
        info!(
            run_id = %run_id,
            substances = summary.substances,
            failed = summary.failed_substances.len(),
            confirmed = summary.confirmed,
            "Run finished"
        );
        RunOutput {
            run_id,
            reports,
            summary,
        }
    }
}

/// Accumulate, then analyze recovery, for one substance. Always yields a report.
async fn process_job<S, D>(
    shared: &Shared<S, D>,
    run_id: &str,
    job: SubstanceJob,
    cancel: &CancellationToken,
) -> SubstanceReport
where
    S: InferenceService + 'static,
    D: DocumentSource + 'static,
{
    let mut report = SubstanceReport::new(run_id, job.substance.trim());
    let name = normalize_text(&job.substance);
    if name.is_empty() {
        warn!(run_id, "Skipping job with a blank substance name");
        report.note(Phase::Identification, NoteReason::ConfigurationError, "substance name is blank");
        return report;
    }

    // Step 1: Evidence accumulation
    let method_tag = shared.config.pipeline.method_tag.clone();
    let mut methods = Vec::with_capacity(job.methods.len() + 1);
    match shared.accumulator.accumulate(&job.substance, cancel).await {
        Ok(outcome) => {
            methods.push(MethodSet::new(method_tag, outcome.confirmed()));
            report = report.with_outcome(outcome);
        }
        Err(AccumulatorError::BlankSubstance) => {
            report.note(Phase::Identification, NoteReason::ConfigurationError, "substance name is blank");
            return report;
        }
        Err(AccumulatorError::Source(e)) => {
            warn!(substance = %name, error = %e, "Document source failed");
            report.note(Phase::Identification, NoteReason::SourceUnavailable, e.to_string());
        }
    }
    methods.extend(job.methods);

    // Step 2: Recovery against the reference set
    let mapper = TerminologyMapper::with_config(shared.index.as_ref(), shared.config.mapper.clone())
        .with_cache(shared.cache.as_ref());
    let analyzer = RecoveryAnalyzer::new(mapper, shared.config.recovery.clone());
    let recovery = analyzer.analyze(Some(&name), &job.reference, &methods);
    report.with_recovery(recovery)
}
