//! Full runs: corpus file, TOML config, concept store, reports and exports.

use std::sync::{Arc, OnceLock};

use indication_core::accumulator::{DocumentSource, SourceError, SourceResult, VecDocumentSource};
use indication_core::config::PipelineConfig;
use indication_core::db::Database;
use indication_core::export::{recovery_csv, NoteReason, RECOVERY_CSV_HEADER};
use indication_core::models::{Concept, Document, Granularity};
use indication_core::pipeline::{Pipeline, SubstanceJob};
use indication_core::recovery::MethodSet;
use indication_core::terminology::ConceptIndex;
use indication_core::CancellationToken;
use indication_llm::{Identification, ScriptedInference};

const CORPUS: &str = r#"
{"substance": "Levothyroxine", "id": "L1", "title": "Levothyroxine in hypothyroidism", "abstract": "Thyroid replacement."}
{"substance": "Levothyroxine", "id": "L2", "title": "Levothyroxine dosing", "abstract": "Hypothyroidism in the elderly."}
{"substance": "Levothyroxine", "id": "L3", "title": "Untitled"}
{"substance": "Lisinopril", "id": "P1", "title": "Lisinopril", "abstract": "Hypertension control."}
{"substance": "Lisinopril", "id": "P2", "title": "Lisinopril after MI", "abstract": "Heart failure outcomes; hypertension.", "tags": ["Heart Failure"]}
"#;

const CONFIG: &str = r#"
[identification]
sample_size = 10

[confirmation]
budget = 5
confidence_threshold = 0.8
min_evidence = 3

[gateway]
max_concurrent_calls = 2

[pipeline]
workers = 2
"#;

fn index() -> ConceptIndex {
    ConceptIndex::from_concepts(vec![
        Concept::new("C0020676", "Hypothyroidism")
            .with_synonyms(&["Thyroid hormone deficiency"])
            .with_codes(&["E03.9"]),
        Concept::new("C0020538", "Hypertension")
            .with_synonyms(&["High blood pressure"])
            .with_codes(&["I10"]),
        Concept::new("C0018801", "Heart failure").with_codes(&["I50.9"]),
    ])
}

fn service() -> ScriptedInference {
    ScriptedInference::keyword(
        &["hypothyroidism", "hypertension", "heart failure"],
        &[("hypothyroidism", 0.9), ("hypertension", 0.85), ("heart failure", 0.3)],
        0.0,
    )
}

fn jobs() -> Vec<SubstanceJob> {
    vec![
        SubstanceJob::new("Levothyroxine", ["Hypothyroidism", "Goiter"])
            .with_method(MethodSet::new("labels", ["thyroid hormone deficiency"])),
        SubstanceJob::new("Lisinopril", ["High blood pressure", "Heart failure"]),
    ]
}

#[tokio::test]
async fn test_full_run() {
    let config = PipelineConfig::from_toml(CONFIG).unwrap();
    let source = VecDocumentSource::from_jsonl(CORPUS).unwrap();
    let pipeline = Pipeline::new(config, service(), source, index()).unwrap();

    let output = pipeline.run(jobs()).await;

    // Reports come back in job order
    let substances: Vec<&str> = output.reports.iter().map(|r| r.substance.as_str()).collect();
    assert_eq!(substances, vec!["Levothyroxine", "Lisinopril"]);

    let levo = &output.reports[0];
    assert!(levo.has_note(NoteReason::MalformedDocuments));
    assert!(!levo.is_failed());
    assert_eq!(levo.confirmed.len(), 1);
    assert_eq!(levo.confirmed[0].condition, "hypothyroidism");
    let recovery = levo.recovery.as_ref().unwrap();
    let literature = recovery.result("literature").unwrap();
    assert_eq!(literature.recovery_rate(Granularity::ExactText), 0.5);
    assert_eq!(literature.recovery_rate(Granularity::Concept), 0.5);
    let labels = recovery.result("labels").unwrap();
    assert_eq!(labels.recovery_rate(Granularity::ExactText), 0.0);
    assert_eq!(labels.recovery_rate(Granularity::Concept), 0.5);

    let lisi = &output.reports[1];
    assert!(lisi.is_complete());
    let outcome = lisi.accumulation.as_ref().unwrap();
    assert_eq!(outcome.confirmed(), vec!["hypertension"]);
    assert_eq!(outcome.exhausted()[0].condition, "heart failure");
    let literature = lisi.recovery.as_ref().unwrap().result("literature").unwrap();
    assert_eq!(literature.recovery_rate(Granularity::ExactText), 0.0);
    assert_eq!(literature.recovery_rate(Granularity::Concept), 0.5);
    assert_eq!(literature.recovery_rate(Granularity::Chapter), 1.0);

    let summary = &output.summary;
    assert_eq!(summary.substances, 2);
    assert_eq!(summary.confirmed, 2);
    assert_eq!(summary.exhausted, 1);
    assert!(summary.failed_substances.is_empty());
    let mean = summary.method("literature").unwrap();
    assert_eq!(mean.substances, 2);
    assert_eq!(mean.mean(Granularity::ExactText), 0.25);
    assert_eq!(mean.mean(Granularity::Concept), 0.5);
    assert_eq!(mean.mean(Granularity::Chapter), 0.75);
    assert_eq!(summary.method("labels").unwrap().substances, 1);
    assert!(summary.gateway.as_ref().unwrap().calls > 0);

    let csv = recovery_csv(&output.reports);
    assert!(csv.starts_with(RECOVERY_CSV_HEADER));
    assert_eq!(csv.lines().count(), 1 + 6 + 3);
    assert!(csv.contains("Lisinopril,literature,chapter,2,1,2,1.0000,false"));
}

#[tokio::test]
async fn test_results_persist() {
    let config = PipelineConfig::from_toml(CONFIG).unwrap();
    let source = VecDocumentSource::from_jsonl(CORPUS).unwrap();
    let pipeline = Pipeline::new(config, service(), source, index()).unwrap();
    let output = pipeline.run(jobs()).await;

    let db = Database::open_in_memory().unwrap();
    assert_eq!(output.persist(&db, pipeline.cache()).unwrap(), 2);
    assert_eq!(db.load_confirmations("lisinopril").unwrap().len(), 2);
    assert_eq!(db.list_cached_mappings().unwrap().len(), pipeline.cache().len());

    let json = output.reports[0].to_json().unwrap();
    assert!(json.contains("\"run_id\""));
    assert!(output.summary.to_json().unwrap().contains(&output.run_id));
}

struct OfflineSource;

impl DocumentSource for OfflineSource {
    async fn fetch(&self, _substance: &str, _offset: usize, _limit: usize) -> SourceResult<Vec<Document>> {
        Err(SourceError::Unavailable("index offline".into()))
    }

    async fn fetch_cooccurring(
        &self,
        _substance: &str,
        _condition: &str,
        _offset: usize,
        _limit: usize,
    ) -> SourceResult<Vec<Document>> {
        Err(SourceError::Unavailable("index offline".into()))
    }
}

#[tokio::test]
async fn test_source_failure_still_compares_other_methods() {
    let pipeline = Pipeline::new(PipelineConfig::default(), service(), OfflineSource, index()).unwrap();
    let output = pipeline.run(jobs()).await;

    let levo = &output.reports[0];
    assert!(levo.has_note(NoteReason::SourceUnavailable));
    assert!(levo.is_failed());
    assert!(levo.accumulation.is_none());
    let recovery = levo.recovery.as_ref().unwrap();
    assert!(recovery.result("literature").is_none());
    assert_eq!(recovery.result("labels").unwrap().recovery_rate(Granularity::Concept), 0.5);
    assert_eq!(output.summary.failed_substances.len(), 2);
    assert_eq!(pipeline.gateway().service().identify_calls(), 0);
}

#[tokio::test]
async fn test_source_failure_with_empty_reference_notes_missing_ground_truth() {
    let pipeline = Pipeline::new(PipelineConfig::default(), service(), OfflineSource, index()).unwrap();
    let output = pipeline
        .run(vec![SubstanceJob::new("Levothyroxine", Vec::<String>::new())])
        .await;

    let report = &output.reports[0];
    assert!(report.has_note(NoteReason::SourceUnavailable));
    assert!(report.has_note(NoteReason::NoGroundTruth));
    assert!(report.recovery.as_ref().unwrap().results.is_empty());
    assert_eq!(output.summary.no_ground_truth, vec!["Levothyroxine"]);
}

#[tokio::test]
async fn test_cancel_mid_confirmation() {
    let token: Arc<OnceLock<CancellationToken>> = Arc::new(OnceLock::new());
    let hook = Arc::clone(&token);
    let service = ScriptedInference::new(
        |_, _| Ok(Identification::Conditions(vec!["Hypertension".into()])),
        move |_, _, _| {
            if let Some(token) = hook.get() {
                token.cancel();
            }
            Ok(0.1)
        },
    );
    let source = VecDocumentSource::from_jsonl(CORPUS).unwrap();
    let pipeline = Pipeline::new(PipelineConfig::default(), service, source, index()).unwrap();
    token.set(pipeline.cancellation_token()).ok();

    let output = pipeline
        .run(vec![SubstanceJob::new("Lisinopril", ["Hypertension"])])
        .await;

    let report = &output.reports[0];
    assert!(report.has_note(NoteReason::Cancelled));
    let outcome = report.accumulation.as_ref().unwrap();
    assert!(outcome.cancelled);
    assert_eq!(outcome.pending().len(), 1);
    assert!(outcome.confirmed().is_empty());
    assert!(output.summary.cancelled);
    assert_eq!(pipeline.gateway().service().verify_calls(), 1);
}
