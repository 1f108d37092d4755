//! Indication Core Library
//!
//! Evidence accumulation and cross-method recovery analysis for drug
//! indications.
//!
//! # Architecture
//!
//! ```text
//! Documents → Identify (sample S) → Confirm (budget B, threshold T / count K)
//!                                               │
//!                                     confirmed conditions
//!                                               │
//!                       ┌───────────────────────▼───────────────────────┐
//!                       │              Terminology Mapper               │
//!                       │  exact → contains → token overlap → ascent    │
//!                       └───────────────────────┬───────────────────────┘
//!                                               │
//!                                     Recovery Analyzer
//!                             (exact text / concept / chapter)
//!                                               │
//!                             ┌─────────────────┴─────────────────┐
//!                             ▼                                   ▼
//!                      Substance report                      Run summary
//! ```
//!
//! # Core Principle
//!
//! **Stop as soon as the evidence is enough.** A condition is confirmed the
//! moment a threshold is met and never re-opened; an unreachable inference
//! service exhausts a condition, it never confirms one.
//!
//! # Modules
//!
//! - [`accumulator`]: Identify-then-confirm evidence accumulation, inference gateway
//! - [`terminology`]: Concept store contract, mapper, hierarchy ascent, chapters
//! - [`text_match`]: Direct string comparison with the mapper's thresholds
//! - [`recovery`]: Recovery rates and cross-method contributions
//! - [`db`]: SQLite concept store and evidence persistence
//! - [`export`]: Substance reports, run summary, JSON and CSV
//! - [`pipeline`]: Multi-substance run orchestration
//! - [`config`]: TOML configuration

pub mod accumulator;
pub mod config;
pub mod db;
pub mod export;
pub mod models;
pub mod pipeline;
pub mod recovery;
pub mod terminology;
pub mod text_match;

// Re-export commonly used types
pub use accumulator::{
    AccumulationOutcome, CancellationToken, DocumentSource, EvidenceAccumulator, InferenceGateway,
    VecDocumentSource,
};
pub use config::PipelineConfig;
pub use db::Database;
pub use export::{RunSummary, SubstanceReport};
pub use models::{
    Concept, ConceptMapping, ConfirmationState, ConfirmationStatus, Document, Granularity, MappingMethod,
    RecoveryReport, RecoveryResult,
};
pub use pipeline::{Pipeline, RunOutput, SubstanceJob};
pub use recovery::{MethodSet, RecoveryAnalyzer};
pub use terminology::{ConceptIndex, ConceptStore, MappingCache, TerminologyMapper};
pub use text_match::TextMatcher;
