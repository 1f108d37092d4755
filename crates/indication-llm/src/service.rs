//! The inference service contract.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Inference errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Inference call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Inference service unavailable: {0}")]
    Unavailable(String),

    #[error("Unparseable response: {0}")]
    Unparseable(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Inference call cancelled")]
    Cancelled,
}

impl InferenceError {
    /// Whether a retry of the identical request may succeed.
    ///
    /// Unparseable output counts as transient: the service is sampled, and a
    /// guessed value is never substituted for a score we could not read.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            InferenceError::Transport(_)
                | InferenceError::Timeout(_)
                | InferenceError::Unavailable(_)
                | InferenceError::Unparseable(_)
        )
    }
}

pub type InferenceResult<T> = Result<T, InferenceError>;

/// Outcome of an identify call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Identification {
    /// One or more condition strings, as produced by the model.
    Conditions(Vec<String>),
    /// The model found no therapeutic indication in the document.
    NoIndication,
}

impl Identification {
    /// Condition strings, empty for `NoIndication`.
    pub fn conditions(&self) -> &[String] {
        match self {
            Identification::Conditions(c) => c,
            Identification::NoIndication => &[],
        }
    }
}

/// A text-generation service consumed through the identify/verify contract.
///
/// Implementations must be idempotent for identical inputs so callers can
/// retry and cache freely.
pub trait InferenceService: Send + Sync {
    /// Propose conditions the substance is indicated for, based on one document.
    fn identify(
        &self,
        substance: &str,
        document_text: &str,
    ) -> impl Future<Output = InferenceResult<Identification>> + Send;

    /// Score (0.0 - 1.0) how strongly the document supports the substance
    /// treating the condition.
    fn verify(
        &self,
        substance: &str,
        condition: &str,
        document_text: &str,
    ) -> impl Future<Output = InferenceResult<f64>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(InferenceError::Transport("reset".into()).is_transient());
        assert!(InferenceError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(InferenceError::Unavailable("503".into()).is_transient());
        assert!(InferenceError::Unparseable("n/a".into()).is_transient());
        assert!(!InferenceError::Rejected("400".into()).is_transient());
        assert!(!InferenceError::Cancelled.is_transient());
    }

    #[test]
    fn test_identification_conditions() {
        let found = Identification::Conditions(vec!["asthma".into()]);
        assert_eq!(found.conditions(), ["asthma".to_string()]);
        assert!(Identification::NoIndication.conditions().is_empty());
    }
}
