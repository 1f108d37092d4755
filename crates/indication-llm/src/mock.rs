//! Deterministic inference service for tests and offline runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::service::{Identification, InferenceError, InferenceResult, InferenceService};

type IdentifyFn = dyn Fn(&str, &str) -> InferenceResult<Identification> + Send + Sync;
type VerifyFn = dyn Fn(&str, &str, &str) -> InferenceResult<f64> + Send + Sync;

/// Scripted stand-in for a text-generation service.
///
/// Behaviour is supplied as closures, so tests decide exactly which documents
/// yield which conditions and scores. Call counts are recorded per mode.
pub struct ScriptedInference {
    identify_fn: Box<IdentifyFn>,
    verify_fn: Box<VerifyFn>,
    identify_calls: AtomicUsize,
    verify_calls: AtomicUsize,
}

impl ScriptedInference {
    /// Create a service from explicit identify/verify closures.
    pub fn new<I, V>(identify: I, verify: V) -> Self
    where
        I: Fn(&str, &str) -> InferenceResult<Identification> + Send + Sync + 'static,
        V: Fn(&str, &str, &str) -> InferenceResult<f64> + Send + Sync + 'static,
    {
        Self {
            identify_fn: Box::new(identify),
            verify_fn: Box::new(verify),
            identify_calls: AtomicUsize::new(0),
            verify_calls: AtomicUsize::new(0),
        }
    }

    /// Keyword service: identify reports every vocabulary term found in the
    /// document; verify returns the configured score for the condition when
    /// the document mentions it, and `absent_score` otherwise.
    pub fn keyword(vocabulary: &[&str], scores: &[(&str, f64)], absent_score: f64) -> Self {
        let vocabulary: Vec<String> = vocabulary.iter().map(|v| v.to_lowercase()).collect();
        let scores: HashMap<String, f64> = scores
            .iter()
            .map(|(c, s)| (c.to_lowercase(), *s))
            .collect();

        Self::new(
            move |_substance, text| {
                let text_lower = text.to_lowercase();
                let found: Vec<String> = vocabulary
                    .iter()
                    .filter(|term| text_lower.contains(term.as_str()))
                    .cloned()
                    .collect();
                if found.is_empty() {
                    Ok(Identification::NoIndication)
                } else {
                    Ok(Identification::Conditions(found))
                }
            },
            move |_substance, condition, text| {
                let condition_lower = condition.to_lowercase();
                if text.to_lowercase().contains(&condition_lower) {
                    Ok(scores.get(&condition_lower).copied().unwrap_or(0.5))
                } else {
                    Ok(absent_score)
                }
            },
        )
    }

    /// A service whose every call fails with the given error.
    pub fn failing(error: InferenceError) -> Self {
        let verify_error = error.clone();
        Self::new(
            move |_, _| Err(error.clone()),
            move |_, _, _| Err(verify_error.clone()),
        )
    }

    /// Number of identify calls received.
    pub fn identify_calls(&self) -> usize {
        self.identify_calls.load(Ordering::SeqCst)
    }

    /// Number of verify calls received.
    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }
}

impl InferenceService for ScriptedInference {
    async fn identify(&self, substance: &str, document_text: &str) -> InferenceResult<Identification> {
        self.identify_calls.fetch_add(1, Ordering::SeqCst);
        (self.identify_fn)(substance, document_text)
    }

    async fn verify(
        &self,
        substance: &str,
        condition: &str,
        document_text: &str,
    ) -> InferenceResult<f64> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        (self.verify_fn)(substance, condition, document_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_keyword_identify() {
        let service = ScriptedInference::keyword(&["hypertension", "heart failure"], &[], 0.0);

        let found = service
            .identify("lisinopril", "Lisinopril in hypertension and heart failure")
            .await
            .unwrap();
        assert_eq!(found.conditions().len(), 2);

        let none = service.identify("lisinopril", "Pharmacokinetics in rats").await.unwrap();
        assert_eq!(none, Identification::NoIndication);
        assert_eq!(service.identify_calls(), 2);
    }

    #[tokio::test]
    async fn test_keyword_verify() {
        let service = ScriptedInference::keyword(&[], &[("hypertension", 0.9)], 0.1);

        let hit = service
            .verify("lisinopril", "Hypertension", "effective in hypertension")
            .await
            .unwrap();
        assert_eq!(hit, 0.9);

        let miss = service
            .verify("lisinopril", "hypertension", "unrelated text")
            .await
            .unwrap();
        assert_eq!(miss, 0.1);
        assert_eq!(service.verify_calls(), 2);
    }

    #[tokio::test]
    async fn test_failing_service() {
        let service = ScriptedInference::failing(InferenceError::Unavailable("down".into()));
        assert!(service.identify("x", "y").await.is_err());
        assert!(service.verify("x", "y", "z").await.is_err());
    }
}
