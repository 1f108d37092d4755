//! Shared access point to the inference service.
//!
//! Every identify/verify call of a run goes through one gateway, which
//! enforces the concurrency limit, the minimum call spacing, the per-call
//! timeout and retry with exponential backoff for transient failures.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indication_llm::{Identification, InferenceError, InferenceResult, InferenceService};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::cancel::CancellationToken;
use crate::config::{GatewayConfig, RetryConfig};

/// Counters of gateway activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayStats {
    /// Service calls issued, retries included
    pub calls: usize,
    pub retries: usize,
    pub timeouts: usize,
    /// Logical requests that failed after their last attempt
    pub failures: usize,
}

#[derive(Debug, Default)]
struct Counters {
    calls: AtomicUsize,
    retries: AtomicUsize,
    timeouts: AtomicUsize,
    failures: AtomicUsize,
}

/// Rate-limited, retrying front of an [`InferenceService`].
pub struct InferenceGateway<S> {
    service: Arc<S>,
    permits: Semaphore,
    /// Earliest instant the next call may start
    next_slot: Mutex<Instant>,
    min_interval: Duration,
    timeout: Duration,
    retry: RetryConfig,
    counters: Counters,
}

impl<S: InferenceService> InferenceGateway<S> {
    pub fn new(service: S, config: &GatewayConfig) -> Self {
        Self::from_arc(Arc::new(service), config)
    }

    pub fn from_arc(service: Arc<S>, config: &GatewayConfig) -> Self {
        Self {
            service,
            permits: Semaphore::new(config.max_concurrent_calls.max(1)),
            next_slot: Mutex::new(Instant::now()),
            min_interval: config.min_call_interval(),
            timeout: config.call_timeout(),
            retry: config.retry.clone(),
            counters: Counters::default(),
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            calls: self.counters.calls.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    /// Propose conditions for a substance from one document.
    pub async fn identify(
        &self,
        substance: &str,
        document_text: &str,
        cancel: &CancellationToken,
    ) -> InferenceResult<Identification> {
        self.call(cancel, || self.service.identify(substance, document_text))
            .await
    }

    /// Score a (substance, condition, document) triple.
    pub async fn verify(
        &self,
        substance: &str,
        condition: &str,
        document_text: &str,
        cancel: &CancellationToken,
    ) -> InferenceResult<f64> {
        let score = self
            .call(cancel, || {
                self.service.verify(substance, condition, document_text)
            })
            .await?;
        if !(0.0..=1.0).contains(&score) {
            // Scores outside [0, 1] are a contract breach, not noise to clamp.
            return Err(InferenceError::Unparseable(format!(
                "confidence {score} outside [0, 1]"
            )));
        }
        Ok(score)
    }

    async fn call<T, F, Fut>(&self, cancel: &CancellationToken, op: F) -> InferenceResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = InferenceResult<T>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(InferenceError::Cancelled);
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(InferenceError::Cancelled),
                result = self.attempt(&op) => result,
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    debug!(attempt, ?delay, error = %e, "Retrying inference call");
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(InferenceError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Inference call failed");
                    self.counters.failures.fetch_add(1, Ordering::Relaxed);
                    return Err(e);
                }
            }
        }
    }

    /// One service call: permit, pacing, timeout.
    async fn attempt<T, F, Fut>(&self, op: &F) -> InferenceResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = InferenceResult<T>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| InferenceError::Unavailable("gateway closed".into()))?;

        if !self.min_interval.is_zero() {
            let wait = {
                let mut next = self.next_slot.lock().await;
                let now = Instant::now();
                let start = (*next).max(now);
                *next = start + self.min_interval;
                start - now
            };
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }

        self.counters.calls.fetch_add(1, Ordering::Relaxed);
        match tokio::time::timeout(self.timeout, op()).await {
            Ok(result) => result,
            Err(_) => {
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                Err(InferenceError::Timeout(self.timeout))
            }
        }
    }
}
