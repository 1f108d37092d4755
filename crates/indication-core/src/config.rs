//! Pipeline configuration.
//!
//! Every section is `#[serde(default)]`, so a TOML file only needs the keys it
//! changes. The two confirmation thresholds accept `false` to switch them off.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::models::{Aggregation, ConfirmationRule};

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level configuration aggregating every stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub identification: IdentificationConfig,
    pub confirmation: ConfirmationConfig,
    pub gateway: GatewayConfig,
    pub mapper: MapperConfig,
    pub recovery: RecoveryConfig,
    pub pipeline: RunConfig,
}

impl PipelineConfig {
    /// Load config from a TOML string, falling back to defaults for missing fields.
    pub fn from_toml(toml_str: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Load and validate a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.identification.sample_size == 0 {
            return invalid("identification.sample_size must be at least 1");
        }

        let c = &self.confirmation;
        if c.budget == 0 {
            return invalid("confirmation.budget must be at least 1");
        }
        if c.confidence_threshold.is_none() && c.min_evidence.is_none() {
            return invalid("confirmation needs confidence_threshold, min_evidence, or both");
        }
        if let Some(t) = c.confidence_threshold {
            if !(0.0..=1.0).contains(&t) {
                return invalid("confirmation.confidence_threshold must be within [0, 1]");
            }
        }
        if c.min_evidence == Some(0) {
            return invalid("confirmation.min_evidence must be at least 1");
        }
        if !(0.0..=1.0).contains(&c.min_supporting_confidence) {
            return invalid("confirmation.min_supporting_confidence must be within [0, 1]");
        }
        if c.max_consecutive_failures == 0 {
            return invalid("confirmation.max_consecutive_failures must be at least 1");
        }
        if c.attempt_budget == Some(0) {
            return invalid("confirmation.attempt_budget must be at least 1");
        }

        let g = &self.gateway;
        if g.max_concurrent_calls == 0 {
            return invalid("gateway.max_concurrent_calls must be at least 1");
        }
        if g.call_timeout_ms == 0 {
            return invalid("gateway.call_timeout_ms must be at least 1");
        }
        if g.retry.max_attempts == 0 {
            return invalid("gateway.retry.max_attempts must be at least 1");
        }
        if g.retry.multiplier < 1.0 {
            return invalid("gateway.retry.multiplier must be at least 1.0");
        }

        let m = &self.mapper;
        if !(m.token_overlap_threshold > 0.0 && m.token_overlap_threshold <= 1.0) {
            return invalid("mapper.token_overlap_threshold must be within (0, 1]");
        }
        if m.max_candidates == 0 {
            return invalid("mapper.max_candidates must be at least 1");
        }

        if self.pipeline.workers == 0 {
            return invalid("pipeline.workers must be at least 1");
        }
        if self.pipeline.method_tag.trim().is_empty() {
            return invalid("pipeline.method_tag must not be empty");
        }
        Ok(())
    }
}

/// Identification phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentificationConfig {
    /// Documents scanned for candidate discovery (S)
    pub sample_size: usize,
}

impl Default for IdentificationConfig {
    fn default() -> Self {
        Self { sample_size: 50 }
    }
}

/// Confirmation phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    /// Evidence documents per condition (B)
    pub budget: usize,
    /// Aggregate confidence threshold (T)
    #[serde(serialize_with = "ser_toggle", deserialize_with = "de_toggle")]
    pub confidence_threshold: Option<f64>,
    /// Supporting evidence count (K)
    #[serde(serialize_with = "ser_toggle", deserialize_with = "de_toggle")]
    pub min_evidence: Option<usize>,
    /// Score a record needs to count towards K
    pub min_supporting_confidence: f64,
    pub aggregation: Aggregation,
    /// Draw co-occurrence documents past the identification sample
    pub allow_top_up: bool,
    /// Consecutive verify failures before a condition is given up
    pub max_consecutive_failures: usize,
    /// Verify calls (successful or failed) per condition; defaults to 2 x budget
    pub attempt_budget: Option<usize>,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            budget: 10,
            confidence_threshold: Some(0.8),
            min_evidence: Some(3),
            min_supporting_confidence: 0.5,
            aggregation: Aggregation::Mean,
            allow_top_up: true,
            max_consecutive_failures: 3,
            attempt_budget: None,
        }
    }
}

impl ConfirmationConfig {
    pub fn rule(&self) -> ConfirmationRule {
        ConfirmationRule {
            confidence_threshold: self.confidence_threshold,
            min_evidence: self.min_evidence,
            min_supporting_confidence: self.min_supporting_confidence,
            aggregation: self.aggregation,
        }
    }

    pub fn effective_attempt_budget(&self) -> usize {
        self.attempt_budget
            .unwrap_or_else(|| self.budget.saturating_mul(2))
            .max(self.budget)
    }
}

/// Shared inference gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Concurrent outbound calls across all conditions and substances
    pub max_concurrent_calls: usize,
    /// Minimum spacing between call starts
    pub min_call_interval_ms: u64,
    /// Per-call timeout
    pub call_timeout_ms: u64,
    pub retry: RetryConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 4,
            min_call_interval_ms: 0,
            call_timeout_ms: 30_000,
            retry: RetryConfig::default(),
        }
    }
}

impl GatewayConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn min_call_interval(&self) -> Duration {
        Duration::from_millis(self.min_call_interval_ms)
    }
}

/// Bounded exponential backoff for transient inference failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per call, including the first
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1) as i32;
        let ms = self.initial_backoff_ms as f64 * self.multiplier.powi(exp);
        Duration::from_millis(ms.min(self.max_backoff_ms as f64) as u64)
    }
}

/// Terminology mapper and text-match thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    /// Minimum Jaccard score for a token-overlap match
    pub token_overlap_threshold: f64,
    /// Parent levels searched for a code
    pub max_ascent_depth: u32,
    /// Minimum length of the contained side of a substring match
    pub min_contains_len: usize,
    /// Ranked candidate concepts reported per mapping
    pub max_candidates: usize,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            token_overlap_threshold: 0.6,
            max_ascent_depth: 5,
            min_contains_len: 4,
            max_candidates: 3,
        }
    }
}

/// Recovery analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Compare raw text when a side has no group key
    pub text_fallback: bool,
    /// Report the closest extracted string for unrecovered references
    pub near_misses: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            text_fallback: true,
            near_misses: true,
        }
    }
}

/// Run orchestration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Substances processed concurrently
    pub workers: usize,
    /// Method name given to accumulator output in recovery analysis
    pub method_tag: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            method_tag: "literature".into(),
        }
    }
}

/// `false` in TOML switches an optional threshold off.
#[derive(Deserialize, Serialize)]
#[serde(untagged)]
enum Toggle<T> {
    Value(T),
    Flag(bool),
}

fn de_toggle<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    match Toggle::<T>::deserialize(deserializer)? {
        Toggle::Value(v) => Ok(Some(v)),
        Toggle::Flag(false) => Ok(None),
        Toggle::Flag(true) => Err(serde::de::Error::custom(
            "expected a value or `false` to disable",
        )),
    }
}

fn ser_toggle<S, T>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: Serialize + Copy,
{
    match value {
        Some(v) => Toggle::Value(*v).serialize(serializer),
        None => Toggle::<T>::Flag(false).serialize(serializer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.identification.sample_size, 50);
        assert_eq!(config.confirmation.budget, 10);
        assert_eq!(config.confirmation.effective_attempt_budget(), 20);
        assert_eq!(config.pipeline.method_tag, "literature");
    }

    #[test]
    fn test_partial_toml() {
        let config = PipelineConfig::from_toml(
            r#"
            [identification]
            sample_size = 20

            [confirmation]
            budget = 5
            aggregation = "max"
            min_evidence = false

            [gateway.retry]
            max_attempts = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.identification.sample_size, 20);
        assert_eq!(config.confirmation.budget, 5);
        assert_eq!(config.confirmation.aggregation, Aggregation::Max);
        assert_eq!(config.confirmation.min_evidence, None);
        assert_eq!(config.confirmation.confidence_threshold, Some(0.8));
        assert_eq!(config.gateway.retry.max_attempts, 5);
        assert_eq!(config.gateway.max_concurrent_calls, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_round_trip_keeps_disabled_threshold() {
        let mut config = PipelineConfig::default();
        config.confirmation.confidence_threshold = None;
        let text = toml::to_string(&config).unwrap();
        let back = PipelineConfig::from_toml(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_validate_rejects() {
        let cases: Vec<(&str, Box<dyn Fn(&mut PipelineConfig)>)> = vec![
            ("S = 0", Box::new(|c: &mut PipelineConfig| c.identification.sample_size = 0)),
            ("B = 0", Box::new(|c: &mut PipelineConfig| c.confirmation.budget = 0)),
            (
                "no thresholds",
                Box::new(|c: &mut PipelineConfig| {
                    c.confirmation.confidence_threshold = None;
                    c.confirmation.min_evidence = None;
                }),
            ),
            ("T > 1", Box::new(|c: &mut PipelineConfig| c.confirmation.confidence_threshold = Some(1.5))),
            ("K = 0", Box::new(|c: &mut PipelineConfig| c.confirmation.min_evidence = Some(0))),
            ("workers", Box::new(|c: &mut PipelineConfig| c.pipeline.workers = 0)),
            ("calls", Box::new(|c: &mut PipelineConfig| c.gateway.max_concurrent_calls = 0)),
            ("retry", Box::new(|c: &mut PipelineConfig| c.gateway.retry.max_attempts = 0)),
            ("jaccard 0", Box::new(|c: &mut PipelineConfig| c.mapper.token_overlap_threshold = 0.0)),
            ("jaccard > 1", Box::new(|c: &mut PipelineConfig| c.mapper.token_overlap_threshold = 1.1)),
        ];

        for (name, mutate) in cases {
            let mut config = PipelineConfig::default();
            mutate(&mut config);
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid(_))),
                "case {} should be rejected",
                name
            );
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let retry = RetryConfig::default();
        assert_eq!(retry.backoff(1), Duration::from_millis(200));
        assert_eq!(retry.backoff(2), Duration::from_millis(400));
        assert_eq!(retry.backoff(10), Duration::from_millis(5_000));
    }

    #[test]
    fn test_load_missing_file() {
        let result = PipelineConfig::load("/nonexistent/pipeline.toml");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(&path, "[pipeline]\nworkers = 2\n").unwrap();
        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.pipeline.workers, 2);
    }
}
