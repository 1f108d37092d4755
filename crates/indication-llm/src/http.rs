//! HTTP client for a remote completion endpoint.
//!
//! Speaks the common `{prompt, max_tokens, temperature}` completion shape and
//! reads the generated text from `choices[0].text`, `response` or `content`,
//! whichever the server provides.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::extraction::{parse_identify_output, parse_verify_output};
use crate::prompts::{build_identify_prompt, build_verify_prompt};
use crate::service::{Identification, InferenceError, InferenceResult, InferenceService};

/// Connection settings for [`HttpInference`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpInferenceConfig {
    /// Completion endpoint URL.
    pub endpoint: String,
    /// Model name passed through to the server, if it needs one.
    pub model: Option<String>,
    /// Generation cap per call.
    pub max_tokens: u32,
    /// Include few-shot examples in prompts.
    pub few_shot: bool,
    /// Transport-level timeout; the accumulator applies its own per-call timeout too.
    pub request_timeout_ms: u64,
}

impl Default for HttpInferenceConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080/completion".into(),
            model: None,
            max_tokens: 256,
            few_shot: true,
            request_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

/// Inference service backed by an HTTP completion endpoint.
pub struct HttpInference {
    client: reqwest::Client,
    config: HttpInferenceConfig,
}

impl HttpInference {
    /// Build a client for the configured endpoint.
    pub fn new(config: HttpInferenceConfig) -> InferenceResult<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(InferenceError::Rejected("No inference endpoint configured".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| InferenceError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    async fn complete(&self, prompt: &str) -> InferenceResult<String> {
        let body = CompletionRequest {
            prompt,
            max_tokens: self.config.max_tokens,
            temperature: 0.0,
            model: self.config.model.as_deref(),
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout(Duration::from_millis(self.config.request_timeout_ms))
                } else {
                    InferenceError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(InferenceError::Unavailable(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(InferenceError::Rejected(format!("HTTP {}", status)));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| InferenceError::Unparseable(e.to_string()))?;
        extract_text(&value)
    }
}

/// Pull generated text out of the response body.
fn extract_text(value: &serde_json::Value) -> InferenceResult<String> {
    let text = value
        .pointer("/choices/0/text")
        .or_else(|| value.get("response"))
        .or_else(|| value.get("content"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| InferenceError::Unparseable("No generated text in response".into()))?;
    Ok(text.to_string())
}

impl InferenceService for HttpInference {
    async fn identify(&self, substance: &str, document_text: &str) -> InferenceResult<Identification> {
        let prompt = build_identify_prompt(substance, document_text, self.config.few_shot);
        let text = self.complete(&prompt).await?;
        debug!(substance, chars = text.len(), "identify response received");
        parse_identify_output(&text)
    }

    async fn verify(
        &self,
        substance: &str,
        condition: &str,
        document_text: &str,
    ) -> InferenceResult<f64> {
        let prompt = build_verify_prompt(substance, condition, document_text, self.config.few_shot);
        let text = self.complete(&prompt).await?;
        debug!(substance, condition, chars = text.len(), "verify response received");
        parse_verify_output(&text)
    }
}
