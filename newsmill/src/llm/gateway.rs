use anyhow::Context;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{extract_json_from_text, LlmProvider, LlmRequest};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Transport, auth or quota failure reported by the provider. Never retried here.
    #[error("model call failed: {0:#}")]
    Provider(anyhow::Error),

    #[error("structured output still malformed after {attempts} attempts")]
    Malformed { attempts: u32 },

    #[error("model call cancelled")]
    Cancelled,
}

/// Single choke point for model calls.
///
/// Structured calls retry malformed output immediately and without limit (unless
/// `max_parse_retries` is set), checking the cancellation token on every attempt.
#[derive(Clone)]
pub struct LlmGateway {
    provider: Arc<dyn LlmProvider>,
    cancel: CancellationToken,
    call_timeout_seconds: Option<u64>,
    max_parse_retries: Option<u32>,
}

impl LlmGateway {
    pub fn new(provider: Arc<dyn LlmProvider>, cancel: CancellationToken) -> Self {
        Self {
            provider,
            cancel,
            call_timeout_seconds: None,
            max_parse_retries: None,
        }
    }

    pub fn with_call_timeout(mut self, seconds: Option<u64>) -> Self {
        self.call_timeout_seconds = seconds;
        self
    }

    pub fn with_max_parse_retries(mut self, retries: Option<u32>) -> Self {
        self.max_parse_retries = retries;
        self
    }

    /// Same gateway bound to another cancellation token.
    pub fn with_cancel(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    async fn call(&self, prompt: &str) -> Result<String, GatewayError> {
        if self.cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }

        let request = LlmRequest {
            timeout_seconds: self.call_timeout_seconds,
            ..LlmRequest::new(prompt)
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(GatewayError::Cancelled),
            response = self.provider.generate(request) => response
                .map(|r| r.content)
                .map_err(GatewayError::Provider),
        }
    }

    /// Free-text call (drafts, rewrites). Provider errors propagate as-is.
    pub async fn invoke_text(&self, prompt: &str) -> Result<String, GatewayError> {
        let text = self.call(prompt).await?;
        Ok(text.trim().to_string())
    }

    /// Structured call: the response must contain a JSON object deserializable into `T`.
    pub async fn invoke<T: DeserializeOwned>(&self, prompt: &str) -> Result<T, GatewayError> {
        let mut failures: u32 = 0;
        loop {
            let text = self.call(prompt).await?;
            match parse_structured::<T>(&text) {
                Ok(value) => {
                    if failures > 0 {
                        debug!(retries = failures, "structured output parsed after retries");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    failures += 1;
                    warn!(attempt = failures, "malformed model output, retrying: {:#}", e);
                    if self.max_parse_retries.is_some_and(|max| failures > max) {
                        return Err(GatewayError::Malformed { attempts: failures });
                    }
                    // No backoff, but let the cancel signal and other tasks get a turn.
                    tokio::task::yield_now().await;
                }
            }
        }
    }
}

fn parse_structured<T: DeserializeOwned>(text: &str) -> anyhow::Result<T> {
    let json = extract_json_from_text(text).context("no JSON object in model output")?;
    serde_json::from_str(&json).with_context(|| format!("unexpected JSON shape: {}", json))
}
