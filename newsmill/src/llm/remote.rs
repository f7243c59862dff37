use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{LlmProvider, LlmRequest, LlmResponse, UsageMetadata};

const DEFAULT_API_URL: &str = "http://localhost:11434/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Remote LLM provider using OpenAI-compatible HTTP API
pub struct RemoteLlmProvider {
    base_url: String,
    api_key: String,
    model: String,
    default_timeout: Duration,
    default_max_tokens: usize,
    default_temperature: f32,
    client: reqwest::Client,
}

impl RemoteLlmProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            default_timeout: Duration::from_secs(60),
            default_max_tokens: 1200,
            default_temperature: 0.5,
            client: reqwest::Client::new(),
        }
    }

    /// Builds a provider from the `[llm.remote]` section; the API key is read from
    /// the environment variable named by `api_key_env`.
    pub fn from_config(cfg: &common::RemoteLlmConfig) -> Result<Self> {
        let api_key_env = cfg
            .api_key_env
            .as_deref()
            .context("missing api_key_env in [llm.remote]")?;
        let api_key = std::env::var(api_key_env)
            .with_context(|| format!("LLM API key env var '{}' not set", api_key_env))?;

        let provider = Self::new(
            cfg.api_url.clone().unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_key,
            cfg.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        )
        .with_defaults(
            cfg.timeout_seconds.unwrap_or(60),
            cfg.max_tokens.unwrap_or(1200),
            cfg.temperature.unwrap_or(0.5),
        );
        Ok(provider)
    }

    pub fn with_defaults(
        mut self,
        timeout_secs: u64,
        max_tokens: usize,
        temperature: f32,
    ) -> Self {
        self.default_timeout = Duration::from_secs(timeout_secs);
        self.default_max_tokens = max_tokens;
        self.default_temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait::async_trait]
impl LlmProvider for RemoteLlmProvider {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        let timeout = request
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: request.prompt,
            }],
            max_tokens: Some(request.max_tokens.unwrap_or(self.default_max_tokens)),
            temperature: Some(request.temperature.unwrap_or(self.default_temperature)),
        };

        // The deadline covers the whole exchange, body included.
        let exchange = async {
            let response = self
                .client
                .post(&self.base_url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .context("LLM HTTP request failed")?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("LLM API error {}: {}", status, body);
            }

            response
                .json::<ChatResponse>()
                .await
                .context("Failed to decode LLM response envelope")
        };

        let completion = tokio::time::timeout(timeout, exchange)
            .await
            .context("LLM request timed out")??;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .context("LLM response has no choices")?;

        let usage = completion
            .usage
            .map(|u| UsageMetadata {
                prompt_tokens: u.prompt_tokens.unwrap_or(0),
                completion_tokens: u.completion_tokens.unwrap_or(0),
                total_tokens: u.total_tokens.unwrap_or(0),
            })
            .unwrap_or_default();

        Ok(LlmResponse {
            content: choice.message.content,
            usage,
            model: completion.model.unwrap_or_else(|| self.model.clone()),
        })
    }
}

// OpenAI-compatible wire format
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<usize>,
    #[serde(default)]
    completion_tokens: Option<usize>,
    #[serde(default)]
    total_tokens: Option<usize>,
}
