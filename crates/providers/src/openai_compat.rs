//! OpenAI-compatible client implementation.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, and any
//! endpoint exposing `/v1/chat/completions`. Model tiers map to concrete
//! model names from configuration.

use async_trait::async_trait;
use kenning_config::{LlmConfig, TierModels};
use kenning_core::error::LlmError;
use kenning_core::llm::{LlmClient, LlmRequest, LlmResponse, ModelTier};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// An OpenAI-compatible LLM client.
pub struct OpenAiCompatClient {
    base_url: String,
    api_key: String,
    models: TierModels,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    /// Create a new client with an explicit request timeout.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        models: TierModels,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::NotConfigured(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            models,
            client,
        })
    }

    pub fn from_config(config: &LlmConfig, api_key: &str) -> Result<Self, LlmError> {
        Self::new(
            config.api_url.clone(),
            api_key,
            config.models.clone(),
            Duration::from_secs(config.timeout_secs.max(1)),
        )
    }

    /// Create an OpenRouter client (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>, models: TierModels) -> Result<Self, LlmError> {
        Self::new("https://openrouter.ai/api/v1", api_key, models, Duration::from_secs(120))
    }

    /// Create an Ollama client (convenience constructor).
    pub fn ollama(base_url: Option<&str>, models: TierModels) -> Result<Self, LlmError> {
        Self::new(
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
            models,
            Duration::from_secs(120),
        )
    }

    pub fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Small => &self.models.small,
            ModelTier::Medium => &self.models.medium,
            ModelTier::Large => &self.models.large,
        }
    }

    fn to_api_messages(request: &LlmRequest) -> Vec<ApiMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system_prompt {
            messages.push(ApiMessage {
                role: "system".into(),
                content: Some(system.clone()),
            });
        }
        messages.push(ApiMessage {
            role: "user".into(),
            content: Some(request.prompt.clone()),
        });
        messages
    }
}

/// Map a non-success HTTP status to an [`LlmError`].
fn status_error(status: u16, body: String) -> LlmError {
    match status {
        429 => LlmError::RateLimited { retry_after_secs: 5 },
        401 | 403 => LlmError::AuthenticationFailed("Invalid API key or insufficient permissions".into()),
        408 | 504 => LlmError::Timeout(format!("upstream timeout (status {status})")),
        _ => LlmError::ApiError {
            status_code: status,
            message: body,
        },
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        "openai_compat"
    }

    async fn call(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let model = self.model_for(request.tier).to_string();

        let body = serde_json::json!({
            "model": model,
            "messages": Self::to_api_messages(&request),
            "temperature": request.options.temperature,
            "max_tokens": request.options.max_tokens,
            "stream": false,
        });

        debug!(model = %model, tier = request.tier.as_str(), "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(e.to_string())
                } else {
                    LlmError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "LLM endpoint returned error");
            return Err(status_error(status, error_body));
        }

        let api_response: ApiResponse = response.json().await.map_err(|e| LlmError::ApiError {
            status_code: 200,
            message: format!("Failed to parse response: {e}"),
        })?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::ApiError {
                status_code: 200,
                message: "No choices in response".into(),
            })?;

        Ok(LlmResponse {
            content: choice.message.content.unwrap_or_default(),
            model: api_response.model.unwrap_or(model),
            tokens_used: api_response.usage.map(|u| u.total_tokens).unwrap_or(0),
        })
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    total_tokens: u32,
}
