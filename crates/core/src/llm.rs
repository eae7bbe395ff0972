//! LLM client trait: the abstraction over prompt-based extraction backends.
//!
//! Callers ask for a model *tier* rather than a model name; the client maps
//! tiers to concrete models. Responses are free text that is expected to
//! embed a JSON object, pulled out with [`extract_json_block`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Model size class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Small,
    #[default]
    Medium,
    Large,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallOptions {
    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    2048
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub tier: ModelTier,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    pub prompt: String,

    #[serde(default)]
    pub options: CallOptions,
}

impl LlmRequest {
    pub fn new(tier: ModelTier, prompt: impl Into<String>) -> Self {
        Self {
            tier,
            system_prompt: None,
            prompt: prompt.into(),
            options: CallOptions::default(),
        }
    }

    pub fn with_system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,

    /// Which model actually responded.
    pub model: String,

    #[serde(default)]
    pub tokens_used: u32,
}

/// The core LLM client trait.
///
/// Request-level timeouts are the client's responsibility; the core never
/// enforces its own.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// A human-readable name for this client (e.g., "openai", "scripted").
    fn name(&self) -> &str;

    async fn call(&self, request: LlmRequest) -> Result<LlmResponse, LlmError>;
}

/// Return the first balanced `{...}` block in `text`, if any.
///
/// Braces inside JSON string literals are ignored.
pub fn extract_json_block(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract and decode the first JSON object in `text`. `None` when absent or malformed.
pub fn parse_json_block<T: DeserializeOwned>(text: &str) -> Option<T> {
    let block = extract_json_block(text)?;
    serde_json::from_str(block).ok()
}
