//! LLM client implementations for Kenning.
//!
//! All clients implement the `kenning_core::LlmClient` trait.
//! [`from_config`] builds the configured client, or `None` when no API key
//! is available; callers then run without LLM-backed features.

pub mod openai_compat;
pub mod scripted;

pub use openai_compat::OpenAiCompatClient;
pub use scripted::ScriptedClient;

use kenning_config::LlmConfig;
use kenning_core::error::LlmError;
use std::sync::Arc;

/// Build the configured client. `Ok(None)` when no API key is set.
pub fn from_config(config: &LlmConfig) -> Result<Option<Arc<dyn kenning_core::LlmClient>>, LlmError> {
    match &config.api_key {
        Some(key) if !key.trim().is_empty() => {
            let client = OpenAiCompatClient::from_config(config, key)?;
            Ok(Some(Arc::new(client)))
        }
        _ => {
            tracing::warn!("No LLM API key configured; extraction and LLM observers are disabled");
            Ok(None)
        }
    }
}
