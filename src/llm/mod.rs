//! Text-completion providers
//!
//! The summarization pipeline only needs "prompt in, text out". Providers
//! implement [`Completer`]; [`from_config`] picks one from configuration.

mod anthropic;
mod openai;

pub use anthropic::AnthropicCompleter;
pub use openai::OpenAiCompleter;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;

use crate::config::{LlmConfig, LlmProvider};
use crate::{Error, Result};

/// Single-turn text completion
#[async_trait]
pub trait Completer: Send + Sync {
    /// Complete `prompt` and return the generated text
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Build the configured provider
///
/// # Errors
///
/// Returns [`Error::Config`] if no API key can be resolved, or
/// [`Error::Internal`] if the HTTP client cannot be built.
pub fn from_config(config: &LlmConfig) -> Result<Arc<dyn Completer>> {
    let api_key = config.resolve_api_key().ok_or_else(|| {
        Error::Config(format!(
            "No API key for {} (set llm.api_key or {}_API_KEY)",
            config.provider.as_str(),
            config.provider.as_str().to_uppercase()
        ))
    })?;

    let client = Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create LLM HTTP client: {e}")))?;

    let completer: Arc<dyn Completer> = match config.provider {
        LlmProvider::Groq | LlmProvider::OpenAi => {
            Arc::new(OpenAiCompleter::new(client, config, api_key))
        }
        LlmProvider::Anthropic => Arc::new(AnthropicCompleter::new(client, config, api_key)),
    };

    tracing::info!(
        provider = config.provider.as_str(),
        model = %config.model,
        "Text-completion provider ready"
    );
    Ok(completer)
}

/// Turn a non-success provider response into an error
async fn check_status(response: reqwest::Response, provider: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Transport(format!("{provider} returned HTTP {status}: {body}")))
}
