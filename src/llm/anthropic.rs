//! Anthropic Messages API

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Completer, check_status};
use crate::config::LlmConfig;
use crate::{Error, Result};

/// Anthropic API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Client for `POST {base_url}/messages`
pub struct AnthropicCompleter {
    client: Client,
    url: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
}

impl AnthropicCompleter {
    /// Create a completer from configuration
    #[must_use]
    pub fn new(client: Client, config: &LlmConfig, api_key: String) -> Self {
        Self {
            client,
            url: format!("{}/messages", config.base_url()),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&self.api_key)
            .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?;
        headers.insert("x-api-key", key);
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: [Message<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl Completer for AnthropicCompleter {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: [Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(&self.url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await?;
        let response = check_status(response, "anthropic").await?;

        let body: MessagesResponse = response.json().await?;
        let text = body
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<String>();

        if text.is_empty() {
            return Err(Error::Protocol("anthropic returned no text".to_string()));
        }

        debug!(provider = "anthropic", chars = text.len(), "Completion received");
        Ok(text)
    }
}
