//! OpenAI-compatible chat completions (OpenAI, Groq)

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Completer, check_status};
use crate::config::LlmConfig;
use crate::{Error, Result};

/// Client for `POST {base_url}/chat/completions`
pub struct OpenAiCompleter {
    client: Client,
    url: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
    provider: &'static str,
}

impl OpenAiCompleter {
    /// Create a completer from configuration
    #[must_use]
    pub fn new(client: Client, config: &LlmConfig, api_key: String) -> Self {
        Self {
            client,
            url: format!("{}/chat/completions", config.base_url()),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            provider: config.provider.as_str(),
        }
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[async_trait]
impl Completer for OpenAiCompleter {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        };

        let response = self
            .client
            .post(&self.url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await?;
        let response = check_status(response, self.provider).await?;

        let body: ChatResponse = response.json().await?;
        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Protocol(format!("{} returned no completion", self.provider)))?;

        debug!(provider = self.provider, chars = text.len(), "Completion received");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmProvider;
    use serde_json::json;

    #[test]
    fn url_uses_provider_base() {
        let config = LlmConfig {
            provider: LlmProvider::OpenAi,
            ..Default::default()
        };
        let c = OpenAiCompleter::new(Client::new(), &config, "k".into());
        assert_eq!(c.url, "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn request_body_shape() {
        let request = ChatRequest {
            model: "llama3-8b-8192",
            messages: [ChatMessage {
                role: "user",
                content: "hi",
            }],
            temperature: 0.0,
            max_tokens: 16,
            stream: false,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "model": "llama3-8b-8192",
                "messages": [{"role": "user", "content": "hi"}],
                "temperature": 0.0,
                "max_tokens": 16,
                "stream": false
            })
        );
    }

    #[test]
    fn response_content_is_read() {
        let body: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"role": "assistant", "content": "short"}}]
        }))
        .unwrap();
        assert_eq!(body.choices[0].message.content.as_deref(), Some("short"));
    }
}
