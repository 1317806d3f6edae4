mod client;
pub mod types;

use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

use crate::error::AiError;
use crate::traits::{ChatAgent, Message};

use client::{OpenAiClient, OPENAI_API_URL};
use types::{ChatRequest, WireMessage};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

// =============================================================================
// OpenAi Agent
// =============================================================================

/// Chat agent for any OpenAI-compatible endpoint (OpenAI, DashScope
/// compatible-mode, local gateways). Credentials are passed in, never read
/// from process-wide state.
#[derive(Clone)]
pub struct OpenAi {
    api_key: String,
    model: String,
    base_url: String,
    http: reqwest::Client,
}

impl OpenAi {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, AiError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AiError::Config("API key is empty".to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| AiError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            api_key,
            model: model.into(),
            base_url: OPENAI_API_URL.to_string(),
            http,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Get the API base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn client(&self) -> OpenAiClient {
        OpenAiClient::new(&self.api_key, self.http.clone()).with_base_url(&self.base_url)
    }

    /// Build the request body sent for `messages`.
    pub fn request(&self, messages: &[Message], temperature: f32) -> ChatRequest {
        ChatRequest::new(&self.model)
            .messages(messages.iter().map(WireMessage::from))
            .temperature(temperature)
    }
}

// =============================================================================
// ChatAgent Implementation
// =============================================================================

#[async_trait]
impl ChatAgent for OpenAi {
    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: &[Message], temperature: f32) -> Result<String, AiError> {
        let request = self.request(messages, temperature);
        let response = self.client().chat(&request).await?;
        if response.hit_length_limit() {
            warn!(model = %self.model, "Reply cut off at the token limit");
        }

        match response.first_content() {
            Some(content) if !content.trim().is_empty() => Ok(content),
            _ => Err(AiError::EmptyResponse(self.model.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_new() {
        let ai = OpenAi::new("sk-test", "qwen-plus").unwrap();
        assert_eq!(ai.model(), "qwen-plus");
        assert_eq!(ai.api_key, "sk-test");
        assert_eq!(ai.base_url(), OPENAI_API_URL);
    }

    #[test]
    fn test_openai_rejects_empty_key() {
        assert!(matches!(OpenAi::new("  ", "qwen-plus"), Err(AiError::Config(_))));
    }

    #[test]
    fn test_openai_with_base_url() {
        let ai = OpenAi::new("sk-test", "qwen-plus")
            .unwrap()
            .with_base_url("https://dashscope.aliyuncs.com/compatible-mode/v1");
        assert_eq!(ai.base_url(), "https://dashscope.aliyuncs.com/compatible-mode/v1");
    }

    #[test]
    fn test_request_carries_messages_in_order() {
        let ai = OpenAi::new("sk-test", "qwen-plus").unwrap();
        let request = ai.request(&[Message::system("sys"), Message::user("post")], 0.3);
        assert_eq!(request.model, "qwen-plus");
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0], WireMessage::system("sys"));
        assert_eq!(request.temperature, Some(0.3));
    }
}
