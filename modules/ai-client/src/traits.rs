use async_trait::async_trait;

use crate::error::AiError;

// =============================================================================
// Message Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

// =============================================================================
// ChatAgent Trait
// =============================================================================

/// A single-shot chat completion backend.
///
/// Implemented by [`crate::OpenAi`] for any OpenAI-compatible endpoint and by
/// scripted fakes in tests. One call is one attempt: retry policy belongs to
/// the caller.
#[async_trait]
pub trait ChatAgent: Send + Sync {
    /// Model identifier sent with every request.
    fn model(&self) -> &str;

    /// Send `messages` and return the assistant's reply text.
    async fn chat(&self, messages: &[Message], temperature: f32) -> Result<String, AiError>;
}
