use serde::{Deserialize, Serialize};

use crate::traits::{Message, MessageRole};

// =============================================================================
// Chat Completion
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl WireMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
        }
    }

}

impl From<&Message> for WireMessage {
    fn from(msg: &Message) -> Self {
        match msg.role {
            MessageRole::System => WireMessage::system(&msg.content),
            MessageRole::User => WireMessage::user(&msg.content),
        }
    }
}

// =============================================================================
// Chat Request
// =============================================================================

/// Body of a `/chat/completions` call. Also the `body` of every batch request line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            temperature: None,
        }
    }

    pub fn message(mut self, message: WireMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn messages(mut self, messages: impl IntoIterator<Item = WireMessage>) -> Self {
        self.messages.extend(messages);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

// =============================================================================
// Chat Response
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl ChatResponse {
    /// True when the first choice stopped at the token limit.
    pub fn hit_length_limit(&self) -> bool {
        self.choices
            .first()
            .and_then(|c| c.finish_reason.as_deref())
            == Some("length")
    }

    /// Content of the first choice, if any.
    pub fn first_content(self) -> Option<String> {
        self.choices.into_iter().next().and_then(|c| c.message.content)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: WireMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_without_unset_fields() {
        let request = ChatRequest::new("qwen-plus")
            .message(WireMessage::system("sys"))
            .message(WireMessage::user("hi"))
            .temperature(0.3);

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "qwen-plus");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "hi");
        assert_eq!(value["temperature"], serde_json::json!(0.3f32));

        let bare = serde_json::to_value(ChatRequest::new("qwen-plus")).unwrap();
        assert!(bare.get("temperature").is_none());
    }

    #[test]
    fn length_cut_replies_are_flagged() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"{\"topic\":"},"finish_reason":"length"}],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#;
        let response: ChatResponse = serde_json::from_str(raw).unwrap();
        assert!(response.hit_length_limit());
        assert_eq!(response.usage.as_ref().map(|u| u.total_tokens), Some(15));
    }

    #[test]
    fn response_first_content() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"ok"},"finish_reason":"stop"}]}"#;
        let response: ChatResponse = serde_json::from_str(raw).unwrap();
        assert!(!response.hit_length_limit());
        assert_eq!(response.first_content().as_deref(), Some("ok"));
    }
}
