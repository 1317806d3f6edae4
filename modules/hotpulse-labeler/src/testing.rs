// Test fakes for the pipeline.
//
// ScriptedAgent (ChatAgent) replies from a needle→reply table so no test
// touches the network. Builder pattern: `.on()`, `.fail_on()`, `.fail_first()`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use ai_client::{AiError, ChatAgent, Message};
use async_trait::async_trait;

use hotpulse_core::Record;

// ---------------------------------------------------------------------------
// ScriptedAgent
// ---------------------------------------------------------------------------

enum Reply {
    Text(String),
    Fail,
}

/// Replies with the first rule whose needle appears in the last message,
/// else with the default reply.
pub struct ScriptedAgent {
    default_reply: String,
    rules: Vec<(String, Reply)>,
    fail_first: AtomicUsize,
    calls: Mutex<Vec<(Vec<Message>, f32)>>,
}

impl ScriptedAgent {
    pub fn new(default_reply: impl Into<String>) -> Self {
        Self {
            default_reply: default_reply.into(),
            rules: Vec::new(),
            fail_first: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn on(mut self, needle: &str, reply: &str) -> Self {
        self.rules
            .push((needle.to_string(), Reply::Text(reply.to_string())));
        self
    }

    /// Every call whose last message contains `needle` fails.
    pub fn fail_on(mut self, needle: &str) -> Self {
        self.rules.push((needle.to_string(), Reply::Fail));
        self
    }

    /// The first `n` calls fail regardless of content.
    pub fn fail_first(self, n: usize) -> Self {
        self.fail_first.store(n, Ordering::SeqCst);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    /// Every call made, in order, as (messages, temperature).
    pub fn calls(&self) -> Vec<(Vec<Message>, f32)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Content of the last message of every call, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|(messages, _)| messages.last().map(|m| m.content.clone()))
            .collect()
    }
}

#[async_trait]
impl ChatAgent for ScriptedAgent {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, messages: &[Message], temperature: f32) -> Result<String, AiError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((messages.to_vec(), temperature));
        }

        let pending = self.fail_first.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_first.store(pending - 1, Ordering::SeqCst);
            return Err(AiError::Api {
                status: 503,
                body: "scripted outage".to_string(),
            });
        }

        let prompt = messages.last().map(|m| m.content.as_str()).unwrap_or_default();
        match self.rules.iter().find(|(needle, _)| prompt.contains(needle.as_str())) {
            Some((_, Reply::Text(text))) => Ok(text.clone()),
            Some((needle, Reply::Fail)) => Err(AiError::Api {
                status: 500,
                body: format!("scripted failure for '{needle}'"),
            }),
            None => Ok(self.default_reply.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A post under `keyword`.
pub fn post(id: &str, keyword: &str, content: &str) -> Record {
    Record::new(id, content).with_keyword(keyword)
}
