use std::sync::Arc;
use std::time::Duration;

use ai_client::{AiError, ChatAgent, Message};
use async_trait::async_trait;
use tracing::warn;

use hotpulse_core::file_config::LimitsConfig;

/// Wraps a [`ChatAgent`] with a fixed number of attempts and a fixed delay
/// between them. Every failure is retried until attempts run out.
#[derive(Clone)]
pub struct RetryingClient {
    inner: Arc<dyn ChatAgent>,
    max_attempts: u32,
    delay: Duration,
}

impl RetryingClient {
    pub fn new(inner: Arc<dyn ChatAgent>, max_attempts: u32, delay: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn from_limits(inner: Arc<dyn ChatAgent>, limits: &LimitsConfig) -> Self {
        Self::new(inner, limits.max_retries, limits.retry_delay())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[async_trait]
impl ChatAgent for RetryingClient {
    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn chat(&self, messages: &[Message], temperature: f32) -> Result<String, AiError> {
        let mut attempt = 1;
        loop {
            match self.inner.chat(messages, temperature).await {
                Ok(reply) => return Ok(reply),
                Err(e) if attempt < self.max_attempts => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        transient = e.is_transient(),
                        error = %e,
                        "Model call failed, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(attempts = attempt, error = %e, "Model call failed, giving up");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedAgent;

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let agent = Arc::new(ScriptedAgent::new("ok").fail_first(2));
        let client = RetryingClient::new(agent.clone(), 3, Duration::ZERO);

        let reply = client.chat(&[Message::user("hi")], 0.3).await.unwrap();
        assert_eq!(reply, "ok");
        assert_eq!(agent.call_count(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let agent = Arc::new(ScriptedAgent::new("ok").fail_first(5));
        let client = RetryingClient::new(agent.clone(), 3, Duration::ZERO);

        assert!(client.chat(&[Message::user("hi")], 0.3).await.is_err());
        assert_eq!(agent.call_count(), 3);
    }

    #[tokio::test]
    async fn zero_attempts_still_calls_once() {
        let agent = Arc::new(ScriptedAgent::new("ok"));
        let client = RetryingClient::new(agent.clone(), 0, Duration::ZERO);

        assert_eq!(client.chat(&[Message::user("hi")], 0.3).await.unwrap(), "ok");
        assert_eq!(agent.call_count(), 1);
    }
}
