use crate::error::{HotpulseError, HotpulseResult};

pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
pub const DEFAULT_MODEL: &str = "qwen-plus";

/// Application configuration loaded from environment variables.
/// Contains only the credential and endpoint; tunables, prompts and paths
/// live in the TOML FileConfig.
#[derive(Clone)]
pub struct AppConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &self.api_key.as_deref().map(preview))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let config = Self {
            api_key: std::env::var("DASHSCOPE_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            base_url: std::env::var("HOTPULSE_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            model: std::env::var("HOTPULSE_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
        };

        config.log_keys();
        config
    }

    /// Explicit construction for tests and embedding callers.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// The API key, or a configuration error for commands that call the model.
    pub fn require_api_key(&self) -> HotpulseResult<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| HotpulseError::Config("DASHSCOPE_API_KEY is not set".to_string()))
    }

    fn log_keys(&self) {
        tracing::info!("Config loaded:");
        tracing::info!(
            "  DASHSCOPE_API_KEY: {}",
            self.api_key.as_deref().map(preview).unwrap_or_else(|| "<not set>".to_string())
        );
        tracing::info!("  HOTPULSE_BASE_URL: {}", self.base_url);
        tracing::info!("  HOTPULSE_MODEL: {}", self.model);
    }
}

fn preview(val: &str) -> String {
    let head: String = val.chars().take(5).collect();
    format!("{}...({} chars)", head, val.chars().count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_api_key_errors_when_unset() {
        let config = AppConfig {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        };
        let err = config.require_api_key().unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn debug_output_redacts_key() {
        let config = AppConfig::new("sk-abcdefghijklmnop", "qwen-max");
        let rendered = format!("{config:?}");
        assert!(rendered.contains("sk-ab...(19 chars)"));
        assert!(!rendered.contains("sk-abcdefghijklmnop"));
    }
}
