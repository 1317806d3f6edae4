use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HotpulseError, HotpulseResult};

/// TOML-backed configuration loaded from disk.
/// Secrets (API key) stay as env vars. Every section is optional and falls
/// back to the defaults below.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub identity: IdentityConfig,
    pub sampling: SamplingConfig,
    pub limits: LimitsConfig,
    pub spot_check: SpotCheckConfig,
    pub columns: ColumnsConfig,
    pub prompts: PromptsConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdentityConfig {
    /// Platform the posts were harvested from; available to prompts as
    /// `{{config.identity.platform}}`.
    pub platform: String,
    pub language: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            platform: "Weibo".to_string(),
            language: "zh".to_string(),
        }
    }
}

/// Per-stage sampling temperatures.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SamplingConfig {
    pub labeling_temperature: f32,
    pub micro_temperature: f32,
    pub macro_temperature: f32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            labeling_temperature: 0.3,
            micro_temperature: 0.3,
            macro_temperature: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Maximum characters of post content per request. 0 disables truncation.
    pub max_text_length: usize,
    /// Total attempts per interactive call, first attempt included.
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    /// Interactive calls in flight at once during a spot check.
    pub concurrency: usize,
    /// Log a progress line every N units.
    pub progress_every: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_text_length: 25_000,
            max_retries: 3,
            retry_delay_secs: 2,
            concurrency: 1,
            progress_every: 100,
        }
    }
}

impl LimitsConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpotCheckConfig {
    pub sample_size: usize,
    pub seed: u64,
}

impl Default for SpotCheckConfig {
    fn default() -> Self {
        Self {
            sample_size: 20,
            seed: 42,
        }
    }
}

/// Column names of the harvested post CSV.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColumnsConfig {
    pub id: String,
    pub content: String,
    pub keyword: String,
    pub likes: String,
    pub comments: String,
    pub reposts: String,
}

impl Default for ColumnsConfig {
    fn default() -> Self {
        Self {
            id: "id".to_string(),
            content: "content".to_string(),
            keyword: "keyword".to_string(),
            likes: "likes".to_string(),
            comments: "comments".to_string(),
            reposts: "reposts".to_string(),
        }
    }
}

/// Prompt files, relative to the config file's directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PromptsConfig {
    pub system: PathBuf,
    pub labeling: PathBuf,
    pub keyword: PathBuf,
    pub correlation: PathBuf,
    /// Inline user-message template for labeling a single post.
    pub labeling_user: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            system: PathBuf::from("prompts/sys_prompt.txt"),
            labeling: PathBuf::from("prompts/labeling_prompt.txt"),
            keyword: PathBuf::from("prompts/keyword_prompt.txt"),
            correlation: PathBuf::from("prompts/correlation_prompt.txt"),
            labeling_user: "Label the following post:\n{{content}}".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub posts: PathBuf,
    pub context_posts: PathBuf,
    pub deduped_posts: PathBuf,
    pub batch_requests: PathBuf,
    pub batch_results: PathBuf,
    pub labeled: PathBuf,
    pub spot_check: PathBuf,
    pub stage1: PathBuf,
    pub report: PathBuf,
    pub knowledge: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            posts: PathBuf::from("data/post_list.csv"),
            context_posts: PathBuf::from("data/context_posts.csv"),
            deduped_posts: PathBuf::from("data/post_list_deduped.csv"),
            batch_requests: PathBuf::from("data/batch_list.jsonl"),
            batch_results: PathBuf::from("data/batch_results_raw.jsonl"),
            labeled: PathBuf::from("data/batch_results_final.csv"),
            spot_check: PathBuf::from("data/labeling_test_results.csv"),
            stage1: PathBuf::from("data/stage1_keyword_analysis.csv"),
            report: PathBuf::from("data/stage2_correlation_analysis_report.md"),
            knowledge: PathBuf::from("data/final_context_knowledge_base.txt"),
        }
    }
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> HotpulseResult<FileConfig> {
    let content = read_config(path)?;
    toml::from_str(&content).map_err(|e| {
        HotpulseError::Config(format!("Failed to parse config file {}: {e}", path.display()))
    })
}

/// Load the raw TOML value tree (for `{{config.*}}` template resolution).
pub fn load_toml_value(path: &Path) -> HotpulseResult<toml::Value> {
    let content = read_config(path)?;
    content.parse().map_err(|e| {
        HotpulseError::Config(format!("Failed to parse config as TOML {}: {e}", path.display()))
    })
}

fn read_config(path: &Path) -> HotpulseResult<String> {
    std::fs::read_to_string(path).map_err(|e| {
        HotpulseError::Config(format!("Failed to read config file {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert_eq!(config.limits.max_text_length, 25_000);
        assert_eq!(config.limits.max_retries, 3);
        assert_eq!(config.sampling.macro_temperature, 0.5);
        assert_eq!(config.spot_check.seed, 42);
        assert_eq!(config.columns.id, "id");
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config: FileConfig = toml::from_str(
            r#"
            [limits]
            max_text_length = 500

            [columns]
            content = "微博正文"
            keyword = "关键词"
            "#,
        )
        .unwrap();
        assert_eq!(config.limits.max_text_length, 500);
        assert_eq!(config.limits.retry_delay(), Duration::from_secs(2));
        assert_eq!(config.columns.content, "微博正文");
        assert_eq!(config.columns.id, "id");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: Result<FileConfig, _> = toml::from_str("[limits]\nmax_txt_length = 5\n");
        assert!(result.is_err());
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = load_config(Path::new("/nonexistent/hotpulse.toml")).unwrap_err();
        assert!(err.is_config());
    }
}
