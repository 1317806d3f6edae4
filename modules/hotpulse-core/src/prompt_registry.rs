use std::path::{Path, PathBuf};

use ai_client::Message;
use tracing::debug;

use crate::error::{HotpulseError, HotpulseResult};
use crate::file_config::FileConfig;
use crate::template::{truncate_content, PromptTemplate};

/// Allowed runtime variables per prompt type.
const SYSTEM_RUNTIME_VARS: &[&str] = &[];
const LABELING_USER_RUNTIME_VARS: &[&str] = &["content"];
const KEYWORD_RUNTIME_VARS: &[&str] = &["keyword", "content"];
const CORRELATION_RUNTIME_VARS: &[&str] = &["all_summaries"];

/// Loads prompt files named in the TOML config, relative to its directory.
#[derive(Debug, Clone)]
pub struct PromptRegistry {
    config: FileConfig,
    config_dir: PathBuf,
    toml_value: toml::Value,
}

impl PromptRegistry {
    pub fn new(config: &FileConfig, config_dir: &Path, toml_value: toml::Value) -> Self {
        Self {
            config: config.clone(),
            config_dir: config_dir.to_path_buf(),
            toml_value,
        }
    }

    /// Prompts for labeling single posts (batch and spot check).
    pub fn labeling(&self) -> HotpulseResult<LabelingPrompts> {
        let prompts = &self.config.prompts;
        Ok(LabelingPrompts {
            system: self.load(&prompts.labeling, "labeling", SYSTEM_RUNTIME_VARS)?,
            user: PromptTemplate::new(
                "labeling_user",
                &prompts.labeling_user,
                &self.toml_value,
                LABELING_USER_RUNTIME_VARS,
            )?,
            max_text_length: self.config.limits.max_text_length,
        })
    }

    /// Prompts for the two-phase keyword summary.
    pub fn summary(&self) -> HotpulseResult<SummaryPrompts> {
        let prompts = &self.config.prompts;
        Ok(SummaryPrompts {
            system: self.load(&prompts.system, "system", SYSTEM_RUNTIME_VARS)?,
            keyword: self.load(&prompts.keyword, "keyword", KEYWORD_RUNTIME_VARS)?,
            correlation: self.load(&prompts.correlation, "correlation", CORRELATION_RUNTIME_VARS)?,
            max_text_length: self.config.limits.max_text_length,
        })
    }

    /// Absolute path of the labeling prompt file (rewritten by context injection).
    pub fn labeling_path(&self) -> PathBuf {
        self.config_dir.join(&self.config.prompts.labeling)
    }

    /// Load a prompt file, resolve config-time variables, and validate.
    fn load(
        &self,
        relative_path: &Path,
        prompt_name: &str,
        allowed_runtime: &[&str],
    ) -> HotpulseResult<PromptTemplate> {
        let full_path = self.config_dir.join(relative_path);
        let content = std::fs::read_to_string(&full_path).map_err(|e| {
            HotpulseError::Config(format!(
                "Failed to read {} prompt file {}: {e}",
                prompt_name,
                full_path.display()
            ))
        })?;

        if content.trim().is_empty() {
            return Err(HotpulseError::Config(format!(
                "Prompt file is empty: {} ({})",
                full_path.display(),
                prompt_name
            )));
        }

        debug!(prompt = prompt_name, path = %full_path.display(), "Prompt loaded");
        PromptTemplate::new(prompt_name, &content, &self.toml_value, allowed_runtime)
    }
}

// =============================================================================
// Labeling
// =============================================================================

#[derive(Debug, Clone)]
pub struct LabelingPrompts {
    system: PromptTemplate,
    user: PromptTemplate,
    max_text_length: usize,
}

impl LabelingPrompts {
    pub fn new(system: PromptTemplate, user: PromptTemplate, max_text_length: usize) -> Self {
        Self {
            system,
            user,
            max_text_length,
        }
    }

    /// Rendered (system, user) pair for one post.
    pub fn render(&self, content: &str) -> HotpulseResult<(String, String)> {
        let content = truncate_content(content, self.max_text_length);
        Ok((
            self.system.render(&[])?,
            self.user.render(&[("content", &content)])?,
        ))
    }

    /// System + user messages for one post.
    pub fn messages(&self, content: &str) -> HotpulseResult<Vec<Message>> {
        let (system, user) = self.render(content)?;
        Ok(vec![Message::system(system), Message::user(user)])
    }
}

// =============================================================================
// Summary
// =============================================================================

#[derive(Debug, Clone)]
pub struct SummaryPrompts {
    system: PromptTemplate,
    keyword: PromptTemplate,
    correlation: PromptTemplate,
    max_text_length: usize,
}

impl SummaryPrompts {
    pub fn new(
        system: PromptTemplate,
        keyword: PromptTemplate,
        correlation: PromptTemplate,
        max_text_length: usize,
    ) -> Self {
        Self {
            system,
            keyword,
            correlation,
            max_text_length,
        }
    }

    pub fn max_text_length(&self) -> usize {
        self.max_text_length
    }

    /// Map-phase messages for one keyword. `content` must already be truncated.
    pub fn micro_messages(&self, keyword: &str, content: &str) -> HotpulseResult<Vec<Message>> {
        Ok(vec![
            Message::system(self.system.render(&[])?),
            Message::user(
                self.keyword
                    .render(&[("keyword", keyword), ("content", content)])?,
            ),
        ])
    }

    /// Reduce-phase messages over every keyword summary.
    pub fn macro_messages(&self, all_summaries: &str) -> HotpulseResult<Vec<Message>> {
        Ok(vec![
            Message::system(self.system.render(&[])?),
            Message::user(self.correlation.render(&[("all_summaries", all_summaries)])?),
        ])
    }
}
