pub mod config;
pub mod error;
pub mod file_config;
pub mod prompt_registry;
pub mod template;
pub mod types;

pub use config::AppConfig;
pub use error::{HotpulseError, HotpulseResult};
pub use file_config::FileConfig;
pub use prompt_registry::{LabelingPrompts, PromptRegistry, SummaryPrompts};
pub use template::{truncate_content, PromptTemplate, TRUNCATION_MARKER};
pub use types::*;
