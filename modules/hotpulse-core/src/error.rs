use thiserror::Error;

#[derive(Error, Debug)]
pub enum HotpulseError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required column '{column}' in {source_name}")]
    MissingColumn { column: String, source_name: String },

    #[error("Template error: {0}")]
    Template(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Ai(#[from] ai_client::AiError),
}

impl HotpulseError {
    /// Configuration-class errors end the run with a non-zero status.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            HotpulseError::Config(_)
                | HotpulseError::MissingColumn { .. }
                | HotpulseError::Template(_)
        )
    }
}

pub type HotpulseResult<T> = std::result::Result<T, HotpulseError>;
