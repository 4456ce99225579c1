use assistant_core::{AssistantError, BudgetError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LLMError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error(transparent)]
    Budget(#[from] BudgetError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LLMError {
    /// HTTP status attached to the failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            LLMError::Api { status, .. } => Some(*status),
            LLMError::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl From<LLMError> for AssistantError {
    fn from(err: LLMError) -> Self {
        let status = err.status();
        match err {
            LLMError::Budget(budget) => budget.into(),
            LLMError::Config(message) => AssistantError::Configuration(message),
            LLMError::Api { message, .. } => AssistantError::Transport {
                status,
                detail: message,
            },
            other => AssistantError::Transport {
                status,
                detail: other.to_string(),
            },
        }
    }
}
