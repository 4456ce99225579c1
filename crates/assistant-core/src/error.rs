use thiserror::Error;

use crate::budget::BudgetError;
use crate::conversation::ConversationId;

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("{0}")]
    BudgetExceeded(BudgetError),

    #[error("Transport failure{}: {detail}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Transport { status: Option<u16>, detail: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Conversation {0} is still waiting for a response")]
    ConversationBusy(ConversationId),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(ConversationId),

    #[error("Action '{0}' is already running")]
    ActionBusy(String),
}

impl From<BudgetError> for AssistantError {
    fn from(err: BudgetError) -> Self {
        match err {
            BudgetError::UnknownModel(_) | BudgetError::Tokenizer { .. } => {
                AssistantError::Configuration(err.to_string())
            }
            exceeded @ BudgetError::BudgetExceeded { .. } => AssistantError::BudgetExceeded(exceeded),
        }
    }
}

pub type Result<T> = std::result::Result<T, AssistantError>;
