//! Core types for token budget management.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while accounting tokens.
///
/// All of these are produced locally, before any request leaves the process.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BudgetError {
    /// Prompt leaves no room for a response.
    #[error("This conversation uses {tokens_used} tokens. After applying the max_tokens setting of {limit} and the token limit of {model} ({context_window}), there are no tokens left to send. Clear the conversation, send less code, or raise max_tokens. If you are hitting the model's limit of {context_window} tokens, switch to a model that accepts more tokens.")]
    BudgetExceeded {
        model: String,
        /// Effective ceiling: the smaller of `max_tokens` and the context window.
        limit: u32,
        context_window: u32,
        tokens_used: u32,
    },

    /// No descriptor registered for the model.
    #[error("Unknown model '{0}': add it to model_limits in the configuration")]
    UnknownModel(String),

    /// The tokenizer for the model could not be loaded.
    #[error("No tokenizer available for model '{model}': {reason}")]
    Tokenizer { model: String, reason: String },
}

/// Token usage reported to the input box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCount {
    /// Tokens already consumed by the conversation.
    pub messages: u32,
    /// Tokens the pending user input (and selection) would add.
    pub user_input: u32,
    /// Lower bound of the next request's prompt size.
    pub min_total: u32,
}
