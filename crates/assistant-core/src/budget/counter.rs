//! Token counting for budget management.
//!
//! Follows the chat-completion framing convention: every message costs a
//! fixed priming overhead plus its encoded role and content, and the reply is
//! primed with a fixed number of tokens.

use std::sync::Arc;

use crate::conversation::{Conversation, Message};

use super::encoder::{EncoderProvider, TiktokenProvider, TokenEncoder};
use super::types::{BudgetError, TokenCount};

/// Per-message framing overhead.
pub const TOKENS_PER_MESSAGE: u32 = 4;
/// Tokens priming the assistant's reply.
pub const REPLY_PRIMING_TOKENS: u32 = 3;
/// Allowance for the instructions wrapped around an editor selection.
pub const SELECTION_CONTEXT_TOKENS: u32 = 40;

/// Counts tokens for messages and conversations.
///
/// Cheap to clone; the encoder provider is shared.
#[derive(Clone)]
pub struct TokenAccountant {
    provider: Arc<dyn EncoderProvider>,
    default_model: String,
}

impl std::fmt::Debug for TokenAccountant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAccountant")
            .field("default_model", &self.default_model)
            .finish_non_exhaustive()
    }
}

impl Default for TokenAccountant {
    fn default() -> Self {
        Self::new(Arc::new(TiktokenProvider), crate::config::DEFAULT_MODEL)
    }
}

impl TokenAccountant {
    pub fn new(provider: Arc<dyn EncoderProvider>, default_model: impl Into<String>) -> Self {
        Self {
            provider,
            default_model: default_model.into(),
        }
    }

    /// Model used for conversations that do not name one.
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn count_message_tokens(&self, message: &Message, model: &str) -> Result<u32, BudgetError> {
        let encoder = self.provider.encoder_for(model)?;
        Ok(message_tokens(encoder.as_ref(), message))
    }

    /// Prompt size of `messages` under `model`, reply priming included.
    pub fn count_messages_tokens(&self, messages: &[Message], model: &str) -> Result<u32, BudgetError> {
        let encoder = self.provider.encoder_for(model)?;
        let total = messages
            .iter()
            .map(|m| message_tokens(encoder.as_ref(), m))
            .fold(0u32, |acc, x| acc.saturating_add(x));
        Ok(total.saturating_add(REPLY_PRIMING_TOKENS))
    }

    /// Prompt size of a whole conversation under its own model.
    pub fn count_conversation_tokens(&self, conversation: &Conversation) -> Result<u32, BudgetError> {
        let model = conversation.model.as_deref().unwrap_or(&self.default_model);
        self.count_messages_tokens(&conversation.messages, model)
    }

    /// Encoded length of bare text.
    pub fn count_prompt_tokens(&self, text: &str, model: &str) -> Result<u32, BudgetError> {
        let encoder = self.provider.encoder_for(model)?;
        Ok(encoder.encoded_len(text))
    }

    /// Token usage shown next to the input box before sending.
    pub fn estimate_input_tokens(
        &self,
        conversation: &Conversation,
        user_input: &str,
        selection: Option<&str>,
    ) -> Result<TokenCount, BudgetError> {
        let model = conversation.model.as_deref().unwrap_or(&self.default_model);
        let encoder = self.provider.encoder_for(model)?;

        let messages = conversation
            .messages
            .iter()
            .map(|m| message_tokens(encoder.as_ref(), m))
            .fold(REPLY_PRIMING_TOKENS, |acc, x| acc.saturating_add(x));

        let mut input = message_tokens(encoder.as_ref(), &Message::user(user_input, user_input));
        if let Some(selection) = selection {
            input = input
                .saturating_add(message_tokens(encoder.as_ref(), &Message::user(selection, selection)))
                .saturating_add(SELECTION_CONTEXT_TOKENS);
        }

        Ok(TokenCount {
            messages,
            user_input: input,
            min_total: messages.saturating_add(input),
        })
    }
}

/// Framing cost of one message. A named message omits its role, saving one
/// token.
fn message_tokens(encoder: &dyn TokenEncoder, message: &Message) -> u32 {
    let mut tokens = TOKENS_PER_MESSAGE
        .saturating_add(encoder.encoded_len(message.role.as_str()))
        .saturating_add(encoder.encoded_len(&message.content));
    if let Some(name) = &message.name {
        tokens = tokens
            .saturating_add(encoder.encoded_len(name))
            .saturating_sub(1);
    }
    tokens
}
