//! Request option resolution.
//!
//! Each setting is taken from the first source that has it:
//!
//! 1. the request itself ([`RequestOptions`]),
//! 2. the conversation (model only),
//! 3. the provider defaults ([`ProviderDefaults`]),
//! 4. the built-in default ([`assistant_core::config::DEFAULT_MODEL`]).

use assistant_core::config::DEFAULT_MODEL;
use assistant_core::{AssistantConfig, Conversation};

/// Per-request overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub max_response_tokens: Option<u32>,
}

impl RequestOptions {
    pub fn with_model(model: Option<String>) -> Self {
        Self {
            model,
            ..Default::default()
        }
    }

    pub fn resolve(&self, conversation: &Conversation, defaults: &ProviderDefaults) -> ResolvedOptions {
        let model = self
            .model
            .clone()
            .or_else(|| conversation.model.clone())
            .or_else(|| defaults.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let max_tokens = self.max_tokens.unwrap_or(defaults.max_tokens);
        ResolvedOptions {
            model,
            temperature: self.temperature.unwrap_or(defaults.temperature),
            top_p: self.top_p.unwrap_or(defaults.top_p),
            max_tokens,
            max_response_tokens: self
                .max_response_tokens
                .or(defaults.max_response_tokens)
                .unwrap_or(max_tokens),
        }
    }
}

/// Provider-level fallbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderDefaults {
    pub model: Option<String>,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub max_response_tokens: Option<u32>,
}

impl Default for ProviderDefaults {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.9,
            top_p: 1.0,
            max_tokens: 4096,
            max_response_tokens: None,
        }
    }
}

impl From<&AssistantConfig> for ProviderDefaults {
    fn from(config: &AssistantConfig) -> Self {
        Self {
            model: Some(config.model.clone()),
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
            max_response_tokens: config.max_response_tokens,
        }
    }
}

/// Fully resolved settings for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOptions {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub max_response_tokens: u32,
}
