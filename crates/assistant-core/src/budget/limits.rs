//! Model context window registry.
//!
//! Built-in descriptors for the chat models offered by default, with user
//! overrides taking priority. Lookups are exact: a model without a descriptor
//! is a configuration problem, not something to guess around.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::types::BudgetError;

/// Built-in models: `(name, context window, hard completion cap)`.
pub const BUILTIN_MODELS: &[(&str, u32, Option<u32>)] = &[
    ("gpt-3.5-turbo", 4_096, None),
    ("gpt-3.5-turbo-16k", 16_384, None),
    ("gpt-4", 8_192, None),
    ("gpt-4-32k", 32_768, None),
    ("gpt-4-1106-preview", 128_000, Some(4_096)),
    ("gpt-4-turbo", 128_000, Some(4_096)),
];

/// Token limits of one backend model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    /// Maximum input plus output tokens.
    pub context_window: u32,
    /// Maximum output tokens regardless of context.
    #[serde(default)]
    pub max_completion_tokens: Option<u32>,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>, context_window: u32) -> Self {
        Self {
            name: name.into(),
            context_window,
            max_completion_tokens: None,
        }
    }

    pub fn with_completion_cap(mut self, cap: u32) -> Self {
        self.max_completion_tokens = Some(cap);
        self
    }

    /// Tokens left for the response once `prompt_tokens_used` are spent.
    ///
    /// Fails iff the prompt fills the whole context window; the result is
    /// clipped by the completion cap.
    pub fn remaining_tokens(&self, prompt_tokens_used: u32) -> Result<u32, BudgetError> {
        if prompt_tokens_used >= self.context_window {
            return Err(self.exceeded(self.context_window, prompt_tokens_used));
        }
        let left = self.context_window - prompt_tokens_used;
        Ok(self.clip(left))
    }

    /// `max_tokens` for a request, honouring the user's limits.
    ///
    /// The ceiling is the smaller of `max_tokens` and the context window; the
    /// answer is further bounded by `max_response_tokens` and the completion
    /// cap, and is always at least one token.
    pub fn plan_completion(
        &self,
        prompt_tokens_used: u32,
        max_tokens: u32,
        max_response_tokens: u32,
    ) -> Result<u32, BudgetError> {
        let ceiling = max_tokens.min(self.context_window);
        if prompt_tokens_used >= ceiling {
            return Err(self.exceeded(ceiling, prompt_tokens_used));
        }
        let left = self.clip(ceiling - prompt_tokens_used).min(max_response_tokens);
        if left == 0 {
            return Err(self.exceeded(ceiling, prompt_tokens_used));
        }
        Ok(left)
    }

    fn clip(&self, tokens: u32) -> u32 {
        match self.max_completion_tokens {
            Some(cap) => tokens.min(cap),
            None => tokens,
        }
    }

    fn exceeded(&self, limit: u32, tokens_used: u32) -> BudgetError {
        BudgetError::BudgetExceeded {
            model: self.name.clone(),
            limit,
            context_window: self.context_window,
            tokens_used,
        }
    }
}

/// Registry of model descriptors with built-in defaults and user overrides.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    /// User-provided overrides (higher priority than built-in)
    user_models: HashMap<String, ModelDescriptor>,
}

impl ModelRegistry {
    /// Create a new registry with built-in defaults only.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_overrides(overrides: impl IntoIterator<Item = ModelDescriptor>) -> Self {
        let mut registry = Self::new();
        for descriptor in overrides {
            registry.add(descriptor);
        }
        registry
    }

    /// Add a user override.
    pub fn add(&mut self, descriptor: ModelDescriptor) {
        self.user_models.insert(descriptor.name.clone(), descriptor);
    }

    /// Descriptor for `model`, user overrides first.
    pub fn get(&self, model: &str) -> Result<ModelDescriptor, BudgetError> {
        if let Some(descriptor) = self.user_models.get(model) {
            return Ok(descriptor.clone());
        }

        BUILTIN_MODELS
            .iter()
            .find(|(name, _, _)| *name == model)
            .map(|(name, context_window, cap)| ModelDescriptor {
                name: name.to_string(),
                context_window: *context_window,
                max_completion_tokens: *cap,
            })
            .ok_or_else(|| BudgetError::UnknownModel(model.to_string()))
    }

    /// [`ModelDescriptor::remaining_tokens`] by model name.
    pub fn remaining_tokens(&self, model: &str, prompt_tokens_used: u32) -> Result<u32, BudgetError> {
        self.get(model)?.remaining_tokens(prompt_tokens_used)
    }

    /// Every model name the registry can resolve.
    pub fn model_names(&self) -> Vec<String> {
        let mut names: Vec<String> = BUILTIN_MODELS
            .iter()
            .map(|(name, _, _)| name.to_string())
            .chain(self.user_models.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}
