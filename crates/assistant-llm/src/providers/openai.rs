use std::sync::Arc;

use assistant_core::{
    AssistantConfig, Conversation, Message, ModelRegistry, TiktokenProvider, TokenAccountant,
};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::common::openai_compat::{
    build_openai_compat_body, extract_error_message, parse_openai_compat_completion,
};
use super::common::sse::fragment_stream_from_sse;
use crate::error::LLMError;
use crate::options::{ProviderDefaults, RequestOptions};
use crate::provider::{CompletionClient, FragmentStream, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Strip trailing slashes and any `/chat` or `/chat/completions` suffix.
pub fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let trimmed = trimmed
        .strip_suffix("/chat/completions")
        .or_else(|| trimmed.strip_suffix("/chat"))
        .unwrap_or(trimmed)
        .trim_end_matches('/');

    if trimmed.is_empty() {
        DEFAULT_BASE_URL.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Client for OpenAI-compatible chat completions endpoints.
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    base_url: String,
    organization: Option<String>,
    defaults: ProviderDefaults,
    accountant: TokenAccountant,
    registry: ModelRegistry,
}

impl OpenAIProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            organization: None,
            defaults: ProviderDefaults::default(),
            accountant: TokenAccountant::default(),
            registry: ModelRegistry::new(),
        }
    }

    pub fn from_config(config: &AssistantConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| LLMError::Config("API key is not configured".to_string()))?;

        let mut provider = Self::new(api_key)
            .with_defaults(ProviderDefaults::from(config))
            .with_accountant(TokenAccountant::new(
                Arc::new(TiktokenProvider),
                config.model.clone(),
            ))
            .with_registry(config.model_registry())
            .with_organization(config.organization.clone());

        if let Some(base) = &config.api_base {
            provider = provider.with_base_url(base);
        }

        Ok(provider)
    }

    pub fn with_base_url(mut self, url: impl AsRef<str>) -> Self {
        self.base_url = normalize_base_url(url.as_ref());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.defaults.model = Some(model.into());
        self
    }

    pub fn with_organization(mut self, organization: Option<String>) -> Self {
        self.organization = organization.filter(|o| !o.trim().is_empty());
        self
    }

    pub fn with_defaults(mut self, defaults: ProviderDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_accountant(mut self, accountant: TokenAccountant) -> Self {
        self.accountant = accountant;
        self
    }

    pub fn with_registry(mut self, registry: ModelRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve options and run the budget gate. No network traffic happens
    /// here, so an over-budget request never reaches the backend.
    fn prepare(
        &self,
        conversation: &Conversation,
        options: &RequestOptions,
        stream: bool,
    ) -> Result<(String, Value)> {
        let resolved = options.resolve(conversation, &self.defaults);
        let descriptor = self.registry.get(&resolved.model)?;
        let prompt_tokens = self
            .accountant
            .count_messages_tokens(&conversation.messages, &resolved.model)?;
        let max_tokens = descriptor.plan_completion(
            prompt_tokens,
            resolved.max_tokens,
            resolved.max_response_tokens,
        )?;

        log::debug!(
            "[{}] model={} prompt_tokens={} max_tokens={} stream={}",
            conversation.id,
            resolved.model,
            prompt_tokens,
            max_tokens,
            stream
        );

        let body = build_openai_compat_body(&resolved, &conversation.messages, max_tokens, stream);
        Ok((resolved.model, body))
    }

    async fn send(&self, body: &Value) -> Result<Response> {
        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body);

        if let Some(organization) = &self.organization {
            request = request.header("OpenAI-Organization", organization);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let message = extract_error_message(status, &text);
            log::warn!("Completion request failed ({}): {}", status, message);
            return Err(LLMError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionClient for OpenAIProvider {
    async fn complete(&self, conversation: &Conversation, options: &RequestOptions) -> Result<Message> {
        let (model, body) = self.prepare(conversation, options, false)?;
        let response = self.send(&body).await?;
        let text = response.text().await?;
        let content = parse_openai_compat_completion(&text)?;

        Ok(Message::assistant(content).with_model(Some(model)))
    }

    async fn stream(
        &self,
        conversation: &Conversation,
        cancel: CancellationToken,
        options: &RequestOptions,
    ) -> Result<FragmentStream> {
        let (_model, body) = self.prepare(conversation, options, true)?;
        let response = self.send(&body).await?;
        Ok(fragment_stream_from_sse(response, cancel))
    }
}
