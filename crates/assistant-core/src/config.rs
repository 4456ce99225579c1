use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::budget::{ModelDescriptor, ModelRegistry};
use crate::conversation::Verbosity;
use crate::error::AssistantError;
use crate::prompts::PromptTemplate;

/// Model used when neither the request, the conversation nor the
/// configuration names one.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

pub const DEFAULT_SYSTEM_CONTEXT: &str = "You are a helpful programming assistant inside a code editor. Answer accurately and only do what is asked. Format your answers with GitHub Flavored Markdown and put code in fenced code blocks tagged with their language.";

const CONFIG_FILE_PATH: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub organization: Option<String>,
    pub model: String,
    pub verbosity: Verbosity,
    pub temperature: f32,
    pub top_p: f32,
    /// Upper bound on prompt plus response tokens.
    pub max_tokens: u32,
    /// Upper bound on response tokens; defaults to `max_tokens`.
    pub max_response_tokens: Option<u32>,
    pub system_context: String,
    /// Minimum interval between streamed panel updates, in milliseconds.
    pub throttle_ms: u64,
    pub notify_on_response: bool,
    /// Extra or overriding model descriptors.
    pub model_limits: Vec<ModelDescriptor>,
    /// Prompt commands, `[scopes] Title: prompt`.
    pub prompts: Vec<String>,
}

fn app_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".code-assistant")
}

fn config_json_path() -> PathBuf {
    app_dir().join("config.json")
}

fn parse_bool_env(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: None,
            organization: None,
            model: DEFAULT_MODEL.to_string(),
            verbosity: Verbosity::Normal,
            temperature: 0.9,
            top_p: 1.0,
            max_tokens: 4096,
            max_response_tokens: None,
            system_context: DEFAULT_SYSTEM_CONTEXT.to_string(),
            throttle_ms: 100,
            notify_on_response: false,
            model_limits: Vec::new(),
            prompts: Vec::new(),
        }
    }
}

impl AssistantConfig {
    /// Load `~/.code-assistant/config.json`, else `./config.toml`, then apply
    /// environment overrides.
    pub fn new() -> Self {
        let mut config = Self::load_from(&config_json_path(), Path::new(CONFIG_FILE_PATH));
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// File layer only: the JSON file wins, the TOML file is the fallback,
    /// unreadable or malformed files are skipped.
    pub fn load_from(json_path: &Path, toml_path: &Path) -> Self {
        if json_path.exists() {
            match std::fs::read_to_string(json_path)
                .map_err(|e| e.to_string())
                .and_then(|content| serde_json::from_str::<Self>(&content).map_err(|e| e.to_string()))
            {
                Ok(config) => {
                    log::info!("Loaded configuration from {:?}", json_path);
                    return config;
                }
                Err(e) => log::warn!("Ignoring configuration at {:?}: {}", json_path, e),
            }
        }

        if toml_path.exists() {
            match std::fs::read_to_string(toml_path)
                .map_err(|e| e.to_string())
                .and_then(|content| toml::from_str::<Self>(&content).map_err(|e| e.to_string()))
            {
                Ok(config) => {
                    log::info!("Loaded configuration from {:?}", toml_path);
                    return config;
                }
                Err(e) => log::warn!("Ignoring configuration at {:?}: {}", toml_path, e),
            }
        }

        Self::default()
    }

    /// Environment layer. `lookup` is `std::env::var` outside of tests.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(api_key) = lookup("API_KEY") {
            self.api_key = Some(api_key);
        }
        if let Some(api_base) = lookup("API_BASE") {
            self.api_base = Some(api_base);
        }
        if let Some(organization) = lookup("OPENAI_ORGANIZATION") {
            self.organization = Some(organization);
        }
        if let Some(model) = lookup("MODEL") {
            self.model = model;
        }
        if let Some(throttle) = lookup("CHAT_THROTTLE_MS") {
            match throttle.trim().parse() {
                Ok(ms) => self.throttle_ms = ms,
                Err(_) => log::warn!("Ignoring CHAT_THROTTLE_MS={:?}", throttle),
            }
        }
        if let Some(notify) = lookup("CHAT_NOTIFY_ON_RESPONSE") {
            self.notify_on_response = parse_bool_env(&notify);
        }
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn effective_max_response_tokens(&self) -> u32 {
        self.max_response_tokens.unwrap_or(self.max_tokens)
    }

    pub fn model_registry(&self) -> ModelRegistry {
        ModelRegistry::with_overrides(self.model_limits.iter().cloned())
    }

    /// Parsed prompt commands; the first malformed entry is an error.
    pub fn prompt_templates(&self) -> Result<Vec<PromptTemplate>, AssistantError> {
        self.prompts.iter().map(|entry| PromptTemplate::parse(entry)).collect()
    }

    /// Fails when the configured default model has no descriptor.
    pub fn validate(&self) -> Result<(), AssistantError> {
        self.model_registry().get(&self.model)?;
        self.prompt_templates()?;
        Ok(())
    }
}
