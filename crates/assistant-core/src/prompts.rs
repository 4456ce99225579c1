//! Configured prompt commands.
//!
//! Entries look like `[rust,python] Explain: Explain what this code does`.
//! The bracketed scope list is optional; the keyword `inline` in it marks a
//! command whose answer replaces the selection in place.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::AssistantError;

static TEMPLATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\s*\[(.*?)\])?\s*(.*?)\s*:\s*(.*?)\s*$").expect("prompt template pattern")
});

const INLINE_SCOPE: &str = "inline";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub title: String,
    pub prompt: String,
    /// Language ids the command is offered for; empty means every language.
    pub languages: Vec<String>,
    pub inline: bool,
}

impl PromptTemplate {
    pub fn parse(entry: &str) -> Result<Self, AssistantError> {
        let malformed = || {
            AssistantError::Configuration(format!(
                "malformed prompt template '{entry}': expected '[scopes] Title: prompt'"
            ))
        };

        let captures = TEMPLATE_RE.captures(entry).ok_or_else(malformed)?;
        let title = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
        let prompt = captures.get(3).map(|m| m.as_str()).unwrap_or_default();
        if title.is_empty() || prompt.is_empty() {
            return Err(malformed());
        }

        let scopes: Vec<String> = captures
            .get(1)
            .map(|m| {
                m.as_str()
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let inline = scopes.iter().any(|s| s == INLINE_SCOPE);
        let languages = scopes.into_iter().filter(|s| s != INLINE_SCOPE).collect();

        Ok(Self {
            title: title.to_string(),
            prompt: prompt.to_string(),
            languages,
            inline,
        })
    }

    /// Whether the command should be offered for a document in `language`.
    pub fn applies_to(&self, language: &str) -> bool {
        self.languages.is_empty() || self.languages.iter().any(|l| l == language)
    }
}
