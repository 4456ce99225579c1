//! OpenAI-compatible request serialization and response parsing.
//!
//! Only `role` and `content` leave the process; every other message field
//! (`raw_content`, `verbosity`, `name`) stays local.

use assistant_core::Message;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::LLMError;
use crate::options::ResolvedOptions;
use crate::provider::Result;

/// Convert messages to an OpenAI-compatible JSON array.
pub fn messages_to_openai_compat_json(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            json!({
                "role": m.role.as_str(),
                "content": m.content,
            })
        })
        .collect()
}

/// Build a chat completions request body.
pub fn build_openai_compat_body(
    options: &ResolvedOptions,
    messages: &[Message],
    max_tokens: u32,
    stream: bool,
) -> Value {
    json!({
        "model": options.model,
        "messages": messages_to_openai_compat_json(messages),
        "max_tokens": max_tokens,
        "temperature": options.temperature,
        "top_p": options.top_p,
        "stream": stream,
    })
}

// --- streaming chunks ---

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}

/// What one SSE `data:` payload means for the fragment stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseData {
    Fragment(String),
    Skip,
    Done,
}

/// Parse an SSE `data:` payload.
///
/// Malformed payloads and empty deltas are skipped; an inline `error`
/// object fails the stream.
pub fn parse_openai_compat_sse_data(data: &str) -> Result<SseData> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(SseData::Skip);
    }
    if data == "[DONE]" {
        return Ok(SseData::Done);
    }

    let chunk = match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk,
        Err(err) => {
            log::warn!("Skipping malformed stream payload: {} ({})", data, err);
            return Ok(SseData::Skip);
        }
    };

    if let Some(error) = chunk.error {
        return Err(LLMError::Stream(error.message));
    }

    match chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
        Some(content) if !content.is_empty() => Ok(SseData::Fragment(content)),
        _ => Ok(SseData::Skip),
    }
}

// --- non-streaming responses ---

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Pull the assistant text out of a non-streaming response body.
pub fn parse_openai_compat_completion(body: &str) -> Result<String> {
    let response: CompletionResponse = serde_json::from_str(body)?;
    response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content.unwrap_or_default())
        .ok_or_else(|| LLMError::Stream("completion response contained no choices".to_string()))
}

// --- errors ---

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

/// Human-readable message for a failed HTTP response.
///
/// Prefers `{"error": {"message": ...}}`, then the raw body, then the
/// status reason.
pub fn extract_error_message(status: reqwest::StatusCode, body: &str) -> String {
    if let Ok(envelope) = serde_json::from_str::<ApiErrorEnvelope>(body) {
        if !envelope.error.message.is_empty() {
            return envelope.error.message;
        }
    }

    let body = body.trim();
    if !body.is_empty() {
        return body.to_string();
    }

    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}
