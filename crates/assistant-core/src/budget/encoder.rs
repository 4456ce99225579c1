//! Tokenizer seam.
//!
//! Counting goes through [`EncoderProvider`] so the BPE tables are loaded for
//! one accounting call and dropped at its end, and so tests can swap in a
//! deterministic encoder.

use tiktoken_rs::CoreBPE;

use super::types::BudgetError;

/// Models the tokenizer library does not know, mapped to the sibling whose
/// encoding they share.
pub const TOKENIZER_ALIASES: &[(&str, &str)] = &[
    ("gpt-3.5-turbo-16k", "gpt-3.5-turbo"),
    ("gpt-4-1106-preview", "gpt-4"),
    ("gpt-4-turbo", "gpt-4"),
];

/// Model name to hand to the tokenizer for `model`.
pub fn tokenizer_model(model: &str) -> &str {
    TOKENIZER_ALIASES
        .iter()
        .find(|(alias, _)| *alias == model)
        .map(|(_, target)| *target)
        .unwrap_or(model)
}

/// Encodes text and reports its length in tokens.
pub trait TokenEncoder {
    fn encoded_len(&self, text: &str) -> u32;
}

/// Hands out an encoder for a model.
pub trait EncoderProvider: Send + Sync {
    fn encoder_for(&self, model: &str) -> Result<Box<dyn TokenEncoder>, BudgetError>;
}

impl TokenEncoder for CoreBPE {
    fn encoded_len(&self, text: &str) -> u32 {
        self.encode_with_special_tokens(text).len() as u32
    }
}

/// BPE encoders from `tiktoken-rs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TiktokenProvider;

impl EncoderProvider for TiktokenProvider {
    fn encoder_for(&self, model: &str) -> Result<Box<dyn TokenEncoder>, BudgetError> {
        let target = tokenizer_model(model);
        let bpe = tiktoken_rs::get_bpe_from_model(target).map_err(|e| BudgetError::Tokenizer {
            model: model.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Box::new(bpe))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_map_to_known_siblings() {
        assert_eq!(tokenizer_model("gpt-3.5-turbo-16k"), "gpt-3.5-turbo");
        assert_eq!(tokenizer_model("gpt-4-1106-preview"), "gpt-4");
        assert_eq!(tokenizer_model("gpt-4"), "gpt-4");
        assert_eq!(tokenizer_model("some-other-model"), "some-other-model");
    }

    #[test]
    fn tiktoken_counts_cl100k_tokens() {
        let encoder = TiktokenProvider.encoder_for("gpt-3.5-turbo").expect("encoder");
        assert_eq!(encoder.encoded_len("hello world"), 2);
        assert_eq!(encoder.encoded_len(""), 0);
    }

    #[test]
    fn tiktoken_resolves_aliased_model() {
        let encoder = TiktokenProvider.encoder_for("gpt-4-1106-preview").expect("encoder");
        assert_eq!(encoder.encoded_len("user"), 1);
    }
}
