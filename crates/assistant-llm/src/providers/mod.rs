//! Completion backends.

pub(crate) mod common;
pub mod openai;

pub use openai::OpenAIProvider;
