pub mod error;
pub mod options;
pub mod provider;
pub mod providers;

pub use error::LLMError;
pub use options::{ProviderDefaults, RequestOptions, ResolvedOptions};
pub use provider::{CompletionClient, FragmentStream, Result};
pub use providers::openai::{normalize_base_url, OpenAIProvider};
