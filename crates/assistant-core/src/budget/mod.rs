//! Token budget management for chat requests.
//!
//! # Key Components
//!
//! - [`counter`]: the Token Accountant, counting message and conversation tokens
//! - [`encoder`]: tokenizer seam and the centralized tokenizer alias table
//! - [`limits`]: model descriptors, remaining-token and request planning
//! - [`types`]: `BudgetError` and `TokenCount`

pub mod counter;
pub mod encoder;
pub mod limits;
pub mod types;

pub use counter::{TokenAccountant, REPLY_PRIMING_TOKENS, TOKENS_PER_MESSAGE};
pub use encoder::{tokenizer_model, EncoderProvider, TiktokenProvider, TokenEncoder};
pub use limits::{ModelDescriptor, ModelRegistry, BUILTIN_MODELS};
pub use types::{BudgetError, TokenCount};
