pub mod bridge;
pub mod budget;
pub mod config;
pub mod conversation;
pub mod error;
pub mod prompts;

pub use bridge::{BridgeCommand, BridgeEvent, ChatIndex};
pub use budget::{
    BudgetError, EncoderProvider, ModelDescriptor, ModelRegistry, TiktokenProvider,
    TokenAccountant, TokenCount, TokenEncoder,
};
pub use config::AssistantConfig;
pub use conversation::{
    Conversation, ConversationId, Message, Position, Role, Verbosity, AD_HOC_POSITION, MAX_PINNED,
};
pub use error::{AssistantError, Result};
pub use prompts::PromptTemplate;
