pub mod abort;
pub mod bridge;
pub mod dispatch;
pub mod editor;
pub mod export;
pub mod inline;
pub mod orchestrator;
pub mod store;
pub mod stream;

pub use abort::{AbortHandle, AbortHandles, AbortKey};
pub use bridge::{Bridge, ChannelBridge};
pub use dispatch::Dispatcher;
pub use editor::{Editor, NoopEditor, Selection};
pub use export::to_markdown;
pub use inline::{extract_code_block, InlineEdits, TrackedRange};
pub use orchestrator::{
    Orchestrator, OrchestratorConfig, PromptOptions, RequestOutcome, CONTINUE_PROMPT,
};
pub use store::ConversationStore;
