use assistant_core::{Conversation, Message};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

use crate::error::LLMError;
use crate::options::RequestOptions;

pub type Result<T> = std::result::Result<T, LLMError>;

/// Incremental text deltas of one streamed completion.
///
/// Single pass: once it yields `None` it is finished for good.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Non-streaming completion; returns a finished assistant message.
    ///
    /// The conversation's messages are sent as role/content pairs; the
    /// token budget is checked before any request is made.
    async fn complete(&self, conversation: &Conversation, options: &RequestOptions) -> Result<Message>;

    /// Streaming completion.
    ///
    /// Cancelling `cancel` ends the stream at the next fragment boundary
    /// without an error.
    async fn stream(
        &self,
        conversation: &Conversation,
        cancel: CancellationToken,
        options: &RequestOptions,
    ) -> Result<FragmentStream>;
}
