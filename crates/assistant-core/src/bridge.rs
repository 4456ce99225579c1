//! Typed messages exchanged with the chat panel.
//!
//! Both directions are JSON objects tagged by a `type` field. Field names
//! follow the panel's wire format, which mixes snake_case and camelCase.

use serde::{Deserialize, Serialize};

use crate::budget::TokenCount;
use crate::conversation::{ConversationId, Role, Verbosity};

/// Events sent from the core to the panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BridgeEvent {
    /// Switch the panel to a conversation.
    ShowConversation {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
    },

    ShowInProgress {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
        #[serde(rename = "inProgress")]
        in_progress: bool,
    },

    /// Drop every rendered message after index `nr`.
    Truncate {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
        nr: usize,
    },

    /// Add the message at index `nr`, or replace it if already rendered.
    AddChatMessage {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
        nr: usize,
        role: Role,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        verbosity: Option<Verbosity>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },

    AddError {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
        value: String,
    },

    CloseConversation {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
    },

    UpdateSettings {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
        model: String,
        verbosity: Verbosity,
    },

    /// Pinned positions currently holding a conversation.
    UpdateSlots { positions: Vec<u8> },

    /// The answer stopped inside a code block; offer to continue it.
    OfferContinuation {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
    },

    /// A response finished while the user may not be looking.
    ResponseReady {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
    },

    TokenCount {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
        #[serde(rename = "tokenCount")]
        token_count: TokenCount,
    },

    ActionComplete {
        #[serde(rename = "actionId")]
        action_id: String,
        value: String,
    },

    ActionError {
        #[serde(rename = "actionId")]
        action_id: String,
        error: String,
    },
}

/// Index of the message a resent prompt replaces, or `"new"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatIndex {
    Index(usize),
    Tag(String),
}

impl ChatIndex {
    pub fn new_message() -> Self {
        ChatIndex::Tag("new".to_string())
    }

    /// Index to truncate after, or `None` to append.
    pub fn truncate_after(&self) -> Option<usize> {
        match self {
            ChatIndex::Index(index) => Some(*index),
            ChatIndex::Tag(tag) if tag == "new" => None,
            ChatIndex::Tag(tag) => tag.trim().parse().ok(),
        }
    }
}

/// Commands sent from the panel (or editor commands) to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BridgeCommand {
    SendMessage {
        conversation_id: ConversationId,
        chat_id: ChatIndex,
        message: String,
        #[serde(rename = "includeEditorSelection", default)]
        include_editor_selection: bool,
        #[serde(default)]
        verbosity: Option<Verbosity>,
        #[serde(default)]
        model: Option<String>,
    },

    RefreshChat,

    EditCode {
        value: String,
        #[serde(default)]
        language: Option<String>,
    },

    OpenNew {
        value: String,
        #[serde(default)]
        language: Option<String>,
    },

    StopGenerating {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
    },

    NewChat,

    CloseChat,

    ClearChat,

    SetChat {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
    },

    ContinueConversation {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
    },

    GetTokenCount {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
        #[serde(rename = "userInput", default)]
        user_input: String,
        #[serde(rename = "useEditorSelection", default)]
        use_editor_selection: bool,
    },

    ExportToMarkdown {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
    },

    RunAction {
        #[serde(rename = "actionId")]
        action_id: String,
        prompt: String,
    },

    StopAction {
        #[serde(rename = "actionId")]
        action_id: String,
    },
}
