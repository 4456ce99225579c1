use chat_state::StateMachine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Highest pinned position.
pub const MAX_PINNED: u8 = 9;
/// Display number shared by every ad hoc conversation.
pub const AD_HOC_POSITION: u8 = 10;

/// Internal, never reused key of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(u32);

impl ConversationId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User-facing slot of a conversation: a pinned tab (1-9) or ad hoc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    Pinned(u8),
    AdHoc,
}

impl Position {
    /// Pinned position `n`, if `n` is in 1..=9.
    pub fn pinned(n: u8) -> Option<Self> {
        (1..=MAX_PINNED).contains(&n).then_some(Position::Pinned(n))
    }

    /// Number shown to the user; ad hoc conversations all show 10.
    pub fn number(self) -> u8 {
        match self {
            Position::Pinned(n) => n,
            Position::AdHoc => AD_HOC_POSITION,
        }
    }

    pub fn is_pinned(self) -> bool {
        matches!(self, Position::Pinned(_))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// How much explanation the model is asked to give.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Code,
    Concise,
    #[default]
    Normal,
    Full,
}

impl Verbosity {
    /// Instruction appended to the user's prompt.
    pub fn directive(self) -> &'static str {
        match self {
            Verbosity::Code => {
                "Do not include any explanations in your answer. Only respond with the code."
            }
            Verbosity::Concise => {
                "Your explanations should be as concise and to the point as possible, one or two sentences at most."
            }
            Verbosity::Normal => "",
            Verbosity::Full => "You should give full explanations that are as detailed as possible.",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(default = "generate_id", skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub role: Role,
    /// Text sent to the backend (user) or shown in the panel (assistant).
    pub content: String,
    /// Unmodified user or model text.
    pub raw_content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbosity: Option<Verbosity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub done: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

impl Message {
    fn new(role: Role, content: String, raw_content: String, done: bool) -> Self {
        Self {
            id: generate_id(),
            role,
            content,
            raw_content,
            name: None,
            code: None,
            language: None,
            verbosity: None,
            model: None,
            done,
            created_at: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        let content = content.into();
        Self::new(Role::System, content.clone(), content, true)
    }

    /// A user turn: `content` goes to the backend, `raw_content` to the panel.
    pub fn user(content: impl Into<String>, raw_content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into(), raw_content.into(), true)
    }

    /// A finished assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        let content = content.into();
        Self::new(Role::Assistant, content.clone(), content, true)
    }

    /// Empty, not yet done assistant turn that a stream fills in.
    pub fn placeholder() -> Self {
        Self::new(Role::Assistant, String::new(), String::new(), false)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>, language: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self.language = Some(language.into()).filter(|l: &String| !l.is_empty());
        self
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = Some(verbosity);
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }
}

/// One chat thread with its request state.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: ConversationId,
    pub position: Position,
    pub messages: Vec<Message>,
    pub autoscroll: bool,
    /// Conversation-level model, overriding the configured default.
    pub model: Option<String>,
    pub verbosity: Option<Verbosity>,
    pub request: StateMachine,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: ConversationId, position: Position) -> Self {
        Self {
            id,
            position,
            messages: Vec::new(),
            autoscroll: true,
            model: None,
            verbosity: None,
            request: StateMachine::new(),
            created_at: Utc::now(),
        }
    }

    /// A conversation that lives outside the registry (inline edits, actions).
    pub fn detached() -> Self {
        Self::new(ConversationId::new(0), Position::AdHoc)
    }

    pub fn in_progress(&self) -> bool {
        self.request.state().is_active()
    }

    pub fn user_message_count(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Role::User).count()
    }
}
