//! Request states - Defines all possible states of a conversation's request

use serde::{Deserialize, Serialize};

/// Lifecycle of the completion request attached to a conversation.
///
/// `Completed`, `Failed` and `Cancelled` are settled states: the orchestrator
/// records how the request ended and then resets the machine to `Idle`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    /// No request in flight, ready to accept one.
    #[default]
    Idle,

    /// A completion is being requested or streamed.
    Requesting,

    /// The completion finished normally.
    Completed,

    /// The completion failed.
    Failed {
        /// User-facing failure text.
        error_message: String,
        /// RFC 3339 timestamp of the failure.
        failed_at: String,
    },

    /// The completion was stopped by the user.
    Cancelled,
}

impl RequestState {
    /// True while a request is in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, RequestState::Requesting)
    }

    /// True for the three outcomes a request can settle in.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            RequestState::Completed | RequestState::Failed { .. } | RequestState::Cancelled
        )
    }
}
