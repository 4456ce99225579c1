//! Request events - Defines events that trigger state transitions

use serde::{Deserialize, Serialize};

/// Defines the events that can trigger state transitions in the FSM.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestEvent {
    /// A new completion request was issued.
    RequestStarted,

    /// The completion stream (or single response) finished.
    ResponseCompleted,

    /// The completion failed.
    RequestFailed { error: String },

    /// The user stopped the completion, or its task went away.
    RequestCancelled,

    /// The settled outcome has been handled; return to idle.
    Reset,
}

impl RequestEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RequestEvent::RequestStarted => "request_started",
            RequestEvent::ResponseCompleted => "response_completed",
            RequestEvent::RequestFailed { .. } => "request_failed",
            RequestEvent::RequestCancelled => "request_cancelled",
            RequestEvent::Reset => "reset",
        }
    }
}
