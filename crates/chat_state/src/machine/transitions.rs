//! State transitions - FSM transition logic
//!
//! Implements the state machine that handles event-driven state transitions.

use thiserror::Error;

use super::events::RequestEvent;
use super::states::RequestState;

/// Error type for invalid state transitions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransitionError {
    #[error("Invalid transition from {from:?} with event {event}")]
    InvalidTransition { from: RequestState, event: String },
}

/// Represents a state transition result.
#[derive(Debug, Clone)]
pub struct StateTransition {
    /// The state before the transition.
    pub from: RequestState,
    /// The state after the transition.
    pub to: RequestState,
    /// The event that triggered the transition.
    pub event: RequestEvent,
}

/// State machine for a single conversation's request lifecycle.
#[derive(Debug, Clone)]
pub struct StateMachine {
    /// Current state.
    current_state: RequestState,
    /// Transition history (limited).
    history: Vec<StateTransition>,
    /// Max history entries to keep.
    max_history: usize,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a new state machine in Idle state.
    pub fn new() -> Self {
        Self {
            current_state: RequestState::Idle,
            history: Vec::new(),
            max_history: 50,
        }
    }

    /// Create a state machine with a specific initial state.
    pub fn with_state(state: RequestState) -> Self {
        Self {
            current_state: state,
            history: Vec::new(),
            max_history: 50,
        }
    }

    /// Get the current state.
    pub fn state(&self) -> &RequestState {
        &self.current_state
    }

    /// Get the transition history.
    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Handle an event and transition to a new state.
    ///
    /// Events that make no sense in the current state are rejected and leave
    /// the machine untouched.
    pub fn handle_event(&mut self, event: RequestEvent) -> Result<StateTransition, TransitionError> {
        let old_state = self.current_state.clone();
        let new_state = Self::compute_next_state(&old_state, &event).ok_or_else(|| {
            TransitionError::InvalidTransition {
                from: old_state.clone(),
                event: event.name().to_string(),
            }
        })?;

        tracing::debug!("request state {:?} -> {:?} on {}", old_state, new_state, event.name());
        self.current_state = new_state.clone();

        let transition = StateTransition {
            from: old_state,
            to: new_state,
            event,
        };

        // Add to history
        self.history.push(transition.clone());
        if self.history.len() > self.max_history {
            self.history.remove(0);
        }

        Ok(transition)
    }

    /// Compute the next state given current state and event.
    fn compute_next_state(state: &RequestState, event: &RequestEvent) -> Option<RequestState> {
        use RequestEvent::*;
        use RequestState::*;

        let next = match (state, event) {
            (Idle, RequestStarted) => Requesting,

            (Requesting, ResponseCompleted) => Completed,
            (Requesting, RequestFailed { error }) => Failed {
                error_message: error.clone(),
                failed_at: chrono::Utc::now().to_rfc3339(),
            },
            (Requesting, RequestCancelled) => Cancelled,

            (Completed | Failed { .. } | Cancelled, Reset) => Idle,
            (Idle, Reset) => Idle,

            _ => return None,
        };
        Some(next)
    }

    /// Check if a transition is valid without executing it.
    pub fn can_transition(&self, event: &RequestEvent) -> bool {
        Self::compute_next_state(&self.current_state, event).is_some()
    }

    /// Reset to Idle state.
    pub fn reset(&mut self) {
        self.current_state = RequestState::Idle;
    }
}
