//! State machine module
//!
//! Contains the FSM implementation for the request lifecycle.

mod events;
mod states;
mod transitions;

pub use events::RequestEvent;
pub use states::RequestState;
pub use transitions::{StateMachine, StateTransition, TransitionError};
