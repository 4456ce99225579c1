//! chat_state - Request lifecycle state machine for chat conversations
//!
//! Every conversation owns one [`StateMachine`]. A conversation is busy
//! exactly while its machine sits in [`RequestState::Requesting`]; the
//! transition table refuses a second `RequestStarted` in that state, which is
//! what keeps a conversation to a single in-flight completion.

pub mod machine;

// Re-export commonly used types
pub use machine::{RequestEvent, RequestState, StateMachine, StateTransition, TransitionError};
