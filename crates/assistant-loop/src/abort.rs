use std::collections::HashMap;

use assistant_core::ConversationId;
use tokio_util::sync::CancellationToken;

/// What an abort handle belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AbortKey {
    Conversation(ConversationId),
    Action(String),
}

/// Token handed out by [`AbortHandles::register`].
///
/// The generation ties a release to the registration that produced it, so a
/// late release never drops a newer handle for the same key.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    pub key: AbortKey,
    pub token: CancellationToken,
    generation: u64,
}

/// At most one cancellation token per key.
#[derive(Debug, Default)]
pub struct AbortHandles {
    handles: HashMap<AbortKey, (u64, CancellationToken)>,
    generation: u64,
}

impl AbortHandles {
    pub fn new() -> Self {
        Self::default()
    }

    /// New handle for `key`, or `None` if one is already registered.
    pub fn register(&mut self, key: AbortKey) -> Option<AbortHandle> {
        if self.handles.contains_key(&key) {
            return None;
        }
        self.generation += 1;
        let token = CancellationToken::new();
        self.handles
            .insert(key.clone(), (self.generation, token.clone()));
        Some(AbortHandle {
            key,
            token,
            generation: self.generation,
        })
    }

    /// Cancel and remove the handle for `key`.
    pub fn cancel(&mut self, key: &AbortKey) -> bool {
        match self.handles.remove(key) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel the handle for `key` but keep it registered until its owner
    /// releases it.
    pub fn trigger(&self, key: &AbortKey) -> bool {
        match self.handles.get(key) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether `handle` is still the one registered for its key.
    pub fn is_current(&self, handle: &AbortHandle) -> bool {
        matches!(self.handles.get(&handle.key), Some((generation, _)) if *generation == handle.generation)
    }

    /// Remove `handle` if it is still the registered one.
    pub fn release(&mut self, handle: &AbortHandle) {
        if self.is_current(handle) {
            self.handles.remove(&handle.key);
        }
    }

    pub fn contains(&self, key: &AbortKey) -> bool {
        self.handles.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
