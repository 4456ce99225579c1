//! In-memory registry of conversations and their panel positions.
//!
//! Every mutation that the panel can observe posts its event through the
//! [`Bridge`] before returning, so callers holding the store lock get
//! "mutate + notify" as one step.

use std::collections::BTreeMap;
use std::sync::Arc;

use assistant_core::{
    AssistantError, BridgeEvent, Conversation, ConversationId, Position, Result, Role, Verbosity,
    MAX_PINNED,
};

use crate::bridge::Bridge;

pub struct ConversationStore {
    conversations: BTreeMap<ConversationId, Conversation>,
    current: ConversationId,
    next_id: ConversationId,
    bridge: Arc<dyn Bridge>,
    default_model: String,
    default_verbosity: Verbosity,
}

impl ConversationStore {
    /// Store holding pinned conversation 1, focused.
    pub fn new(bridge: Arc<dyn Bridge>, default_model: impl Into<String>, default_verbosity: Verbosity) -> Self {
        let mut store = Self {
            conversations: BTreeMap::new(),
            current: ConversationId::new(1),
            next_id: ConversationId::new(1),
            bridge,
            default_model: default_model.into(),
            default_verbosity,
        };
        let id = store.create(Position::Pinned(1));
        store.current = id;
        store
    }

    pub fn current(&self) -> ConversationId {
        self.current
    }

    pub fn get(&self, id: ConversationId) -> Option<&Conversation> {
        self.conversations.get(&id)
    }

    pub fn get_mut(&mut self, id: ConversationId) -> Option<&mut Conversation> {
        self.conversations.get_mut(&id)
    }

    pub fn contains(&self, id: ConversationId) -> bool {
        self.conversations.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Existing conversation `id`, or a new one under that identity in the
    /// lowest free pinned position (ad hoc when all are taken).
    pub fn get_or_create(&mut self, id: ConversationId) -> &mut Conversation {
        if !self.conversations.contains_key(&id) {
            let position = self.lowest_free_pinned().unwrap_or(Position::AdHoc);
            if self.next_id <= id {
                self.next_id = id.next();
            }
            self.insert(Conversation::new(id, position));
        }
        self.conversations.entry(id).or_insert_with(|| Conversation::new(id, Position::AdHoc))
    }

    /// Occupied pinned positions, ascending.
    pub fn pinned_positions(&self) -> Vec<u8> {
        let mut positions: Vec<u8> = self
            .conversations
            .values()
            .filter_map(|c| match c.position {
                Position::Pinned(n) => Some(n),
                Position::AdHoc => None,
            })
            .collect();
        positions.sort_unstable();
        positions
    }

    /// Conversation holding pinned position `n`.
    pub fn at_position(&self, n: u8) -> Option<ConversationId> {
        self.conversations
            .values()
            .find(|c| c.position == Position::Pinned(n))
            .map(|c| c.id)
    }

    /// Fresh conversation in the lowest free pinned position.
    ///
    /// When all nine are taken, idle ad hoc conversations are reclaimed and
    /// the new conversation is ad hoc.
    pub fn allocate_pinned_slot(&mut self) -> ConversationId {
        if let Some(position) = self.lowest_free_pinned() {
            return self.create(position);
        }

        let reclaimable: Vec<ConversationId> = self
            .conversations
            .values()
            .filter(|c| c.position == Position::AdHoc && !c.in_progress())
            .map(|c| c.id)
            .collect();
        for id in reclaimable {
            log::debug!("[{}] Reclaiming idle ad hoc conversation", id);
            self.conversations.remove(&id);
            self.bridge.post(BridgeEvent::CloseConversation { conversation_id: id });
        }

        let id = self.create(Position::AdHoc);
        if !self.conversations.contains_key(&self.current) {
            self.current = id;
        }
        id
    }

    /// Focus `id`, rebuilding the panel if the focus changed.
    pub fn activate(&mut self, id: ConversationId) -> Result<()> {
        if !self.conversations.contains_key(&id) {
            return Err(AssistantError::ConversationNotFound(id));
        }
        if self.current != id {
            log::debug!("[{}] Activating conversation", id);
            self.current = id;
            self.notify_full_state(id);
        }
        Ok(())
    }

    /// Resend the whole focused conversation.
    pub fn refresh(&self) {
        self.notify_full_state(self.current);
    }

    /// Remove `id`. Returns the conversation focused afterwards.
    pub fn close(&mut self, id: ConversationId) -> Result<ConversationId> {
        let removed = self
            .conversations
            .remove(&id)
            .ok_or(AssistantError::ConversationNotFound(id))?;
        self.bridge.post(BridgeEvent::CloseConversation { conversation_id: id });
        if removed.position.is_pinned() {
            self.post_slots();
        }

        if self.current == id {
            let next = match self.next_occupied_after(removed.position.number()) {
                Some(next) => next,
                None => self.allocate_pinned_slot(),
            };
            self.current = next;
            self.notify_full_state(next);
        }

        Ok(self.current)
    }

    /// Replace `id` with an empty conversation in the same position.
    ///
    /// Conversation-level settings survive; the identity does not.
    pub fn clear(&mut self, id: ConversationId) -> Result<ConversationId> {
        let removed = self
            .conversations
            .remove(&id)
            .ok_or(AssistantError::ConversationNotFound(id))?;
        self.bridge.post(BridgeEvent::CloseConversation { conversation_id: id });

        let new_id = self.fresh_id();
        let mut fresh = Conversation::new(new_id, removed.position);
        fresh.model = removed.model;
        fresh.verbosity = removed.verbosity;
        fresh.autoscroll = removed.autoscroll;
        self.conversations.insert(new_id, fresh);

        if self.current == id {
            self.current = new_id;
            self.notify_full_state(new_id);
        }
        Ok(new_id)
    }

    /// Move an ad hoc conversation to the lowest free pinned position.
    pub fn promote(&mut self, id: ConversationId) -> bool {
        let Some(position) = self.lowest_free_pinned() else {
            return false;
        };
        match self.conversations.get_mut(&id) {
            Some(conversation) if conversation.position == Position::AdHoc => {
                log::debug!("[{}] Promoting ad hoc conversation to {:?}", id, position);
                conversation.position = position;
                self.post_slots();
                true
            }
            _ => false,
        }
    }

    /// Keep messages `0..=index` of `id`.
    ///
    /// An index past the last message keeps everything and the panel is told
    /// the last index instead.
    pub fn truncate_after(&mut self, id: ConversationId, index: usize) -> Result<()> {
        let conversation = self
            .conversations
            .get_mut(&id)
            .ok_or(AssistantError::ConversationNotFound(id))?;
        let keep = index.saturating_add(1).min(conversation.messages.len());
        conversation.messages.truncate(keep);
        self.bridge.post(BridgeEvent::Truncate {
            conversation_id: id,
            nr: keep.saturating_sub(1),
        });
        Ok(())
    }

    fn fresh_id(&mut self) -> ConversationId {
        let id = self.next_id;
        self.next_id = id.next();
        id
    }

    fn create(&mut self, position: Position) -> ConversationId {
        let id = self.fresh_id();
        self.insert(Conversation::new(id, position));
        id
    }

    fn insert(&mut self, conversation: Conversation) {
        let pinned = conversation.position.is_pinned();
        self.conversations.insert(conversation.id, conversation);
        if pinned {
            self.post_slots();
        }
    }

    fn lowest_free_pinned(&self) -> Option<Position> {
        let taken = self.pinned_positions();
        (1..=MAX_PINNED)
            .find(|n| !taken.contains(n))
            .and_then(Position::pinned)
    }

    fn next_occupied_after(&self, number: u8) -> Option<ConversationId> {
        (number + 1..=MAX_PINNED)
            .chain(1..number.min(MAX_PINNED + 1))
            .find_map(|n| self.at_position(n))
    }

    fn post_slots(&self) {
        self.bridge.post(BridgeEvent::UpdateSlots {
            positions: self.pinned_positions(),
        });
    }

    fn notify_full_state(&self, id: ConversationId) {
        let Some(conversation) = self.conversations.get(&id) else {
            return;
        };

        self.bridge.post(BridgeEvent::UpdateSettings {
            conversation_id: id,
            model: conversation
                .model
                .clone()
                .unwrap_or_else(|| self.default_model.clone()),
            verbosity: conversation.verbosity.unwrap_or(self.default_verbosity),
        });
        self.bridge.post(BridgeEvent::ShowConversation { conversation_id: id });
        self.bridge.post(BridgeEvent::ShowInProgress {
            conversation_id: id,
            in_progress: conversation.in_progress(),
        });
        self.bridge.post(BridgeEvent::Truncate {
            conversation_id: id,
            nr: 0,
        });

        for (nr, message) in conversation.messages.iter().enumerate() {
            if message.role == Role::System {
                continue;
            }
            self.bridge.post(BridgeEvent::AddChatMessage {
                conversation_id: id,
                nr,
                role: message.role,
                content: message.raw_content.clone(),
                verbosity: message.verbosity,
                model: message.model.clone(),
            });
        }
    }
}
