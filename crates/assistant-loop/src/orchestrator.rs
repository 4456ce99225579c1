//! Request lifecycle for one conversation turn.
//!
//! `send_request` moves a conversation through
//! `Idle -> Requesting -> {Completed, Failed, Cancelled} -> Idle`. The
//! store and the abort handles share one mutex; it is never held across an
//! await, and every terminal path (including the request future being
//! dropped) ends in [`RequestGuard::drop`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use assistant_core::{
    AssistantConfig, AssistantError, BridgeEvent, Conversation, ConversationId, Message, Position,
    Result, Role, Verbosity,
};
use assistant_llm::{CompletionClient, ProviderDefaults, RequestOptions};
use chat_state::RequestEvent;

use crate::abort::{AbortHandle, AbortHandles, AbortKey};
use crate::bridge::Bridge;
use crate::inline::InlineEdits;
use crate::store::ConversationStore;
use crate::stream::handler::relay_fragments;

/// Prompt sent to finish an answer cut off inside a code block.
pub const CONTINUE_PROMPT: &str = "Continue";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub system_context: String,
    pub throttle: Duration,
    pub notify_on_response: bool,
    pub default_model: String,
    pub default_verbosity: Verbosity,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&AssistantConfig::default())
    }
}

impl From<&AssistantConfig> for OrchestratorConfig {
    fn from(config: &AssistantConfig) -> Self {
        Self {
            system_context: config.system_context.clone(),
            throttle: config.throttle(),
            notify_on_response: config.notify_on_response,
            default_model: config.model.clone(),
            default_verbosity: config.verbosity,
        }
    }
}

/// Per-request inputs besides the prompt.
#[derive(Debug, Clone, Default)]
pub struct PromptOptions {
    /// Editor selection attached to the question.
    pub code: Option<String>,
    pub language: Option<String>,
    pub verbosity: Option<Verbosity>,
    pub model: Option<String>,
    /// Drop every message after this index before sending.
    pub truncate_after: Option<usize>,
}

#[derive(Debug)]
pub enum RequestOutcome {
    Completed { content: String, continuation: bool },
    Cancelled { content: String },
    Failed { error: AssistantError, message: String },
}

pub(crate) struct Shared {
    pub(crate) store: ConversationStore,
    pub(crate) aborts: AbortHandles,
}

impl Shared {
    /// Conversation `id`, provided `handle` is still its registered request.
    ///
    /// After `close` or `clear` the id may name a newer conversation with a
    /// request of its own; a finished stale request must leave it alone.
    fn owned_by(&mut self, id: ConversationId, handle: &AbortHandle) -> Option<&mut Conversation> {
        if !self.aborts.is_current(handle) {
            log::debug!("[{}] Ignoring a request that is no longer current", id);
            return None;
        }
        self.store.get_mut(id)
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) client: Arc<dyn CompletionClient>,
    pub(crate) shared: Arc<Mutex<Shared>>,
    pub(crate) bridge: Arc<dyn Bridge>,
    pub(crate) config: Arc<OrchestratorConfig>,
    pub(crate) inline_edits: Arc<InlineEdits>,
}

impl Orchestrator {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        bridge: Arc<dyn Bridge>,
        config: OrchestratorConfig,
    ) -> Self {
        let store = ConversationStore::new(
            bridge.clone(),
            config.default_model.clone(),
            config.default_verbosity,
        );
        Self {
            client,
            shared: Arc::new(Mutex::new(Shared {
                store,
                aborts: AbortHandles::new(),
            })),
            bridge,
            config: Arc::new(config),
            inline_edits: Arc::new(InlineEdits::new()),
        }
    }

    /// Run `f` with the store locked. `f` must not block.
    pub fn with_store<R>(&self, f: impl FnOnce(&mut ConversationStore) -> R) -> R {
        f(&mut self.shared.lock().store)
    }

    pub fn current(&self) -> ConversationId {
        self.with_store(|store| store.current())
    }

    pub fn snapshot(&self, id: ConversationId) -> Option<Conversation> {
        self.with_store(|store| store.get(id).cloned())
    }

    pub fn is_in_progress(&self, id: ConversationId) -> bool {
        self.with_store(|store| store.get(id).is_some_and(Conversation::in_progress))
    }

    pub fn inline_edits(&self) -> &InlineEdits {
        &self.inline_edits
    }

    /// Allocate a pinned slot and focus it.
    pub fn new_chat(&self) -> ConversationId {
        self.with_store(|store| {
            let id = store.allocate_pinned_slot();
            // Freshly allocated, so activation cannot fail.
            let _ = store.activate(id);
            id
        })
    }

    /// Cancel any request on `id` and remove it.
    pub fn close(&self, id: ConversationId) -> Result<ConversationId> {
        let mut shared = self.shared.lock();
        shared.aborts.cancel(&AbortKey::Conversation(id));
        shared.store.close(id)
    }

    /// Cancel any request on `id` and reset it in place.
    pub fn clear(&self, id: ConversationId) -> Result<ConversationId> {
        let mut shared = self.shared.lock();
        shared.aborts.cancel(&AbortKey::Conversation(id));
        shared.store.clear(id)
    }

    /// Cancel the in-flight request on `id`, if any.
    ///
    /// The handle stays registered until the request has settled, so the
    /// request still owns its conversation while it winds down.
    pub fn stop(&self, id: ConversationId) -> bool {
        let stopped = self
            .shared
            .lock()
            .aborts
            .trigger(&AbortKey::Conversation(id));
        if stopped {
            log::info!("[{}] Stop requested", id);
        }
        stopped
    }

    /// Send `prompt` in a newly allocated slot.
    pub async fn run_command(&self, prompt: &str, options: PromptOptions) -> Result<RequestOutcome> {
        let id = self.with_store(|store| store.allocate_pinned_slot());
        self.send_request(id, prompt, options).await
    }

    /// Ask the model to finish a truncated answer.
    pub async fn continue_conversation(&self, id: ConversationId) -> Result<RequestOutcome> {
        self.send_request(id, CONTINUE_PROMPT, PromptOptions::default())
            .await
    }

    /// Stream one answer to `prompt` into conversation `id`.
    ///
    /// Fails without side effects if `id` already has a request in flight.
    /// Backend, budget and configuration failures are reported to the panel
    /// and returned as [`RequestOutcome::Failed`].
    pub async fn send_request(
        &self,
        id: ConversationId,
        prompt: &str,
        options: PromptOptions,
    ) -> Result<RequestOutcome> {
        let (snapshot, handle, model) = self.begin(id, prompt, &options)?;
        let guard = RequestGuard {
            shared: self.shared.clone(),
            bridge: self.bridge.clone(),
            id,
            handle,
        };
        let handle = &guard.handle;
        let cancel = handle.token.clone();

        let request_options = RequestOptions::with_model(Some(model.clone()));
        let stream = match self.client.stream(&snapshot, cancel.clone(), &request_options).await {
            Ok(stream) => stream,
            Err(err) => return Ok(self.fail(id, handle, err.into(), &model, String::new())),
        };

        let shared = self.shared.clone();
        let bridge = self.bridge.clone();
        let output = relay_fragments(stream, self.config.throttle, &cancel, |content| {
            let mut shared = shared.lock();
            if let Some(conversation) = shared.owned_by(id, handle) {
                let nr = conversation.messages.len().saturating_sub(1);
                if let Some(message) = conversation.messages.last_mut() {
                    message.raw_content = content.to_string();
                    message.content = content.to_string();
                    bridge.post(BridgeEvent::AddChatMessage {
                        conversation_id: id,
                        nr,
                        role: Role::Assistant,
                        content: content.to_string(),
                        verbosity: None,
                        model: message.model.clone(),
                    });
                }
            }
        })
        .await;

        log::debug!(
            "[{}] Stream ended after {} fragments ({} chars)",
            id,
            output.fragments,
            output.content.len()
        );

        let outcome = if let Some(err) = output.error {
            self.fail(id, handle, err.into(), &model, output.content)
        } else if output.cancelled || cancel.is_cancelled() {
            self.cancelled(id, handle, output.content)
        } else {
            self.complete(id, handle, output.content)
        };

        drop(guard);
        Ok(outcome)
    }

    /// Everything up to opening the stream, under one lock.
    fn begin(
        &self,
        id: ConversationId,
        prompt: &str,
        options: &PromptOptions,
    ) -> Result<(Conversation, AbortHandle, String)> {
        let mut shared = self.shared.lock();
        let Shared { store, aborts } = &mut *shared;

        let conversation = store.get_or_create(id);
        if conversation.in_progress() {
            log::warn!("[{}] Rejecting request, conversation is busy", id);
            return Err(AssistantError::ConversationBusy(id));
        }
        let promote = conversation.position == Position::AdHoc && conversation.user_message_count() > 0;

        if let Some(index) = options.truncate_after {
            store.truncate_after(id, index)?;
        }
        if promote {
            store.promote(id);
        }
        store.activate(id)?;

        let conversation = store
            .get_mut(id)
            .ok_or(AssistantError::ConversationNotFound(id))?;
        let handle = aborts
            .register(AbortKey::Conversation(id))
            .ok_or(AssistantError::ConversationBusy(id))?;

        if conversation.request.state().is_settled() {
            conversation.request.reset();
        }
        if let Err(err) = conversation.request.handle_event(RequestEvent::RequestStarted) {
            log::error!("[{}] {}", id, err);
            aborts.release(&handle);
            return Err(AssistantError::ConversationBusy(id));
        }

        let model = self.resolve_model(options.model.clone(), conversation);
        let verbosity = options
            .verbosity
            .or(conversation.verbosity)
            .unwrap_or(self.config.default_verbosity);

        if conversation.messages.is_empty() && !self.config.system_context.is_empty() {
            conversation
                .messages
                .push(Message::system(self.config.system_context.clone()));
        }

        let (formatted, raw) = format_user_message(
            prompt,
            verbosity,
            options.code.as_deref(),
            options.language.as_deref(),
        );
        let mut user = Message::user(formatted, raw).with_verbosity(verbosity);
        if let Some(code) = &options.code {
            user = user.with_code(code.clone(), options.language.clone().unwrap_or_default());
        }
        let user = user.with_model(options.model.clone());

        self.bridge.post(BridgeEvent::AddChatMessage {
            conversation_id: id,
            nr: conversation.messages.len(),
            role: Role::User,
            content: user.raw_content.clone(),
            verbosity: user.verbosity,
            model: user.model.clone(),
        });
        conversation.messages.push(user);

        self.bridge.post(BridgeEvent::ShowInProgress {
            conversation_id: id,
            in_progress: true,
        });

        let snapshot = conversation.clone();

        conversation
            .messages
            .push(Message::placeholder().with_model(options.model.clone()));
        self.bridge.post(BridgeEvent::AddChatMessage {
            conversation_id: id,
            nr: conversation.messages.len() - 1,
            role: Role::Assistant,
            content: String::new(),
            verbosity: None,
            model: options.model.clone(),
        });

        log::info!("[{}] Request started (model {})", id, model);
        Ok((snapshot, handle, model))
    }

    /// Model a request will be sent with, also named in failure messages.
    fn resolve_model(&self, requested: Option<String>, conversation: &Conversation) -> String {
        let defaults = ProviderDefaults {
            model: Some(self.config.default_model.clone()),
            ..Default::default()
        };
        RequestOptions::with_model(requested)
            .resolve(conversation, &defaults)
            .model
    }

    fn complete(&self, id: ConversationId, handle: &AbortHandle, content: String) -> RequestOutcome {
        let continuation = needs_continuation(&content);
        let display = if continuation {
            format!("{}\n```\n", content)
        } else {
            content.clone()
        };

        let mut shared = self.shared.lock();
        if let Some(conversation) = shared.owned_by(id, handle) {
            let nr = conversation.messages.len().saturating_sub(1);
            if let Some(message) = conversation.messages.last_mut() {
                message.raw_content = content.clone();
                message.content = display.clone();
                message.done = true;
                self.bridge.post(BridgeEvent::AddChatMessage {
                    conversation_id: id,
                    nr,
                    role: Role::Assistant,
                    content: display,
                    verbosity: None,
                    model: message.model.clone(),
                });
            }
            transition(conversation, RequestEvent::ResponseCompleted);

            if continuation {
                self.bridge
                    .post(BridgeEvent::OfferContinuation { conversation_id: id });
            }
            if self.config.notify_on_response {
                self.bridge
                    .post(BridgeEvent::ResponseReady { conversation_id: id });
            }
        }

        log::info!("[{}] Request completed", id);
        RequestOutcome::Completed {
            content,
            continuation,
        }
    }

    fn cancelled(&self, id: ConversationId, handle: &AbortHandle, content: String) -> RequestOutcome {
        let mut shared = self.shared.lock();
        if let Some(conversation) = shared.owned_by(id, handle) {
            if let Some(message) = conversation.messages.last_mut() {
                message.raw_content = content.clone();
                message.content = content.clone();
                message.done = true;
            }
            transition(conversation, RequestEvent::RequestCancelled);
        }

        log::info!("[{}] Request cancelled", id);
        RequestOutcome::Cancelled { content }
    }

    fn fail(
        &self,
        id: ConversationId,
        handle: &AbortHandle,
        error: AssistantError,
        model: &str,
        partial: String,
    ) -> RequestOutcome {
        let message = classify_failure(&error, model);
        log::error!("[{}] Request failed: {}", id, error);

        let mut shared = self.shared.lock();
        let Some(conversation) = shared.owned_by(id, handle) else {
            return RequestOutcome::Failed { error, message };
        };
        if partial.is_empty() {
            conversation.messages.pop();
            self.bridge.post(BridgeEvent::Truncate {
                conversation_id: id,
                nr: conversation.messages.len().saturating_sub(1),
            });
        } else if let Some(last) = conversation.messages.last_mut() {
            last.raw_content = partial.clone();
            last.content = partial;
            last.done = true;
        }
        transition(
            conversation,
            RequestEvent::RequestFailed {
                error: error.to_string(),
            },
        );
        self.bridge.post(BridgeEvent::AddError {
            conversation_id: id,
            value: message.clone(),
        });

        RequestOutcome::Failed { error, message }
    }

    /// One-shot completion outside the conversation registry.
    ///
    /// Reports `actionComplete` / `actionError`; only one action per name
    /// runs at a time.
    pub async fn run_action(&self, action_id: &str, prompt: &str) -> Result<RequestOutcome> {
        let handle = self
            .shared
            .lock()
            .aborts
            .register(AbortKey::Action(action_id.to_string()))
            .ok_or_else(|| AssistantError::ActionBusy(action_id.to_string()))?;
        let _release = ReleaseOnDrop {
            shared: self.shared.clone(),
            handle: handle.clone(),
        };

        let mut conversation = Conversation::detached();
        if !self.config.system_context.is_empty() {
            conversation
                .messages
                .push(Message::system(self.config.system_context.clone()));
        }
        conversation.messages.push(Message::user(prompt, prompt));

        log::info!("Running action '{}'", action_id);
        let model = self.resolve_model(None, &conversation);
        let options = RequestOptions::with_model(Some(model.clone()));
        let result = tokio::select! {
            _ = handle.token.cancelled() => None,
            result = self.client.complete(&conversation, &options) => Some(result),
        };

        let outcome = match result {
            None => {
                self.bridge.post(BridgeEvent::ActionError {
                    action_id: action_id.to_string(),
                    error: "Action cancelled".to_string(),
                });
                RequestOutcome::Cancelled {
                    content: String::new(),
                }
            }
            Some(Ok(message)) => {
                self.bridge.post(BridgeEvent::ActionComplete {
                    action_id: action_id.to_string(),
                    value: message.content.clone(),
                });
                RequestOutcome::Completed {
                    content: message.content,
                    continuation: false,
                }
            }
            Some(Err(err)) => {
                let error = AssistantError::from(err);
                let message = classify_failure(&error, &model);
                log::error!("Action '{}' failed: {}", action_id, error);
                self.bridge.post(BridgeEvent::ActionError {
                    action_id: action_id.to_string(),
                    error: message.clone(),
                });
                RequestOutcome::Failed { error, message }
            }
        };
        Ok(outcome)
    }

    pub fn stop_action(&self, action_id: &str) -> bool {
        self.shared
            .lock()
            .aborts
            .cancel(&AbortKey::Action(action_id.to_string()))
    }
}

fn transition(conversation: &mut Conversation, event: RequestEvent) {
    if let Err(err) = conversation.request.handle_event(event) {
        log::warn!("[{}] {}", conversation.id, err);
    }
}

/// Cleanup shared by every exit from `send_request`.
struct RequestGuard {
    shared: Arc<Mutex<Shared>>,
    bridge: Arc<dyn Bridge>,
    id: ConversationId,
    handle: AbortHandle,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        let mut shared = self.shared.lock();
        if !shared.aborts.is_current(&self.handle) {
            // Closed or cleared while in flight; the id is no longer ours.
            log::debug!("[{}] Stale request finished", self.id);
            return;
        }
        shared.aborts.release(&self.handle);

        if let Some(conversation) = shared.store.get_mut(self.id) {
            if conversation.request.state().is_active() {
                // The request future was dropped mid-flight.
                log::warn!("[{}] Request dropped before finishing", self.id);
                if let Some(last) = conversation.messages.last_mut() {
                    if last.role == Role::Assistant {
                        last.done = true;
                    }
                }
                transition(conversation, RequestEvent::RequestCancelled);
            }
            transition(conversation, RequestEvent::Reset);
        }

        self.bridge.post(BridgeEvent::ShowInProgress {
            conversation_id: self.id,
            in_progress: false,
        });
    }
}

struct ReleaseOnDrop {
    shared: Arc<Mutex<Shared>>,
    handle: AbortHandle,
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.shared.lock().aborts.release(&self.handle);
    }
}

/// Text sent to the backend and text shown in the panel for a prompt.
///
/// The backend copy carries the verbosity directive; both carry the
/// attached code.
pub fn format_user_message(
    prompt: &str,
    verbosity: Verbosity,
    code: Option<&str>,
    language: Option<&str>,
) -> (String, String) {
    let directive = verbosity.directive();
    match code {
        Some(code) => {
            let language = language.unwrap_or_default();
            let note = if language.is_empty() {
                String::new()
            } else {
                format!(" The following code is in {} programming language.", language)
            };
            let fenced = format!("```{}\n{}\n```", language, code);
            let formatted = format!(
                "{}\n{}{} Code in question:\n\n###\n\n{}",
                prompt, directive, note, fenced
            );
            let raw = format!("{}\n\n{}", prompt, fenced);
            (formatted, raw)
        }
        None if directive.is_empty() => (prompt.to_string(), prompt.to_string()),
        None => (format!("{}\n{}", prompt, directive), prompt.to_string()),
    }
}

/// An odd number of fence markers means the answer stopped inside a block.
pub fn needs_continuation(content: &str) -> bool {
    content.matches("```").count() % 2 == 1
}

const ERROR_CODES_HINT: &str =
    "See https://platform.openai.com/docs/guides/error-codes for more details.";

/// User-facing text for a failed request.
pub fn classify_failure(error: &AssistantError, model: &str) -> String {
    let AssistantError::Transport { status, detail } = error else {
        return error.to_string();
    };

    match status {
        Some(400) => format!(
            "400 Bad Request\n\nYour model: '{}' may be incompatible or one of your parameters is unknown. Reset your settings to default.",
            model
        ),
        Some(401) => format!(
            "401 Unauthorized\n\nMake sure your API key is correct. Potential reasons:\n- 1. Incorrect API key provided.\n- 2. Incorrect Organization provided.\n{}",
            ERROR_CODES_HINT
        ),
        Some(403) => "403 Forbidden\n\nYour token has expired. Please try authenticating again.".to_string(),
        Some(404) => format!(
            "404 Not Found\n\nIf you've changed the API base URL, double-check that it is correct.\nYour model: '{}' may be incompatible or you may have exhausted your subscription allowance.",
            model
        ),
        Some(429) => format!(
            "429 Too Many Requests\n\nToo many requests, try again later. Potential reasons:\n 1. You exceeded your current quota, please check your plan and billing details\n 2. You are sending requests too quickly\n 3. The engine is currently overloaded, please try again later.\n{}",
            ERROR_CODES_HINT
        ),
        Some(500) => format!(
            "500 Internal Server Error\n\nThe server had an error while processing your request, please try again.\n{}",
            ERROR_CODES_HINT
        ),
        other => {
            let prefix = other.map(|s| format!("{}\n\n", s)).unwrap_or_default();
            if detail.trim().is_empty() {
                format!(
                    "{}An unknown error occurred. Please check your internet connection, clear the conversation, and try again.",
                    prefix
                )
            } else {
                format!("{}{}", prefix, detail)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{drain, ChannelBridge};
    use crate::test_support::{Script, ScriptedClient};
    use assistant_core::{BudgetError, Verbosity};
    use chat_state::RequestState;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn orchestrator(
        scripts: Vec<Script>,
    ) -> (Orchestrator, Arc<ScriptedClient>, UnboundedReceiver<BridgeEvent>) {
        let client = Arc::new(ScriptedClient::new(scripts));
        let (bridge, mut rx) = ChannelBridge::new();
        let config = OrchestratorConfig {
            system_context: "You are helpful.".to_string(),
            throttle: Duration::from_millis(100),
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(client.clone(), Arc::new(bridge), config);
        drain(&mut rx);
        (orchestrator, client, rx)
    }

    fn one() -> ConversationId {
        ConversationId::new(1)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..100 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("condition never became true");
    }

    fn assistant_updates(events: &[BridgeEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                BridgeEvent::AddChatMessage {
                    role: Role::Assistant,
                    content,
                    ..
                } => Some(content.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn streams_answer_into_conversation() {
        let (orchestrator, client, mut rx) =
            orchestrator(vec![Script::stream(&["Hello", " world"], 10)]);

        let outcome = orchestrator
            .send_request(one(), "Say hi", PromptOptions::default())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            RequestOutcome::Completed { ref content, continuation: false } if content == "Hello world"
        ));

        let events = drain(&mut rx);
        assert_eq!(
            events[0],
            BridgeEvent::AddChatMessage {
                conversation_id: one(),
                nr: 1,
                role: Role::User,
                content: "Say hi".to_string(),
                verbosity: Some(Verbosity::Normal),
                model: None,
            }
        );
        assert_eq!(
            events[1],
            BridgeEvent::ShowInProgress {
                conversation_id: one(),
                in_progress: true
            }
        );
        let updates = assistant_updates(&events);
        assert_eq!(updates.first().map(String::as_str), Some(""));
        assert_eq!(updates.last().map(String::as_str), Some("Hello world"));
        assert_eq!(
            events.last(),
            Some(&BridgeEvent::ShowInProgress {
                conversation_id: one(),
                in_progress: false
            })
        );

        let conversation = orchestrator.snapshot(one()).unwrap();
        assert_eq!(conversation.messages.len(), 3);
        assert_eq!(conversation.messages[0].role, Role::System);
        assert!(conversation.messages[2].done);
        assert_eq!(conversation.messages[2].content, "Hello world");
        assert_eq!(*conversation.request.state(), RequestState::Idle);

        let sent = client.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].messages.len(), 2, "placeholder is not sent");
    }

    #[tokio::test(start_paused = true)]
    async fn busy_conversation_rejects_second_request() {
        let (orchestrator, _client, mut rx) = orchestrator(vec![Script::Hang, Script::reply("ok")]);

        let first = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move {
                orchestrator
                    .send_request(one(), "first", PromptOptions::default())
                    .await
            }
        });
        wait_until(|| orchestrator.is_in_progress(one())).await;
        let before = orchestrator.snapshot(one()).unwrap().messages.len();
        drain(&mut rx);

        let second = orchestrator
            .send_request(one(), "second", PromptOptions::default())
            .await;
        assert!(matches!(second, Err(AssistantError::ConversationBusy(_))));
        assert_eq!(orchestrator.snapshot(one()).unwrap().messages.len(), before);
        assert!(drain(&mut rx).is_empty());

        assert!(orchestrator.stop(one()));
        let outcome = first.await.unwrap().unwrap();
        assert!(matches!(outcome, RequestOutcome::Cancelled { .. }));
        assert!(!orchestrator.is_in_progress(one()));

        let events = drain(&mut rx);
        assert!(!events.iter().any(|e| matches!(e, BridgeEvent::AddError { .. })));
        assert_eq!(
            events.last(),
            Some(&BridgeEvent::ShowInProgress {
                conversation_id: one(),
                in_progress: false
            })
        );
        assert!(orchestrator.shared.lock().aborts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_keeps_delivered_fragments() {
        let (orchestrator, _client, mut rx) =
            orchestrator(vec![Script::stream(&["a", "b", "c", "d"], 50)]);

        let task = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move {
                orchestrator
                    .send_request(one(), "go", PromptOptions::default())
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(120)).await;
        orchestrator.stop(one());
        let outcome = task.await.unwrap().unwrap();

        let RequestOutcome::Cancelled { content } = outcome else {
            panic!("expected cancellation");
        };
        assert_eq!(content, "ab");
        let conversation = orchestrator.snapshot(one()).unwrap();
        assert_eq!(conversation.messages[2].content, "ab");
        assert!(conversation.messages[2].done);
        assert!(assistant_updates(&drain(&mut rx))
            .iter()
            .all(|update| "ab".starts_with(update.as_str())));
    }

    #[tokio::test]
    async fn backend_failure_is_classified_and_placeholder_removed() {
        let (orchestrator, _client, mut rx) =
            orchestrator(vec![Script::fail(429, "Rate limit reached")]);

        let outcome = orchestrator
            .send_request(one(), "hi", PromptOptions::default())
            .await
            .unwrap();
        let RequestOutcome::Failed { message, .. } = outcome else {
            panic!("expected failure");
        };
        assert!(message.starts_with("429 Too Many Requests"));

        let events = drain(&mut rx);
        assert!(events.contains(&BridgeEvent::Truncate {
            conversation_id: one(),
            nr: 1
        }));
        assert!(events.contains(&BridgeEvent::AddError {
            conversation_id: one(),
            value: message.clone()
        }));

        let conversation = orchestrator.snapshot(one()).unwrap();
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(*conversation.request.state(), RequestState::Idle);
        assert!(orchestrator.shared.lock().aborts.is_empty());
    }

    #[tokio::test]
    async fn budget_failure_is_reported_verbatim() {
        let budget = BudgetError::BudgetExceeded {
            model: "gpt-3.5-turbo".to_string(),
            limit: 25,
            context_window: 25,
            tokens_used: 33,
        };
        let (orchestrator, _client, mut rx) =
            orchestrator(vec![Script::Budget(budget.clone())]);

        let outcome = orchestrator
            .send_request(one(), "hi", PromptOptions::default())
            .await
            .unwrap();
        let RequestOutcome::Failed { error, message } = outcome else {
            panic!("expected failure");
        };
        assert!(matches!(error, AssistantError::BudgetExceeded(_)));
        assert_eq!(message, budget.to_string());
        assert!(drain(&mut rx).contains(&BridgeEvent::AddError {
            conversation_id: one(),
            value: budget.to_string()
        }));
    }

    #[tokio::test]
    async fn unfinished_code_block_offers_continuation() {
        let (orchestrator, _client, mut rx) =
            orchestrator(vec![Script::reply("Here:\n```rust\nfn main() {")]);

        let outcome = orchestrator
            .send_request(one(), "code", PromptOptions::default())
            .await
            .unwrap();
        assert!(matches!(outcome, RequestOutcome::Completed { continuation: true, .. }));

        let events = drain(&mut rx);
        assert!(events.contains(&BridgeEvent::OfferContinuation { conversation_id: one() }));
        let conversation = orchestrator.snapshot(one()).unwrap();
        assert!(conversation.messages[2].content.ends_with("\n```\n"));
        assert_eq!(conversation.messages[2].raw_content, "Here:\n```rust\nfn main() {");
    }

    #[tokio::test]
    async fn continue_sends_continue_prompt() {
        let (orchestrator, client, _rx) =
            orchestrator(vec![Script::reply("```rust\nfn a() {"), Script::reply("}\n```")]);

        orchestrator
            .send_request(one(), "code", PromptOptions::default())
            .await
            .unwrap();
        orchestrator.continue_conversation(one()).await.unwrap();

        let sent = client.requests();
        let last = sent[1].messages.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert_eq!(last.raw_content, CONTINUE_PROMPT);
        assert_eq!(sent[1].messages.len(), 4);
    }

    #[tokio::test]
    async fn truncation_applies_before_sending() {
        let (orchestrator, client, mut rx) =
            orchestrator(vec![Script::reply("one"), Script::reply("two")]);

        orchestrator
            .send_request(one(), "first", PromptOptions::default())
            .await
            .unwrap();
        drain(&mut rx);

        let options = PromptOptions {
            truncate_after: Some(0),
            ..Default::default()
        };
        orchestrator.send_request(one(), "edited", options).await.unwrap();

        assert_eq!(
            drain(&mut rx)[0],
            BridgeEvent::Truncate {
                conversation_id: one(),
                nr: 0
            }
        );
        let sent = client.requests();
        let contents: Vec<_> = sent[1].messages.iter().map(|m| m.raw_content.as_str()).collect();
        assert_eq!(contents, vec!["You are helpful.", "edited"]);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_request_still_cleans_up() {
        let (orchestrator, _client, mut rx) = orchestrator(vec![Script::Hang]);

        let result = tokio::time::timeout(
            Duration::from_millis(50),
            orchestrator.send_request(one(), "hang", PromptOptions::default()),
        )
        .await;
        assert!(result.is_err());

        assert!(!orchestrator.is_in_progress(one()));
        assert!(orchestrator.shared.lock().aborts.is_empty());
        assert!(orchestrator.snapshot(one()).unwrap().messages[2].done);
        assert_eq!(
            drain(&mut rx).last(),
            Some(&BridgeEvent::ShowInProgress {
                conversation_id: one(),
                in_progress: false
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn closed_request_leaves_reopened_conversation_alone() {
        let (orchestrator, _client, mut rx) = orchestrator(vec![Script::Hang, Script::Hang]);

        let first = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move {
                orchestrator
                    .send_request(one(), "first", PromptOptions::default())
                    .await
            }
        });
        wait_until(|| orchestrator.is_in_progress(one())).await;

        orchestrator.close(one()).unwrap();
        let second = orchestrator.send_request(one(), "second", PromptOptions::default());
        tokio::pin!(second);
        assert!(futures::poll!(&mut second).is_pending());
        assert!(orchestrator.is_in_progress(one()));
        drain(&mut rx);

        let outcome = first.await.unwrap().unwrap();
        assert!(matches!(outcome, RequestOutcome::Cancelled { .. }));

        assert!(orchestrator.is_in_progress(one()));
        let conversation = orchestrator.snapshot(one()).unwrap();
        assert_eq!(conversation.messages[1].raw_content, "second");
        assert_eq!(conversation.messages[2].content, "");
        assert!(!conversation.messages[2].done);
        assert!(drain(&mut rx).is_empty());
        assert!(orchestrator
            .send_request(one(), "third", PromptOptions::default())
            .await
            .is_err());

        assert!(orchestrator.stop(one()));
        let outcome = second.await.unwrap();
        assert!(matches!(outcome, RequestOutcome::Cancelled { .. }));
        assert!(!orchestrator.is_in_progress(one()));
        assert!(orchestrator.shared.lock().aborts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_request_still_owns_its_conversation() {
        let (orchestrator, _client, mut rx) = orchestrator(vec![Script::Hang]);

        let task = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move {
                orchestrator
                    .send_request(one(), "go", PromptOptions::default())
                    .await
            }
        });
        wait_until(|| orchestrator.is_in_progress(one())).await;

        assert!(orchestrator.stop(one()));
        assert!(orchestrator
            .shared
            .lock()
            .aborts
            .contains(&AbortKey::Conversation(one())));
        task.await.unwrap().unwrap();

        let conversation = orchestrator.snapshot(one()).unwrap();
        assert!(conversation.messages[2].done);
        assert_eq!(*conversation.request.state(), RequestState::Idle);
        assert_eq!(
            drain(&mut rx).last(),
            Some(&BridgeEvent::ShowInProgress {
                conversation_id: one(),
                in_progress: false
            })
        );
    }

    #[tokio::test]
    async fn failure_names_the_model_that_was_sent() {
        let (orchestrator, client, _rx) = orchestrator(vec![
            Script::fail(400, "bad request"),
            Script::reply("ok"),
        ]);
        orchestrator.with_store(|store| {
            store.get_or_create(one()).model = Some("gpt-4".to_string());
        });

        let outcome = orchestrator
            .send_request(one(), "hi", PromptOptions::default())
            .await
            .unwrap();
        let RequestOutcome::Failed { message, .. } = outcome else {
            panic!("expected failure");
        };
        assert!(message.contains("'gpt-4'"));
        assert_eq!(client.options()[0].model.as_deref(), Some("gpt-4"));

        let two = ConversationId::new(2);
        orchestrator
            .send_request(two, "hi", PromptOptions::default())
            .await
            .unwrap();
        assert_eq!(
            client.options()[1].model.as_deref(),
            Some(orchestrator.config.default_model.as_str())
        );
    }

    #[tokio::test]
    async fn selection_and_model_flow_into_request() {
        let (orchestrator, client, _rx) = orchestrator(vec![Script::reply("ok")]);

        let options = PromptOptions {
            code: Some("fn a() {}".to_string()),
            language: Some("rust".to_string()),
            verbosity: Some(Verbosity::Code),
            model: Some("gpt-4".to_string()),
            truncate_after: None,
        };
        orchestrator.send_request(one(), "Explain", options).await.unwrap();

        let sent = client.requests();
        let user = &sent[0].messages[1];
        assert!(user.content.contains(Verbosity::Code.directive()));
        assert!(user.content.contains("```rust\nfn a() {}\n```"));
        assert_eq!(user.raw_content, "Explain\n\n```rust\nfn a() {}\n```");
        assert_eq!(user.code.as_deref(), Some("fn a() {}"));
        assert_eq!(client.options()[0].model.as_deref(), Some("gpt-4"));
    }

    #[tokio::test]
    async fn second_message_promotes_ad_hoc_conversation() {
        let (orchestrator, _client, _rx) =
            orchestrator(vec![Script::reply("a"), Script::reply("b")]);
        let ad_hoc = orchestrator.with_store(|store| {
            while store.pinned_positions().len() < 9 {
                store.allocate_pinned_slot();
            }
            store.allocate_pinned_slot()
        });

        orchestrator
            .send_request(ad_hoc, "one", PromptOptions::default())
            .await
            .unwrap();
        orchestrator.with_store(|store| {
            let five = store.at_position(5).unwrap();
            store.close(five).unwrap();
        });
        orchestrator
            .send_request(ad_hoc, "two", PromptOptions::default())
            .await
            .unwrap();

        let conversation = orchestrator.snapshot(ad_hoc).unwrap();
        assert_eq!(conversation.position, Position::Pinned(5));
    }

    #[tokio::test]
    async fn run_command_uses_a_new_slot() {
        let (orchestrator, client, _rx) = orchestrator(vec![Script::reply("done")]);

        orchestrator
            .run_command("Refactor", PromptOptions::default())
            .await
            .unwrap();

        let id = client.requests()[0].id;
        assert_ne!(id, one());
        assert_eq!(orchestrator.current(), id);
        assert_eq!(
            orchestrator.snapshot(id).unwrap().position,
            Position::Pinned(2)
        );
    }

    #[tokio::test]
    async fn response_ready_when_enabled() {
        let client = Arc::new(ScriptedClient::new(vec![Script::reply("ok")]));
        let (bridge, mut rx) = ChannelBridge::new();
        let config = OrchestratorConfig {
            notify_on_response: true,
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(client, Arc::new(bridge), config);

        orchestrator
            .send_request(one(), "hi", PromptOptions::default())
            .await
            .unwrap();
        assert!(drain(&mut rx).contains(&BridgeEvent::ResponseReady { conversation_id: one() }));
    }

    #[tokio::test]
    async fn action_reports_completion() {
        let (orchestrator, _client, mut rx) = orchestrator(vec![Script::reply("Tests written")]);

        let outcome = orchestrator.run_action("writeTests", "Write tests").await.unwrap();
        assert!(matches!(outcome, RequestOutcome::Completed { .. }));
        assert_eq!(
            drain(&mut rx),
            vec![BridgeEvent::ActionComplete {
                action_id: "writeTests".to_string(),
                value: "Tests written".to_string()
            }]
        );
        assert!(orchestrator.shared.lock().aborts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn action_can_be_stopped_and_is_exclusive() {
        let (orchestrator, _client, mut rx) = orchestrator(vec![Script::Hang]);

        let task = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.run_action("explain", "Explain").await }
        });
        wait_until(|| {
            orchestrator
                .shared
                .lock()
                .aborts
                .contains(&AbortKey::Action("explain".to_string()))
        })
        .await;

        assert!(matches!(
            orchestrator.run_action("explain", "again").await,
            Err(AssistantError::ActionBusy(_))
        ));
        assert!(orchestrator.stop_action("explain"));

        let outcome = task.await.unwrap().unwrap();
        assert!(matches!(outcome, RequestOutcome::Cancelled { .. }));
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, BridgeEvent::ActionError { action_id, .. } if action_id == "explain")));
    }

    #[test]
    fn user_message_formatting() {
        let (formatted, raw) = format_user_message("Explain", Verbosity::Normal, None, None);
        assert_eq!(formatted, "Explain");
        assert_eq!(raw, "Explain");

        let (formatted, raw) = format_user_message("Explain", Verbosity::Full, None, None);
        assert_eq!(formatted, format!("Explain\n{}", Verbosity::Full.directive()));
        assert_eq!(raw, "Explain");

        let (formatted, raw) =
            format_user_message("Fix", Verbosity::Concise, Some("let x = 1"), Some("rust"));
        assert_eq!(
            formatted,
            format!(
                "Fix\n{} The following code is in rust programming language. Code in question:\n\n###\n\n```rust\nlet x = 1\n```",
                Verbosity::Concise.directive()
            )
        );
        assert_eq!(raw, "Fix\n\n```rust\nlet x = 1\n```");
    }

    #[test]
    fn continuation_detection() {
        assert!(!needs_continuation("no code"));
        assert!(needs_continuation("```rust\nfn a() {"));
        assert!(!needs_continuation("```rust\nfn a() {}\n```"));
        assert!(needs_continuation("```a```\n```b"));
    }

    #[test]
    fn failure_table() {
        let transport = |status: Option<u16>, detail: &str| AssistantError::Transport {
            status,
            detail: detail.to_string(),
        };

        assert!(classify_failure(&transport(Some(400), ""), "gpt-4").contains("'gpt-4'"));
        assert!(classify_failure(&transport(Some(401), ""), "m").starts_with("401 Unauthorized"));
        assert!(classify_failure(&transport(Some(403), ""), "m").starts_with("403 Forbidden"));
        assert!(classify_failure(&transport(Some(404), ""), "m").starts_with("404 Not Found"));
        assert!(classify_failure(&transport(Some(429), ""), "m").starts_with("429 Too Many Requests"));
        assert!(classify_failure(&transport(Some(500), ""), "m").starts_with("500 Internal Server Error"));
        assert_eq!(
            classify_failure(&transport(Some(502), "Bad gateway upstream"), "m"),
            "502\n\nBad gateway upstream"
        );
        assert_eq!(
            classify_failure(&transport(None, "connection refused"), "m"),
            "connection refused"
        );
        assert!(classify_failure(&transport(None, ""), "m").starts_with("An unknown error occurred"));

        let config = AssistantError::Configuration("Unknown model: x".to_string());
        assert_eq!(classify_failure(&config, "m"), config.to_string());
    }
}
