//! Routes panel and editor commands to the orchestrator.

use std::sync::Arc;

use assistant_core::{
    AssistantError, BridgeCommand, BridgeEvent, ConversationId, PromptTemplate, Result,
    TokenAccountant,
};

use crate::bridge::Bridge;
use crate::editor::Editor;
use crate::export::to_markdown;
use crate::orchestrator::{Orchestrator, PromptOptions};

#[derive(Clone)]
pub struct Dispatcher {
    orchestrator: Orchestrator,
    editor: Arc<dyn Editor>,
    accountant: TokenAccountant,
    bridge: Arc<dyn Bridge>,
}

impl Dispatcher {
    pub fn new(
        orchestrator: Orchestrator,
        editor: Arc<dyn Editor>,
        accountant: TokenAccountant,
        bridge: Arc<dyn Bridge>,
    ) -> Self {
        Self {
            orchestrator,
            editor,
            accountant,
            bridge,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Decode a JSON command from the panel and handle it.
    pub async fn handle_raw(&self, payload: &str) -> Result<()> {
        let command: BridgeCommand = serde_json::from_str(payload).map_err(|e| {
            AssistantError::Configuration(format!("malformed panel command: {}", e))
        })?;
        self.handle(command).await
    }

    /// Handle one command.
    ///
    /// Failures that belong to a conversation or an action are also reported
    /// to the panel before being returned.
    pub async fn handle(&self, command: BridgeCommand) -> Result<()> {
        log::debug!("Handling {:?}", command);

        match command {
            BridgeCommand::SendMessage {
                conversation_id,
                chat_id,
                message,
                include_editor_selection,
                verbosity,
                model,
            } => {
                let mut options = PromptOptions {
                    verbosity,
                    model,
                    truncate_after: chat_id.truncate_after(),
                    ..Default::default()
                };
                if include_editor_selection {
                    if let Some(selection) = self.editor.selection() {
                        options.code = Some(selection.content);
                        options.language = Some(selection.language);
                    }
                }
                let result = self
                    .orchestrator
                    .send_request(conversation_id, &message, options)
                    .await;
                self.report(conversation_id, result.map(|_| ()))
            }
            BridgeCommand::ContinueConversation { conversation_id } => {
                let result = self
                    .orchestrator
                    .continue_conversation(conversation_id)
                    .await;
                self.report(conversation_id, result.map(|_| ()))
            }
            BridgeCommand::StopGenerating { conversation_id } => {
                self.orchestrator.stop(conversation_id);
                Ok(())
            }
            BridgeCommand::RefreshChat => {
                self.orchestrator.with_store(|store| store.refresh());
                Ok(())
            }
            BridgeCommand::NewChat => {
                self.orchestrator.new_chat();
                Ok(())
            }
            BridgeCommand::CloseChat => {
                let current = self.orchestrator.current();
                self.orchestrator.close(current).map(|_| ())
            }
            BridgeCommand::ClearChat => {
                let current = self.orchestrator.current();
                self.orchestrator.clear(current).map(|_| ())
            }
            BridgeCommand::SetChat { conversation_id } => self
                .orchestrator
                .with_store(|store| store.activate(conversation_id)),
            BridgeCommand::EditCode { value, .. } => {
                self.editor.insert_code(&value);
                Ok(())
            }
            BridgeCommand::OpenNew { value, language } => {
                self.editor
                    .open_document(&value, language.as_deref().unwrap_or_default());
                Ok(())
            }
            BridgeCommand::GetTokenCount {
                conversation_id,
                user_input,
                use_editor_selection,
            } => self.token_count(conversation_id, &user_input, use_editor_selection),
            BridgeCommand::ExportToMarkdown { conversation_id } => {
                let conversation = self
                    .orchestrator
                    .snapshot(conversation_id)
                    .ok_or(AssistantError::ConversationNotFound(conversation_id))?;
                self.editor
                    .open_document(&to_markdown(&conversation), "markdown");
                Ok(())
            }
            BridgeCommand::RunAction { action_id, prompt } => {
                match self.orchestrator.run_action(&action_id, &prompt).await {
                    Ok(_) => Ok(()),
                    Err(err) => {
                        self.bridge.post(BridgeEvent::ActionError {
                            action_id,
                            error: err.to_string(),
                        });
                        Err(err)
                    }
                }
            }
            BridgeCommand::StopAction { action_id } => {
                self.orchestrator.stop_action(&action_id);
                Ok(())
            }
        }
    }

    /// Run a configured prompt command against the current selection.
    pub async fn run_template(&self, template: &PromptTemplate) -> Result<()> {
        let selection = self.editor.selection();

        if template.inline {
            let Some(selection) = selection else {
                log::warn!("'{}' needs a selection, ignoring", template.title);
                return Ok(());
            };
            self.orchestrator
                .run_inline(self.editor.as_ref(), &template.prompt, selection)
                .await?;
            return Ok(());
        }

        let (code, language) = selection
            .map(|s| (Some(s.content), Some(s.language)))
            .unwrap_or_default();
        let options = PromptOptions {
            code,
            language,
            ..Default::default()
        };
        self.orchestrator
            .run_command(&template.prompt, options)
            .await
            .map(|_| ())
    }

    /// Keep in-flight inline edits aligned with a document change.
    pub fn document_changed(&self, offset: usize, removed: usize, inserted: usize) {
        self.orchestrator
            .inline_edits()
            .apply_change(offset, removed, inserted);
    }

    fn token_count(
        &self,
        id: ConversationId,
        user_input: &str,
        use_editor_selection: bool,
    ) -> Result<()> {
        let conversation = self
            .orchestrator
            .snapshot(id)
            .ok_or(AssistantError::ConversationNotFound(id))?;
        let selection = if use_editor_selection {
            self.editor.selection().map(|s| s.content)
        } else {
            None
        };

        let token_count =
            self.accountant
                .estimate_input_tokens(&conversation, user_input, selection.as_deref())?;
        self.bridge.post(BridgeEvent::TokenCount {
            conversation_id: id,
            token_count,
        });
        Ok(())
    }

    fn report(&self, id: ConversationId, result: Result<()>) -> Result<()> {
        if let Err(err) = &result {
            log::warn!("[{}] {}", id, err);
            self.bridge.post(BridgeEvent::AddError {
                conversation_id: id,
                value: err.to_string(),
            });
        }
        result
    }
}
