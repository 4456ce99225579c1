//! Prompts whose answer replaces the selected code in place.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;

use assistant_core::{AssistantError, Conversation, Message, Result, Verbosity};
use assistant_llm::RequestOptions;

use crate::editor::{Editor, Selection};
use crate::orchestrator::{format_user_message, Orchestrator};

static CODE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[^\n]*\n(.*?)\n?```").expect("valid code block pattern"));

/// First fenced code block in `answer`.
pub fn extract_code_block(answer: &str) -> Option<String> {
    CODE_BLOCK
        .captures(answer)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
}

/// Byte range of a document, kept valid while the document changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedRange {
    pub start: usize,
    pub end: usize,
}

impl TrackedRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start: start.min(end),
            end: start.max(end),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Follow an edit replacing `removed` bytes at `offset` with `inserted`
    /// bytes.
    ///
    /// Edits ending at or before the range shift it, edits starting at or
    /// after its end leave it alone, and overlapping edits clamp it to the
    /// text that survives.
    pub fn apply_change(&mut self, offset: usize, removed: usize, inserted: usize) {
        let change_end = offset + removed;

        if change_end <= self.start {
            self.start = self.start - removed + inserted;
            self.end = self.end - removed + inserted;
        } else if offset >= self.end {
        } else {
            let start = self.start.min(offset);
            let end = if change_end >= self.end {
                offset + inserted
            } else {
                self.end - removed + inserted
            };
            self.start = start;
            self.end = end.max(start);
        }
    }
}

/// Ranges awaiting an inline answer.
#[derive(Debug, Default)]
pub struct InlineEdits {
    ranges: Mutex<HashMap<u64, TrackedRange>>,
    next: Mutex<u64>,
}

impl InlineEdits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, range: TrackedRange) -> u64 {
        let id = {
            let mut next = self.next.lock();
            *next += 1;
            *next
        };
        self.ranges.lock().insert(id, range);
        id
    }

    /// Apply a document edit to every tracked range.
    pub fn apply_change(&self, offset: usize, removed: usize, inserted: usize) {
        for range in self.ranges.lock().values_mut() {
            range.apply_change(offset, removed, inserted);
        }
    }

    pub fn get(&self, id: u64) -> Option<TrackedRange> {
        self.ranges.lock().get(&id).copied()
    }

    pub fn take(&self, id: u64) -> Option<TrackedRange> {
        self.ranges.lock().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.ranges.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.lock().is_empty()
    }
}

impl Orchestrator {
    /// Ask for a code-only rewrite of `selection` and splice it back in.
    ///
    /// Returns the inserted code, or `None` when the answer had no code
    /// block.
    pub async fn run_inline(
        &self,
        editor: &dyn Editor,
        prompt: &str,
        selection: Selection,
    ) -> Result<Option<String>> {
        let tracked = self.inline_edits.track(selection.range);
        let result = self.inline_answer(prompt, &selection).await;
        let range = self.inline_edits.take(tracked).unwrap_or(selection.range);

        let answer = result?;
        match extract_code_block(&answer) {
            Some(code) => {
                log::debug!("Replacing {:?} with {} bytes", range, code.len());
                editor.replace_range(range, &code);
                Ok(Some(code))
            }
            None => {
                log::warn!("Inline answer contained no code block");
                Ok(None)
            }
        }
    }

    async fn inline_answer(&self, prompt: &str, selection: &Selection) -> Result<String> {
        let mut conversation = Conversation::detached();
        if !self.config.system_context.is_empty() {
            conversation
                .messages
                .push(Message::system(self.config.system_context.clone()));
        }
        let (formatted, raw) = format_user_message(
            prompt,
            Verbosity::Code,
            Some(&selection.content),
            Some(&selection.language),
        );
        conversation.messages.push(Message::user(formatted, raw));

        let message = self
            .client
            .complete(&conversation, &RequestOptions::default())
            .await
            .map_err(AssistantError::from)?;
        Ok(message.content)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::bridge::ChannelBridge;
    use crate::editor::MockEditor;
    use crate::orchestrator::OrchestratorConfig;
    use crate::test_support::{Script, ScriptedClient};
    use mockall::predicate::eq;

    #[test]
    fn extracts_first_block() {
        let answer = "Sure:\n```rust\nfn a() {}\n```\nand\n```\nsecond\n```";
        assert_eq!(extract_code_block(answer).as_deref(), Some("fn a() {}"));
        assert_eq!(extract_code_block("no code here"), None);
        assert_eq!(
            extract_code_block("```\nline one\nline two\n```").as_deref(),
            Some("line one\nline two")
        );
    }

    #[test]
    fn edits_before_range_shift_it() {
        let mut range = TrackedRange::new(10, 20);
        range.apply_change(0, 0, 5);
        assert_eq!(range, TrackedRange::new(15, 25));

        range.apply_change(2, 4, 0);
        assert_eq!(range, TrackedRange::new(11, 21));
    }

    #[test]
    fn edits_after_range_leave_it() {
        let mut range = TrackedRange::new(10, 20);
        range.apply_change(20, 3, 7);
        range.apply_change(40, 0, 2);
        assert_eq!(range, TrackedRange::new(10, 20));
    }

    #[test]
    fn overlapping_edits_clamp() {
        let mut range = TrackedRange::new(10, 20);
        range.apply_change(12, 3, 1);
        assert_eq!(range, TrackedRange::new(10, 18));

        let mut range = TrackedRange::new(10, 20);
        range.apply_change(5, 10, 0);
        assert_eq!(range, TrackedRange::new(5, 10));

        let mut range = TrackedRange::new(10, 20);
        range.apply_change(15, 10, 2);
        assert_eq!(range, TrackedRange::new(10, 17));

        let mut range = TrackedRange::new(10, 20);
        range.apply_change(0, 30, 0);
        assert!(range.is_empty());
    }

    #[test]
    fn registry_applies_changes_to_all_ranges() {
        let edits = InlineEdits::new();
        let a = edits.track(TrackedRange::new(0, 5));
        let b = edits.track(TrackedRange::new(10, 15));

        edits.apply_change(6, 0, 4);
        assert_eq!(edits.get(a), Some(TrackedRange::new(0, 5)));
        assert_eq!(edits.take(b), Some(TrackedRange::new(14, 19)));
        assert_eq!(edits.len(), 1);
    }

    fn orchestrator(scripts: Vec<Script>) -> (Orchestrator, Arc<ScriptedClient>) {
        let client = Arc::new(ScriptedClient::new(scripts));
        let (bridge, _rx) = ChannelBridge::new();
        let orchestrator =
            Orchestrator::new(client.clone(), Arc::new(bridge), OrchestratorConfig::default());
        (orchestrator, client)
    }

    fn selection() -> Selection {
        Selection {
            content: "fn add(a: i32, b: i32) -> i32 { a - b }".to_string(),
            language: "rust".to_string(),
            range: TrackedRange::new(100, 140),
        }
    }

    #[tokio::test]
    async fn replaces_selection_with_answer_code() {
        let (orchestrator, client) = orchestrator(vec![Script::reply(
            "```rust\nfn add(a: i32, b: i32) -> i32 { a + b }\n```",
        )]);

        let mut editor = MockEditor::new();
        editor
            .expect_replace_range()
            .with(
                eq(TrackedRange::new(100, 140)),
                eq("fn add(a: i32, b: i32) -> i32 { a + b }"),
            )
            .times(1)
            .return_const(());

        let code = orchestrator
            .run_inline(&editor, "Fix the bug", selection())
            .await
            .unwrap();
        assert!(code.is_some());
        assert!(orchestrator.inline_edits().is_empty());

        let sent = &client.requests()[0];
        let user = sent.messages.last().unwrap();
        assert!(user.content.contains(Verbosity::Code.directive()));
        assert!(user.content.contains("```rust\nfn add"));
    }

    #[tokio::test]
    async fn answer_without_code_leaves_editor_alone() {
        let (orchestrator, _client) = orchestrator(vec![Script::reply("I cannot help with that.")]);

        let mut editor = MockEditor::new();
        editor.expect_replace_range().times(0);

        let code = orchestrator
            .run_inline(&editor, "Fix", selection())
            .await
            .unwrap();
        assert!(code.is_none());
    }

    #[tokio::test]
    async fn failure_is_returned_and_range_released() {
        let (orchestrator, _client) = orchestrator(vec![Script::fail(401, "bad key")]);

        let mut editor = MockEditor::new();
        editor.expect_replace_range().times(0);

        let err = orchestrator
            .run_inline(&editor, "Fix", selection())
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::Transport { status: Some(401), .. }));
        assert!(orchestrator.inline_edits().is_empty());
    }
}
