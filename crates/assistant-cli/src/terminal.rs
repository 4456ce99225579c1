//! Panel and editor stand-ins that render to the terminal.

use std::io::Write;
use std::path::Path;

use assistant_core::{BridgeEvent, ConversationId, Role};
use assistant_loop::{Bridge, Editor, Selection, TrackedRange};
use parking_lot::Mutex;

/// Prints panel events, streaming assistant updates as deltas.
#[derive(Default)]
pub struct TerminalBridge {
    /// Message currently being streamed and how much of it is on screen.
    streaming: Mutex<Option<(ConversationId, usize, usize)>>,
}

impl TerminalBridge {
    pub fn new() -> Self {
        Self::default()
    }

    fn print(&self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = write!(stdout, "{}", text);
        let _ = stdout.flush();
    }

    fn end_stream(&self) {
        if self.streaming.lock().take().is_some() {
            self.print("\n");
        }
    }
}

impl Bridge for TerminalBridge {
    fn post(&self, event: BridgeEvent) {
        log::trace!("panel <- {:?}", event);

        match event {
            BridgeEvent::AddChatMessage {
                conversation_id,
                nr,
                role: Role::Assistant,
                content,
                ..
            } => {
                let mut out = String::new();
                let mut streaming = self.streaming.lock();
                let printed = match *streaming {
                    Some((id, at, printed)) if id == conversation_id && at == nr => printed,
                    previous => {
                        if previous.is_some() {
                            out.push('\n');
                        }
                        out.push_str(&format!("[{}] assistant> ", conversation_id));
                        0
                    }
                };
                if let Some(delta) = content.get(printed..) {
                    out.push_str(delta);
                }
                *streaming = Some((conversation_id, nr, content.len().max(printed)));
                drop(streaming);
                self.print(&out);
            }
            BridgeEvent::ShowInProgress {
                in_progress: false, ..
            } => self.end_stream(),
            BridgeEvent::ShowConversation { conversation_id } => {
                self.end_stream();
                self.print(&format!("-- conversation {} --\n", conversation_id));
            }
            BridgeEvent::AddError {
                conversation_id,
                value,
            } => {
                self.end_stream();
                self.print(&format!("[{}] error: {}\n", conversation_id, value));
            }
            BridgeEvent::OfferContinuation { conversation_id } => {
                self.end_stream();
                self.print(&format!(
                    "[{}] answer stopped inside a code block, /continue to finish it\n",
                    conversation_id
                ));
            }
            BridgeEvent::ResponseReady { conversation_id } => {
                self.print(&format!("[{}] response ready\n", conversation_id));
            }
            BridgeEvent::UpdateSlots { positions } => {
                log::info!("Occupied slots: {:?}", positions);
            }
            BridgeEvent::TokenCount {
                conversation_id,
                token_count,
            } => self.print(&format!(
                "[{}] tokens: {} in conversation, {} for input, at least {} total\n",
                conversation_id, token_count.messages, token_count.user_input, token_count.min_total
            )),
            BridgeEvent::ActionComplete { action_id, value } => {
                self.print(&format!("[{}] done:\n{}\n", action_id, value));
            }
            BridgeEvent::ActionError { action_id, error } => {
                self.print(&format!("[{}] failed: {}\n", action_id, error));
            }
            _ => {}
        }
    }
}

/// Editor whose selection is a file attached with `/attach`.
#[derive(Default)]
pub struct TerminalEditor {
    attached: Mutex<Option<Selection>>,
}

impl TerminalEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, path: &Path) -> std::io::Result<usize> {
        let content = std::fs::read_to_string(path)?;
        let language = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(language_for_extension)
            .unwrap_or_default()
            .to_string();
        let len = content.len();
        *self.attached.lock() = Some(Selection {
            content,
            language,
            range: TrackedRange::new(0, len),
        });
        Ok(len)
    }

    pub fn detach(&self) {
        *self.attached.lock() = None;
    }
}

impl Editor for TerminalEditor {
    fn selection(&self) -> Option<Selection> {
        self.attached.lock().clone()
    }

    fn insert_code(&self, code: &str) {
        println!("{}", code);
    }

    fn open_document(&self, content: &str, language: &str) {
        println!("----- {} -----\n{}\n-----", language, content);
    }

    fn replace_range(&self, range: TrackedRange, code: &str) {
        println!("----- replace {}..{} -----\n{}\n-----", range.start, range.end, code);
    }
}

fn language_for_extension(extension: &str) -> &str {
    match extension {
        "rs" => "rust",
        "py" => "python",
        "js" | "mjs" => "javascript",
        "ts" => "typescript",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cc" | "cpp" | "hpp" => "cpp",
        "rb" => "ruby",
        "sh" => "shellscript",
        "md" => "markdown",
        other => other,
    }
}
