//! Editor side effects requested by the panel or by inline prompts.

use crate::inline::TrackedRange;

/// Text the user has selected in the active document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub content: String,
    pub language: String,
    pub range: TrackedRange,
}

#[cfg_attr(test, mockall::automock)]
pub trait Editor: Send + Sync {
    /// Current non-empty selection, if any.
    fn selection(&self) -> Option<Selection>;

    /// Insert `code` at the cursor, replacing the selection.
    fn insert_code(&self, code: &str);

    /// Open an untitled document.
    fn open_document(&self, content: &str, language: &str);

    /// Replace the text currently covered by `range`.
    fn replace_range(&self, range: TrackedRange, code: &str);
}

/// Editor for hosts without a document surface.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEditor;

impl Editor for NoopEditor {
    fn selection(&self) -> Option<Selection> {
        None
    }

    fn insert_code(&self, _code: &str) {
        log::debug!("No editor attached, dropping inserted code");
    }

    fn open_document(&self, _content: &str, language: &str) {
        log::debug!("No editor attached, not opening {} document", language);
    }

    fn replace_range(&self, range: TrackedRange, _code: &str) {
        log::debug!("No editor attached, not replacing {:?}", range);
    }
}
