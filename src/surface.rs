//! Editing-surface seam.
//!
//! The text widget itself is view glue and lives outside this crate; the
//! protocol only needs two things from it: read the full buffer, and replace
//! the full buffer. The one contract that matters is that the surface's
//! change notification fires *synchronously inside* `set_content` — the echo
//! guard in [`crate::buffer`] relies on that window to swallow the
//! notification a remote apply triggers.

use std::sync::{Arc, Mutex};

/// Full-buffer view of the editing widget.
pub trait EditingSurface: Send + Sync {
    /// Current surface contents.
    fn content(&self) -> String;

    /// Replace the entire contents.
    ///
    /// Returns the change notification the surface fired synchronously
    /// during the replacement (the new content), or `None` if the surface
    /// does not notify on programmatic writes.
    fn set_content(&mut self, text: &str) -> Option<String>;
}

/// In-memory surface used by tests and headless sessions.
///
/// Clones share the same underlying text, so a test can keep a clone and
/// observe what the session wrote. Fires its change notification on every
/// `set_content`, like a real editor widget.
#[derive(Debug, Clone, Default)]
pub struct TextSurface {
    content: Arc<Mutex<String>>,
}

impl TextSurface {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EditingSurface for TextSurface {
    fn content(&self) -> String {
        self.content.lock().expect("surface lock poisoned").clone()
    }

    fn set_content(&mut self, text: &str) -> Option<String> {
        let mut guard = self.content.lock().expect("surface lock poisoned");
        *guard = text.to_string();
        Some(text.to_string())
    }
}
