//! Shared buffer state and the change-loop guard.
//!
//! Edits travel as full buffers, so the only defense against the forward
//! loop (A edits → B applies → B's surface fires "changed" → B re-sends →
//! A re-applies → …) is a suppression flag held for exactly the synchronous
//! window in which a remote update is written to the editing surface. Any
//! change notification the surface raises inside that window is echo and is
//! absorbed instead of rebroadcast.
//!
//! The content itself is opaque: replaced wholesale on every edit, never
//! patched in place.

use crate::surface::EditingSurface;

/// Outcome of reporting a local edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEdit {
    /// Genuine local edit — broadcast this content to the room.
    Broadcast(String),
    /// Echo of a remote apply, absorbed by the guard. Nothing is emitted.
    SuppressedEcho,
}

/// Outcome of applying a remote update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteApply {
    /// Content changed; the surface was rewritten.
    Applied,
    /// Content was already current — idempotent no-op, surface untouched.
    Unchanged,
}

/// The session's last-known-good text, with the echo-suppression flag.
#[derive(Debug, Default)]
pub struct SharedBuffer {
    content: String,
    suppress_echo: bool,
}

impl SharedBuffer {
    /// Created empty at session start.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// True only while a remote update is being written to the surface.
    pub fn suppressing(&self) -> bool {
        self.suppress_echo
    }

    /// Record an edit reported by the local editing surface.
    ///
    /// Inside the guard window this is a pure state update with no outward
    /// emission; otherwise the content is replaced and handed back for
    /// broadcast.
    pub fn apply_local_edit(&mut self, new_content: String) -> LocalEdit {
        if self.suppress_echo {
            self.content = new_content;
            return LocalEdit::SuppressedEcho;
        }
        self.content = new_content.clone();
        LocalEdit::Broadcast(new_content)
    }

    /// Apply an inbound remote update, pushing it to the editing surface.
    ///
    /// Idempotent: equal content is a no-op, which both avoids redundant
    /// re-renders and makes duplicate delivery and racing incumbent syncs
    /// harmless. The guard covers exactly the synchronous `set_content`
    /// call; the change notification it fires (if any) is routed back
    /// through [`Self::apply_local_edit`] and dies there as echo.
    pub fn apply_remote_update(
        &mut self,
        new_content: &str,
        surface: &mut dyn EditingSurface,
    ) -> RemoteApply {
        if new_content == self.content {
            return RemoteApply::Unchanged;
        }

        self.suppress_echo = true;
        self.content = new_content.to_string();
        if let Some(echo) = surface.set_content(new_content) {
            let _ = self.apply_local_edit(echo);
        }
        self.suppress_echo = false;

        RemoteApply::Applied
    }

    /// Discard contents at teardown.
    pub fn clear(&mut self) {
        self.content.clear();
        self.suppress_echo = false;
    }
}
