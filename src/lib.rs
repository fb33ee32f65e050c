//! # codepulse-collab — Shared-buffer editing sessions over a room relay
//!
//! Multiple participants edit one text buffer and see each other's changes
//! with low latency. The protocol is deliberately simple: edits travel as
//! full buffers and the last full write wins — no operational transforms,
//! no CRDT merge, no history.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐      WebSocket      ┌─────────────┐
//! │  Session    │ ◄──────────────────► │  RoomRelay  │
//! │ (per user)  │    Binary Proto      │  (central)  │
//! └──────┬──────┘                      └──────┬──────┘
//!        │                                    │
//!        ▼                                    ▼
//! ┌─────────────┐                      ┌─────────────┐
//! │ SharedBuffer│                      │  RoomGroup  │
//! │ + Roster    │                      │  (fan-out)  │
//! └──────┬──────┘                      └─────────────┘
//!        │
//!        ▼
//! ┌─────────────┐
//! │EditingSurface│  (the text widget, external)
//! └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — Binary wire protocol (bincode-encoded message enums)
//! - [`roster`] — Arrival-ordered, deduplicated participant set
//! - [`buffer`] — Last-write-wins buffer with the echo-suppression guard
//! - [`surface`] — Editing-surface seam (full-buffer read/replace)
//! - [`session`] — Session lifecycle and the join/sync handshake
//! - [`broadcast`] — Room fan-out with targeted delivery
//! - [`relay`] — WebSocket room relay server
//!
//! ## Joining a room
//!
//! A newcomer sends `Join`, receives the room's roster snapshot, and goes
//! active with an empty buffer. Every incumbent that sees the arrival
//! replies with a `SyncTo` carrying its current buffer, addressed to the
//! newcomer alone; because remote apply is idempotent and wholesale,
//! overlapping replies converge without electing a sync source.

pub mod broadcast;
pub mod buffer;
pub mod protocol;
pub mod relay;
pub mod roster;
pub mod session;
pub mod surface;

// Re-exports for convenience
pub use broadcast::{RoomFrame, RoomGroup, RELAY_ORIGIN};
pub use buffer::{LocalEdit, RemoteApply, SharedBuffer};
pub use protocol::{ClientMessage, Participant, ProtocolError, RelayMessage};
pub use relay::{RelayConfig, RelayStats, RoomRelay};
pub use roster::Roster;
pub use session::{
    Session, SessionError, SessionEvent, SessionHandle, SessionState, DEFAULT_JOIN_TIMEOUT,
};
pub use surface::{EditingSurface, TextSurface};
