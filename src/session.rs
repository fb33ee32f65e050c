//! Session lifecycle: one participant's live membership in a room.
//!
//! ```text
//! Idle → Connecting → Joining → Active → Leaving → Closed
//!             │           │
//!             └────► Failed ◄┘   (transport error / join timeout)
//! ```
//!
//! The session owns the buffer, the roster, and the connection handle, and
//! runs a single input loop: inbound relay messages, local-edit reports from
//! the editing surface, and leave requests all arrive on one channel and are
//! handled one at a time, to completion. Suspension happens only at the
//! transport boundary, so no handler ever observes another handler's
//! half-applied state.
//!
//! Join/sync handshake, both roles:
//! - as newcomer: send `Join` on connect, go `Active` on the first `Joined`
//!   snapshot, start from an empty buffer and wait passively for a sync;
//! - as incumbent: when a `Joined` snapshot announces a new arrival, send
//!   the current buffer to that connection only (`SyncTo`). Racing incumbent
//!   replies converge because remote apply is idempotent last-write-wins.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::buffer::{LocalEdit, RemoteApply, SharedBuffer};
use crate::protocol::{ClientMessage, Participant, RelayMessage};
use crate::roster::Roster;
use crate::surface::EditingSurface;

/// Default wait for the `Joined` snapshot answering our join request.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Joining,
    Active,
    Leaving,
    Closed,
    Failed,
}

/// Session errors surfaced to the caller.
#[derive(Debug, Clone)]
pub enum SessionError {
    /// Start request rejected before any connect was attempted.
    Precondition(String),
    /// Transport failed to establish. Not retried internally.
    Connection(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Precondition(e) => write!(f, "Precondition failed: {e}"),
            Self::Connection(e) => write!(f, "Connection failed: {e}"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Notifications for the UI observer.
///
/// Roster snapshots are cloned, immutable views — never aliases into
/// session state.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Handshake complete; the session is in steady state.
    Active,
    /// The roster changed; full snapshot in arrival order.
    RosterChanged(Vec<Participant>),
    /// Someone else entered the room.
    ParticipantJoined { display_name: String },
    /// Someone else left the room.
    ParticipantLeft { display_name: String },
    /// Transport dropped mid-session or the handshake timed out; the
    /// session is gone without a graceful leave.
    ConnectionLost,
    /// Teardown finished.
    Closed,
}

/// Inputs consumed by the session loop.
#[derive(Debug)]
enum SessionInput {
    Inbound(RelayMessage),
    LocalEdit(String),
    Leave,
    TransportClosed,
}

/// Cheap clonable handle for feeding the session from the outside
/// (editing-surface change notifications, leave buttons).
#[derive(Debug, Clone)]
pub struct SessionHandle {
    input_tx: mpsc::Sender<SessionInput>,
}

impl SessionHandle {
    /// Report a local edit (the surface's full new content).
    pub async fn local_edit(&self, content: impl Into<String>) {
        let _ = self
            .input_tx
            .send(SessionInput::LocalEdit(content.into()))
            .await;
    }

    /// Request a graceful leave. Safe to call more than once.
    pub async fn leave(&self) {
        let _ = self.input_tx.send(SessionInput::Leave).await;
    }
}

/// One participant's membership in a room.
pub struct Session {
    room_id: String,
    local: Participant,
    server_url: String,
    state: SessionState,

    buffer: SharedBuffer,
    roster: Roster,
    surface: Box<dyn EditingSurface>,

    /// Connection handle: sender feeding the writer task. Owned exclusively;
    /// taken exactly once at teardown.
    outgoing: Option<mpsc::Sender<Vec<u8>>>,
    /// Inbound subscription, detached at teardown so no handler can fire
    /// against a torn-down session.
    reader_task: Option<JoinHandle<()>>,

    input_tx: mpsc::Sender<SessionInput>,
    input_rx: Option<mpsc::Receiver<SessionInput>>,
    event_tx: mpsc::Sender<SessionEvent>,
    event_rx: Option<mpsc::Receiver<SessionEvent>>,

    join_timeout: Duration,
}

impl Session {
    /// Create a session for `display_name` in `room_id`.
    ///
    /// `room_id` is an opaque, externally supplied identifier. The session
    /// generates a fresh connection id — reconnecting means a new session
    /// and a new id.
    pub fn new(
        room_id: impl Into<String>,
        display_name: impl Into<String>,
        server_url: impl Into<String>,
        surface: Box<dyn EditingSurface>,
    ) -> Self {
        let (input_tx, input_rx) = mpsc::channel(256);
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            room_id: room_id.into(),
            local: Participant::new(display_name),
            server_url: server_url.into(),
            state: SessionState::Idle,
            buffer: SharedBuffer::new(),
            roster: Roster::new(),
            surface,
            outgoing: None,
            reader_task: None,
            input_tx,
            input_rx: Some(input_rx),
            event_tx,
            event_rx: Some(event_rx),
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        }
    }

    /// Override the handshake timeout (see [`DEFAULT_JOIN_TIMEOUT`]).
    pub fn with_join_timeout(mut self, join_timeout: Duration) -> Self {
        self.join_timeout = join_timeout;
        self
    }

    /// Take the UI event receiver (can only be called once).
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.event_rx.take()
    }

    /// Handle for feeding local edits and leave requests into the loop.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            input_tx: self.input_tx.clone(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn local_participant(&self) -> &Participant {
        &self.local
    }

    pub fn connection_id(&self) -> Uuid {
        self.local.connection_id
    }

    pub fn buffer_content(&self) -> &str {
        self.buffer.content()
    }

    /// Immutable roster snapshot in arrival order.
    pub fn roster_snapshot(&self) -> Vec<Participant> {
        self.roster.snapshot()
    }

    /// Establish the transport and emit the join request.
    ///
    /// On success the session is `Joining`; drive it with [`Self::run`].
    /// A transport failure moves the session to `Failed` and is returned to
    /// the caller — no retry is attempted here.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        if self.local.display_name.trim().is_empty() {
            return Err(SessionError::Precondition(
                "display name must not be empty".into(),
            ));
        }
        if self.state != SessionState::Idle {
            return Err(SessionError::Precondition(format!(
                "session already started (state {:?})",
                self.state
            )));
        }

        self.state = SessionState::Connecting;
        let (ws_stream, _) = match tokio_tungstenite::connect_async(&self.server_url).await {
            Ok(ok) => ok,
            Err(e) => {
                self.state = SessionState::Failed;
                return Err(SessionError::Connection(e.to_string()));
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward the outgoing channel to the socket. Dropping
        // the sender at teardown ends the task and closes the write half.
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });
        self.outgoing = Some(out_tx);

        // Reader task: decode inbound frames into session inputs. Ends with
        // a TransportClosed input when the stream dies.
        let input_tx = self.input_tx.clone();
        self.reader_task = Some(tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        match RelayMessage::decode(&bytes) {
                            Ok(relay_msg) => {
                                if input_tx
                                    .send(SessionInput::Inbound(relay_msg))
                                    .await
                                    .is_err()
                                {
                                    return;
                                }
                            }
                            Err(e) => log::warn!("Dropping undecodable frame: {e}"),
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            let _ = input_tx.send(SessionInput::TransportClosed).await;
        }));

        self.send(ClientMessage::Join {
            room_id: self.room_id.clone(),
            connection_id: self.local.connection_id,
            display_name: self.local.display_name.clone(),
        })
        .await;

        self.state = SessionState::Joining;
        log::info!(
            "{} ({}) joining room {}",
            self.local.display_name,
            self.local.connection_id,
            self.room_id
        );
        Ok(())
    }

    /// Drive the session until it is closed or failed.
    ///
    /// Each input is handled to completion before the next is taken. While
    /// `Joining`, the loop waits at most the configured join timeout for the
    /// roster snapshot; expiry fails the session (a room with no incumbents
    /// still answers — the relay itself sends the snapshot — so a timeout
    /// here means the relay is gone).
    pub async fn run(&mut self) {
        let Some(mut input_rx) = self.input_rx.take() else {
            return;
        };

        loop {
            let next = if self.state == SessionState::Joining {
                match timeout(self.join_timeout, input_rx.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        log::warn!(
                            "No join response for room {} within {:?}",
                            self.room_id,
                            self.join_timeout
                        );
                        self.detach();
                        self.state = SessionState::Failed;
                        self.emit(SessionEvent::ConnectionLost).await;
                        break;
                    }
                }
            } else {
                input_rx.recv().await
            };

            let Some(input) = next else { break };
            self.dispatch(input).await;

            if matches!(self.state, SessionState::Closed | SessionState::Failed) {
                break;
            }
        }
    }

    /// Handle one input. Guarded so nothing fires against a torn-down
    /// session: late inputs after close are logged and dropped.
    async fn dispatch(&mut self, input: SessionInput) {
        if matches!(self.state, SessionState::Closed | SessionState::Failed) {
            log::debug!("Dropping input for closed session: {input:?}");
            return;
        }

        match input {
            SessionInput::Inbound(msg) => self.on_inbound(msg).await,
            SessionInput::LocalEdit(content) => self.on_local_edit(content).await,
            SessionInput::Leave => self.on_leave().await,
            SessionInput::TransportClosed => self.on_transport_closed().await,
        }
    }

    async fn on_inbound(&mut self, msg: RelayMessage) {
        match msg {
            RelayMessage::Joined {
                participants,
                joined_display_name,
                joined_connection_id,
            } => {
                let was_known = self.roster.contains(&joined_connection_id);
                self.roster.merge(&participants);
                self.emit(SessionEvent::RosterChanged(self.roster.snapshot()))
                    .await;

                let is_self = joined_connection_id == self.local.connection_id;
                if !is_self {
                    self.emit(SessionEvent::ParticipantJoined {
                        display_name: joined_display_name,
                    })
                    .await;
                }

                if self.state == SessionState::Joining {
                    // Newcomer role: snapshot received, steady state begins.
                    // The buffer stays empty until an incumbent syncs us.
                    self.state = SessionState::Active;
                    self.emit(SessionEvent::Active).await;
                } else if self.state == SessionState::Active && !is_self && !was_known {
                    // Incumbent role: hand the authoritative buffer to the
                    // new arrival, addressed to it alone.
                    self.send(ClientMessage::SyncTo {
                        content: self.buffer.content().to_string(),
                        target_connection_id: joined_connection_id,
                    })
                    .await;
                }
            }

            RelayMessage::Edit { code } => {
                // Accepted in Joining as well: a sync can overtake our own
                // roster snapshot, and the passive newcomer takes whatever
                // arrives first.
                match self.buffer.apply_remote_update(&code, self.surface.as_mut()) {
                    RemoteApply::Applied => log::trace!("Applied remote update"),
                    RemoteApply::Unchanged => {}
                }
            }

            RelayMessage::Departed {
                connection_id,
                display_name,
            } => {
                let removed = self.roster.remove(&connection_id);
                self.emit(SessionEvent::RosterChanged(self.roster.snapshot()))
                    .await;
                if removed.is_some() {
                    self.emit(SessionEvent::ParticipantLeft { display_name }).await;
                }
            }
        }
    }

    async fn on_local_edit(&mut self, content: String) {
        match self.buffer.apply_local_edit(content) {
            LocalEdit::Broadcast(code) => {
                self.send(ClientMessage::Edit {
                    room_id: self.room_id.clone(),
                    code,
                })
                .await;
            }
            LocalEdit::SuppressedEcho => {}
        }
    }

    async fn on_leave(&mut self) {
        if matches!(self.state, SessionState::Leaving) {
            return;
        }
        self.state = SessionState::Leaving;
        self.send(ClientMessage::Leave).await;
        self.detach();
        self.buffer.clear();
        self.roster.clear();
        self.state = SessionState::Closed;
        self.emit(SessionEvent::Closed).await;
        log::info!("Left room {}", self.room_id);
    }

    async fn on_transport_closed(&mut self) {
        // Connection already gone: no graceful leave, straight to Closed.
        self.detach();
        self.buffer.clear();
        self.roster.clear();
        self.state = SessionState::Closed;
        self.emit(SessionEvent::ConnectionLost).await;
        self.emit(SessionEvent::Closed).await;
        log::info!("Transport lost for room {}", self.room_id);
    }

    /// Release the connection handle and detach the inbound subscription.
    /// Idempotent: both are `Option::take`n, so a second call is a no-op.
    fn detach(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        drop(self.outgoing.take());
    }

    /// Best-effort send. Failures once active are tolerated — the next
    /// successful full-buffer event resynchronizes.
    async fn send(&mut self, msg: ClientMessage) {
        let Some(tx) = self.outgoing.as_ref() else {
            log::debug!("No transport, dropping outbound {msg:?}");
            return;
        };
        match msg.encode() {
            Ok(bytes) => {
                if tx.send(bytes).await.is_err() {
                    log::warn!("Transport send failed");
                }
            }
            Err(e) => log::error!("Failed to encode outbound message: {e}"),
        }
    }

    async fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event).await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Owning context ended: make sure the subscription and the handle
        // are released even without an explicit leave.
        self.detach();
    }
}
