//! WebSocket room relay.
//!
//! ```text
//! Session A ──┐
//!              ├── Room (room_id) ── RoomGroup (fan-out + directs)
//! Session B ──┘         │
//!                       ├── Joined  ──► everyone (joiner included)
//!                       ├── Edit    ──► everyone but the origin
//!                       ├── SyncTo  ──► unwrapped as Edit, target only
//!                       └── Departed──► everyone (on leave/disconnect)
//! ```
//!
//! The relay holds no document state: it forwards full buffers verbatim and
//! lets the sessions' last-write-wins apply sort out races. A room exists
//! exactly as long as it has participants.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use crate::broadcast::{RoomGroup, RELAY_ORIGIN};
use crate::protocol::{ClientMessage, Participant, RelayMessage};

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum participants per room, enforced at join
    pub max_participants_per_room: usize,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_participants_per_room: 100,
            broadcast_capacity: 256,
        }
    }
}

/// Relay statistics.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
}

/// The room relay server.
pub struct RoomRelay {
    config: RelayConfig,
    rooms: Arc<RwLock<HashMap<String, Arc<RoomGroup>>>>,
    stats: Arc<RwLock<RelayStats>>,
}

impl RoomRelay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            rooms: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(RelayStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// Accept WebSocket connections until the task is dropped.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Room relay listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let rooms = self.rooms.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, rooms, stats, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle one participant connection end to end.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        rooms: Arc<RwLock<HashMap<String, Arc<RoomGroup>>>>,
        stats: Arc<RwLock<RelayStats>>,
        config: RelayConfig,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        // Room membership for this connection, set by the Join message
        let mut membership: Option<(String, Participant, Arc<RoomGroup>)> = None;
        let mut broadcast_rx: Option<tokio::sync::broadcast::Receiver<crate::broadcast::RoomFrame>> =
            None;
        let mut direct_rx: Option<tokio::sync::mpsc::Receiver<Arc<Vec<u8>>>> = None;

        loop {
            tokio::select! {
                // Inbound WebSocket frame
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += bytes.len() as u64;
                            }

                            match ClientMessage::decode(&bytes) {
                                Ok(ClientMessage::Join { room_id, connection_id, display_name }) => {
                                    if membership.is_some() {
                                        log::warn!("Duplicate join from {addr}, ignoring");
                                        continue;
                                    }

                                    let room = {
                                        let mut rooms_w = rooms.write().await;
                                        rooms_w
                                            .entry(room_id.clone())
                                            .or_insert_with(|| {
                                                Arc::new(RoomGroup::new(
                                                    config.broadcast_capacity,
                                                    config.max_participants_per_room,
                                                ))
                                            })
                                            .clone()
                                    };

                                    let participant = Participant::with_id(connection_id, display_name);
                                    // The group checks the seat limit under
                                    // its roster lock, so racing joins cannot
                                    // both squeeze in.
                                    let Some((brx, drx)) = room.join(participant.clone()).await else {
                                        log::warn!(
                                            "Room {room_id} full ({} participants), refusing {}",
                                            config.max_participants_per_room,
                                            participant.display_name
                                        );
                                        break;
                                    };
                                    broadcast_rx = Some(brx);
                                    direct_rx = Some(drx);

                                    // Full roster snapshot to the whole room,
                                    // the joiner included — incumbents learn
                                    // the arrival, the newcomer gets its
                                    // first (and authoritative) roster.
                                    let joined = RelayMessage::Joined {
                                        participants: room.participants().await,
                                        joined_display_name: participant.display_name.clone(),
                                        joined_connection_id: connection_id,
                                    };
                                    let _ = room.broadcast(RELAY_ORIGIN, &joined);

                                    log::info!(
                                        "{} ({connection_id}) joined room {room_id}",
                                        participant.display_name
                                    );
                                    membership = Some((room_id, participant, room));

                                    let mut s = stats.write().await;
                                    s.active_rooms = rooms.read().await.len();
                                }

                                Ok(ClientMessage::Edit { room_id: _, code }) => {
                                    if let Some((_, participant, room)) = &membership {
                                        let _ = room.broadcast(
                                            participant.connection_id,
                                            &RelayMessage::Edit { code },
                                        );
                                    } else {
                                        log::debug!("Edit before join from {addr}, dropping");
                                    }
                                }

                                Ok(ClientMessage::SyncTo { content, target_connection_id }) => {
                                    if let Some((room_id, _, room)) = &membership {
                                        // Unwrapped to a plain Edit so the
                                        // target applies it like any remote
                                        // update.
                                        match room
                                            .send_to(
                                                &target_connection_id,
                                                &RelayMessage::Edit { code: content },
                                            )
                                            .await
                                        {
                                            Ok(true) => {}
                                            Ok(false) => log::debug!(
                                                "Sync target {target_connection_id} not in room {room_id}"
                                            ),
                                            Err(e) => log::error!("Failed to encode sync: {e}"),
                                        }
                                    }
                                }

                                Ok(ClientMessage::Leave) => {
                                    log::info!("Graceful leave from {addr}");
                                    break;
                                }

                                Err(e) => {
                                    log::warn!("Failed to decode message from {addr}: {e}");
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            // A failed write means the socket is gone; break
                            // so the departure block below still runs.
                            if let Err(e) = ws_sender.send(Message::Pong(data)).await {
                                log::warn!("Write to {addr} failed: {e}");
                                break;
                            }
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                // Room-wide fan-out
                frame = async {
                    if let Some(ref mut rx) = broadcast_rx {
                        rx.recv().await
                    } else {
                        // Not in a room yet — wait forever
                        std::future::pending().await
                    }
                } => {
                    match frame {
                        Ok(frame) => {
                            // Don't echo a frame back to its origin
                            let own = membership.as_ref().map(|(_, p, _)| p.connection_id);
                            if frame.origin != RELAY_ORIGIN && Some(frame.origin) == own {
                                continue;
                            }
                            if let Err(e) =
                                ws_sender.send(Message::Binary(frame.bytes.to_vec().into())).await
                            {
                                log::warn!("Write to {addr} failed mid-fanout: {e}");
                                break;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("Connection {addr} lagged by {n} frames");
                        }
                        Err(_) => break,
                    }
                }

                // Targeted delivery (sync handoffs)
                delivery = async {
                    if let Some(ref mut rx) = direct_rx {
                        rx.recv().await
                    } else {
                        std::future::pending().await
                    }
                } => {
                    match delivery {
                        Some(bytes) => {
                            if let Err(e) =
                                ws_sender.send(Message::Binary(bytes.to_vec().into())).await
                            {
                                log::warn!("Write to {addr} failed mid-delivery: {e}");
                                break;
                            }
                        }
                        None => {
                            // Room side dropped the channel (we left)
                            direct_rx = None;
                        }
                    }
                }
            }
        }

        // Departure: prune the roster, tell the room, drop the room if empty
        if let Some((room_id, participant, room)) = membership {
            if room.leave(&participant.connection_id).await.is_some() {
                let departed = RelayMessage::Departed {
                    connection_id: participant.connection_id,
                    display_name: participant.display_name.clone(),
                };
                let _ = room.broadcast(RELAY_ORIGIN, &departed);
                log::info!(
                    "{} ({}) left room {room_id}",
                    participant.display_name,
                    participant.connection_id
                );
            }

            if room.is_empty().await {
                rooms.write().await.remove(&room_id);
                log::info!("Room {room_id} removed (empty)");
            }
        }

        {
            let mut s = stats.write().await;
            s.active_connections -= 1;
            s.active_rooms = rooms.read().await.len();
        }

        Ok(())
    }

    /// Relay statistics snapshot.
    pub async fn stats(&self) -> RelayStats {
        self.stats.read().await.clone()
    }

    /// Number of rooms currently alive.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_config_default() {
        let config = RelayConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.max_participants_per_room, 100);
        assert_eq!(config.broadcast_capacity, 256);
    }

    #[test]
    fn test_relay_creation() {
        let relay = RoomRelay::with_defaults();
        assert_eq!(relay.bind_addr(), "127.0.0.1:9090");
    }

    #[test]
    fn test_relay_custom_config() {
        let config = RelayConfig {
            bind_addr: "0.0.0.0:8080".to_string(),
            max_participants_per_room: 2,
            broadcast_capacity: 32,
        };
        let relay = RoomRelay::new(config);
        assert_eq!(relay.bind_addr(), "0.0.0.0:8080");
    }

    #[tokio::test]
    async fn test_relay_stats_initial() {
        let relay = RoomRelay::with_defaults();
        let stats = relay.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.total_bytes, 0);
        assert_eq!(stats.active_rooms, 0);
        assert_eq!(relay.room_count().await, 0);
    }
}
