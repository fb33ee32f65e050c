//! Room-scoped fan-out with targeted delivery.
//!
//! Every participant in a room shares one tokio broadcast channel; each
//! connection also gets a private mpsc channel so the relay can route
//! `SyncTo` handoffs to a single newcomer without the rest of the room
//! seeing them.
//!
//! Frames carry the originating connection id so delivery loops can skip
//! echoing a message back to its sender. Frames the relay itself produces
//! (join/departure snapshots) use [`RELAY_ORIGIN`] and reach everyone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use uuid::Uuid;

use crate::protocol::{Participant, ProtocolError, RelayMessage};
use crate::roster::Roster;

/// Origin id for frames produced by the relay itself; never skipped.
pub const RELAY_ORIGIN: Uuid = Uuid::nil();

/// Per-connection buffer for targeted deliveries.
const DIRECT_CAPACITY: usize = 64;

/// One pre-encoded message fanned out to a room.
#[derive(Debug, Clone)]
pub struct RoomFrame {
    /// Connection whose inbound message produced this frame.
    pub origin: Uuid,
    pub bytes: Arc<Vec<u8>>,
}

/// Fan-out group for a single room.
///
/// Owns the room's arrival-ordered roster and the per-connection direct
/// channels. Lagging receivers drop frames (broadcast backpressure); a
/// dropped full-buffer edit is self-healing since the next one replaces it
/// wholesale.
pub struct RoomGroup {
    sender: broadcast::Sender<RoomFrame>,
    roster: RwLock<Roster>,
    directs: RwLock<HashMap<Uuid, mpsc::Sender<Arc<Vec<u8>>>>>,
    capacity: usize,
    max_participants: usize,
    messages_sent: AtomicU64,
}

impl RoomGroup {
    /// Create a group buffering up to `capacity` frames per receiver and
    /// seating at most `max_participants`.
    pub fn new(capacity: usize, max_participants: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            roster: RwLock::new(Roster::new()),
            directs: RwLock::new(HashMap::new()),
            capacity,
            max_participants,
            messages_sent: AtomicU64::new(0),
        }
    }

    /// Register a participant.
    ///
    /// Returns the broadcast receiver for room traffic and the private
    /// receiver for targeted deliveries, or `None` when the room is full.
    /// The seat check and the roster insert happen under one write lock,
    /// so concurrent joins cannot overshoot the limit. A connection id
    /// already in the roster keeps its seat.
    pub async fn join(
        &self,
        participant: Participant,
    ) -> Option<(
        broadcast::Receiver<RoomFrame>,
        mpsc::Receiver<Arc<Vec<u8>>>,
    )> {
        let connection_id = participant.connection_id;
        {
            let mut roster = self.roster.write().await;
            if !roster.contains(&connection_id) && roster.len() >= self.max_participants {
                return None;
            }
            roster.upsert(participant);
        }

        let (direct_tx, direct_rx) = mpsc::channel(DIRECT_CAPACITY);
        self.directs.write().await.insert(connection_id, direct_tx);

        Some((self.sender.subscribe(), direct_rx))
    }

    /// Remove a participant. No-op (returns `None`) if unknown.
    pub async fn leave(&self, connection_id: &Uuid) -> Option<Participant> {
        self.directs.write().await.remove(connection_id);
        self.roster.write().await.remove(connection_id)
    }

    /// Arrival-ordered roster snapshot.
    pub async fn participants(&self) -> Vec<Participant> {
        self.roster.read().await.snapshot()
    }

    pub async fn participant_count(&self) -> usize {
        self.roster.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.roster.read().await.is_empty()
    }

    /// Fan a message out to every receiver in the room.
    ///
    /// Returns the number of receivers the frame reached. Sender-side
    /// filtering is the delivery loop's job, via `origin`.
    pub fn broadcast(&self, origin: Uuid, msg: &RelayMessage) -> Result<usize, ProtocolError> {
        let encoded = msg.encode()?;
        let frame = RoomFrame {
            origin,
            bytes: Arc::new(encoded),
        };
        let count = self.sender.send(frame).unwrap_or(0);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(count)
    }

    /// Deliver a message to one connection only.
    ///
    /// Returns `Ok(false)` when the target is not (or no longer) in the
    /// room — the caller logs and drops, it is not a protocol failure.
    pub async fn send_to(
        &self,
        target: &Uuid,
        msg: &RelayMessage,
    ) -> Result<bool, ProtocolError> {
        let encoded = msg.encode()?;
        let tx = {
            let directs = self.directs.read().await;
            match directs.get(target) {
                Some(tx) => tx.clone(),
                None => return Ok(false),
            }
        };
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(tx.send(Arc::new(encoded)).await.is_ok())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_participants(&self) -> usize {
        self.max_participants
    }

    /// Frames fanned out or targeted so far (lock-free counter).
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_and_leave() {
        let group = RoomGroup::new(16, 8);
        let alice = Participant::new("Alice");
        let id = alice.connection_id;

        let (_brx, _drx) = group.join(alice).await.unwrap();
        assert_eq!(group.participant_count().await, 1);

        let removed = group.leave(&id).await.unwrap();
        assert_eq!(removed.display_name, "Alice");
        assert!(group.is_empty().await);

        // Unknown leave: no-op
        assert!(group.leave(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_receivers() {
        let group = RoomGroup::new(16, 8);
        let alice = Participant::new("Alice");
        let bob = Participant::new("Bob");

        let (mut rx_a, _) = group.join(alice.clone()).await.unwrap();
        let (mut rx_b, _) = group.join(bob).await.unwrap();

        let msg = RelayMessage::Edit { code: "x".into() };
        let count = group.broadcast(alice.connection_id, &msg).unwrap();
        assert_eq!(count, 2);

        let frame_a = rx_a.recv().await.unwrap();
        let frame_b = rx_b.recv().await.unwrap();
        assert_eq!(frame_a.origin, alice.connection_id);
        assert_eq!(RelayMessage::decode(&frame_b.bytes).unwrap(), msg);
    }

    #[tokio::test]
    async fn test_send_to_targets_one_connection() {
        let group = RoomGroup::new(16, 8);
        let alice = Participant::new("Alice");
        let bob = Participant::new("Bob");

        let (_brx_a, mut drx_a) = group.join(alice.clone()).await.unwrap();
        let (_brx_b, mut drx_b) = group.join(bob.clone()).await.unwrap();

        let msg = RelayMessage::Edit {
            code: "handoff".into(),
        };
        assert!(group.send_to(&bob.connection_id, &msg).await.unwrap());

        let bytes = drx_b.recv().await.unwrap();
        assert_eq!(RelayMessage::decode(&bytes).unwrap(), msg);
        assert!(drx_a.try_recv().is_err(), "Alice must not see the handoff");
    }

    #[tokio::test]
    async fn test_send_to_unknown_target() {
        let group = RoomGroup::new(16, 8);
        let msg = RelayMessage::Edit { code: "x".into() };
        let delivered = group.send_to(&Uuid::from_u128(7), &msg).await.unwrap();
        assert!(!delivered);
    }

    #[tokio::test]
    async fn test_roster_snapshot_in_arrival_order() {
        let group = RoomGroup::new(16, 8);
        let alice = Participant::new("Alice");
        let bob = Participant::new("Bob");

        let (_a, _) = group.join(alice.clone()).await.unwrap();
        let (_b, _) = group.join(bob.clone()).await.unwrap();

        assert_eq!(group.participants().await, vec![alice, bob]);
    }

    #[tokio::test]
    async fn test_join_refused_at_capacity() {
        let group = RoomGroup::new(16, 2);
        let alice = Participant::new("Alice");

        let _seat_a = group.join(alice.clone()).await.unwrap();
        let _seat_b = group.join(Participant::new("Bob")).await.unwrap();

        // Third distinct connection finds the room full
        assert!(group.join(Participant::new("Carol")).await.is_none());
        assert_eq!(group.participant_count().await, 2);

        // A known connection id re-registering keeps its seat
        assert!(group.join(alice).await.is_some());
        assert_eq!(group.participant_count().await, 2);
    }

    #[tokio::test]
    async fn test_message_counter() {
        let group = RoomGroup::new(16, 8);
        let alice = Participant::new("Alice");
        let (_rx, _) = group.join(alice.clone()).await.unwrap();

        let msg = RelayMessage::Edit { code: "x".into() };
        group.broadcast(RELAY_ORIGIN, &msg).unwrap();
        group.broadcast(RELAY_ORIGIN, &msg).unwrap();
        assert_eq!(group.messages_sent(), 2);
    }
}
