//! Binary wire protocol between sessions and the room relay.
//!
//! Edits are relayed as full buffers, never diffed — "last full write wins"
//! at buffer granularity. Both directions use bincode-encoded enums:
//!
//! ```text
//! Session ──ClientMessage──► Relay ──RelayMessage──► Session(s)
//!
//!   Join { room, conn, name }     Joined { roster, joiner }
//!   Edit { room, code }           Edit { code }
//!   SyncTo { content, target }    Departed { conn, name }
//!   Leave
//! ```
//!
//! A `SyncTo` is unwrapped by the relay and delivered to the target as a
//! plain `Edit`, so the receiving session applies it through the same
//! idempotent path as any other remote update.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One connected identity in a room.
///
/// `connection_id` is unique per physical connection — a reconnect under the
/// same display name gets a fresh id. Display names are not unique.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub connection_id: Uuid,
    pub display_name: String,
}

impl Participant {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            display_name: display_name.into(),
        }
    }

    /// Create with an explicit connection id (relay side, tests).
    pub fn with_id(connection_id: Uuid, display_name: impl Into<String>) -> Self {
        Self {
            connection_id,
            display_name: display_name.into(),
        }
    }
}

/// Messages a session sends to the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ClientMessage {
    /// Enter a room. First message on every connection.
    Join {
        room_id: String,
        connection_id: Uuid,
        display_name: String,
    },
    /// Full-buffer edit, fanned out to everyone else in the room.
    Edit { room_id: String, code: String },
    /// Targeted buffer handoff for a newcomer — delivered only to
    /// `target_connection_id`, never broadcast.
    SyncTo {
        content: String,
        target_connection_id: Uuid,
    },
    /// Graceful departure.
    Leave,
}

/// Messages the relay delivers to sessions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum RelayMessage {
    /// Roster snapshot, sent to the whole room (joiner included) whenever
    /// someone joins. `participants` is the full arrival-ordered roster.
    Joined {
        participants: Vec<Participant>,
        joined_display_name: String,
        joined_connection_id: Uuid,
    },
    /// Full-buffer update from another participant (or an unwrapped SyncTo).
    Edit { code: String },
    /// A participant left or its connection dropped.
    Departed {
        connection_id: Uuid,
        display_name: String,
    },
}

impl ClientMessage {
    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }
}

impl RelayMessage {
    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_roundtrip() {
        let conn = Uuid::new_v4();
        let msg = ClientMessage::Join {
            room_id: "room-42".into(),
            connection_id: conn,
            display_name: "Alice".into(),
        };

        let encoded = msg.encode().unwrap();
        let decoded = ClientMessage::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_edit_roundtrip() {
        let msg = ClientMessage::Edit {
            room_id: "room-42".into(),
            code: "fn main() {}".into(),
        };

        let encoded = msg.encode().unwrap();
        match ClientMessage::decode(&encoded).unwrap() {
            ClientMessage::Edit { room_id, code } => {
                assert_eq!(room_id, "room-42");
                assert_eq!(code, "fn main() {}");
            }
            other => panic!("Expected Edit, got {other:?}"),
        }
    }

    #[test]
    fn test_sync_to_roundtrip() {
        let target = Uuid::new_v4();
        let msg = ClientMessage::SyncTo {
            content: "shared text".into(),
            target_connection_id: target,
        };

        let encoded = msg.encode().unwrap();
        match ClientMessage::decode(&encoded).unwrap() {
            ClientMessage::SyncTo {
                content,
                target_connection_id,
            } => {
                assert_eq!(content, "shared text");
                assert_eq!(target_connection_id, target);
            }
            other => panic!("Expected SyncTo, got {other:?}"),
        }
    }

    #[test]
    fn test_joined_roundtrip() {
        let alice = Participant::new("Alice");
        let bob = Participant::new("Bob");
        let msg = RelayMessage::Joined {
            participants: vec![alice.clone(), bob.clone()],
            joined_display_name: bob.display_name.clone(),
            joined_connection_id: bob.connection_id,
        };

        let encoded = msg.encode().unwrap();
        match RelayMessage::decode(&encoded).unwrap() {
            RelayMessage::Joined {
                participants,
                joined_display_name,
                joined_connection_id,
            } => {
                assert_eq!(participants, vec![alice, bob.clone()]);
                assert_eq!(joined_display_name, "Bob");
                assert_eq!(joined_connection_id, bob.connection_id);
            }
            other => panic!("Expected Joined, got {other:?}"),
        }
    }

    #[test]
    fn test_departed_roundtrip() {
        let conn = Uuid::new_v4();
        let msg = RelayMessage::Departed {
            connection_id: conn,
            display_name: "Alice".into(),
        };

        let encoded = msg.encode().unwrap();
        let decoded = RelayMessage::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_decode_invalid_bytes() {
        let garbage = vec![0xFF, 0xFE, 0xFD];
        assert!(ClientMessage::decode(&garbage).is_err());
        assert!(RelayMessage::decode(&garbage).is_err());
    }

    #[test]
    fn test_participant_fresh_connection_id() {
        let a = Participant::new("Same");
        let b = Participant::new("Same");
        // Same display name, distinct connections
        assert_ne!(a.connection_id, b.connection_id);
    }

    #[test]
    fn test_content_is_opaque() {
        // The protocol never inspects buffer content — arbitrary text,
        // including empty and non-ASCII, must survive the codec.
        for content in ["", "héllo wörld", "a\u{0000}b", "日本語のテキスト"] {
            let msg = RelayMessage::Edit {
                code: content.into(),
            };
            let decoded = RelayMessage::decode(&msg.encode().unwrap()).unwrap();
            assert_eq!(decoded, msg);
        }
    }
}
