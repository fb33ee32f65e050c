//! Arrival-ordered, deduplicated participant roster.
//!
//! Join snapshots from different participants can overlap (every `Joined`
//! carries the full room list), so merging must reconcile duplicates:
//! `connection_id` is the key, the most recently received record wins, and
//! order is "first observed" — stable across subsequent snapshots, never
//! resorted.

use uuid::Uuid;

use crate::protocol::Participant;

/// The set of currently-connected participants, as observed by one session
/// (or one relay room).
///
/// Consumers only ever receive cloned snapshots; internal entries are never
/// handed out by mutable reference.
#[derive(Debug, Default)]
pub struct Roster {
    entries: Vec<Participant>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge an incoming snapshot into the roster.
    ///
    /// Known connection ids are updated in place (last value wins, position
    /// kept); unknown ones are appended in the order the snapshot supplied
    /// them. Returns the connection ids that were new arrivals.
    pub fn merge(&mut self, incoming: &[Participant]) -> Vec<Uuid> {
        let mut arrivals = Vec::new();
        for participant in incoming {
            match self
                .entries
                .iter_mut()
                .find(|p| p.connection_id == participant.connection_id)
            {
                Some(existing) => *existing = participant.clone(),
                None => {
                    arrivals.push(participant.connection_id);
                    self.entries.push(participant.clone());
                }
            }
        }
        arrivals
    }

    /// Add or update a single participant. Equivalent to a one-entry merge.
    pub fn upsert(&mut self, participant: Participant) -> bool {
        self.merge(std::slice::from_ref(&participant)).len() == 1
    }

    /// Remove a participant by connection id.
    ///
    /// A departure for an already-removed connection is not an error — it can
    /// legitimately arrive after a local leave already pruned the entry.
    pub fn remove(&mut self, connection_id: &Uuid) -> Option<Participant> {
        let idx = self
            .entries
            .iter()
            .position(|p| p.connection_id == *connection_id)?;
        Some(self.entries.remove(idx))
    }

    pub fn contains(&self, connection_id: &Uuid) -> bool {
        self.entries
            .iter()
            .any(|p| p.connection_id == *connection_id)
    }

    /// Immutable snapshot in arrival order.
    pub fn snapshot(&self) -> Vec<Participant> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
