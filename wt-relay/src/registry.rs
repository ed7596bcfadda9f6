//! Sessions visible to the relay.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEntry {
    pub connection: ConnectionId,
    pub session_id: u64,
}

/// Registered sessions in registration order. A connection carries at most
/// one session, so entries are keyed by connection.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    entries: Vec<SessionEntry>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the connection already has an entry.
    pub fn register(&mut self, entry: SessionEntry) -> bool {
        if self.contains(entry.connection) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    pub fn remove(&mut self, connection: ConnectionId) -> Option<SessionEntry> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.connection == connection)?;
        Some(self.entries.remove(idx))
    }

    pub fn contains(&self, connection: ConnectionId) -> bool {
        self.entries.iter().any(|e| e.connection == connection)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SessionEntry> {
        self.entries.iter()
    }

    /// Every entry except the one for `connection`.
    pub fn peers(&self, connection: ConnectionId) -> impl Iterator<Item = &SessionEntry> {
        self.entries
            .iter()
            .filter(move |e| e.connection != connection)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
