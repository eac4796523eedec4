use chrono::{DateTime, Utc};
use dashmap::DashMap;
use eventlog::ConsumerIdentity;
use std::collections::HashSet;

/// Unique identifier for a connection (server-generated). Doubles as the
/// token the connection's consumer group and consumer names derive from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

/// What an operator sees about a live connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub identity: ConsumerIdentity,
    pub opened_at: DateTime<Utc>,
}

/// Registry of live SSE sessions with dual indices for O(1) lookups.
///
/// Sessions never read each other's entries; the registry exists purely for
/// operational reporting.
pub struct ConnectionRegistry {
    /// Primary storage: lookup by connection_id for registration/cleanup - O(1)
    connections: DashMap<ConnectionId, ConnectionInfo>,

    /// Secondary index: connections reading each stream - O(1)
    stream_index: DashMap<String, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            stream_index: DashMap::new(),
        }
    }

    /// Register a new connection - O(1)
    pub fn register(&self, connection_id: ConnectionId, identity: ConsumerIdentity) {
        let stream = identity.stream.clone();

        self.connections.insert(
            connection_id.clone(),
            ConnectionInfo {
                identity,
                opened_at: Utc::now(),
            },
        );

        self.stream_index
            .entry(stream)
            .or_default()
            .insert(connection_id);
    }

    /// Unregister a connection - O(1)
    pub fn unregister(&self, connection_id: &ConnectionId) {
        if let Some((_, info)) = self.connections.remove(connection_id) {
            let stream = info.identity.stream;

            if let Some(mut entry) = self.stream_index.get_mut(&stream) {
                entry.remove(connection_id);

                // Clean up empty stream entries
                if entry.is_empty() {
                    drop(entry); // Release lock before removal
                    self.stream_index.remove(&stream);
                }
            }
        }
    }

    /// Live connections reading `stream`, oldest first.
    pub fn connections_for_stream(&self, stream: &str) -> Vec<(ConnectionId, ConnectionInfo)> {
        let Some(ids) = self.stream_index.get(stream) else {
            return Vec::new();
        };

        let mut connections: Vec<_> = ids
            .iter()
            .filter_map(|id| {
                self.connections
                    .get(id)
                    .map(|info| (id.clone(), info.value().clone()))
            })
            .collect();
        connections.sort_by_key(|(_, info)| info.opened_at);

        connections
    }

    /// Number of live connections reading `stream`.
    pub fn count_for_stream(&self, stream: &str) -> usize {
        self.stream_index
            .get(stream)
            .map(|ids| ids.len())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
