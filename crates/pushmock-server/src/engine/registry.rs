//! Connection registry: the in-memory table of open push streams.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::info;

/// Write half of an open push stream. Sends enqueue a wire frame; the
/// channel closes exactly once, when the client disconnects.
pub type EventSink = mpsc::UnboundedSender<Bytes>;

/// One open push stream.
#[derive(Clone)]
pub struct Connection {
    pub id: String,
    pub identity: String,
    pub scenario: Option<String>,
    pub sink: EventSink,
    pub created_at: DateTime<Utc>,
}

/// Listing row for the admin surfaces.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub id: String,
    pub url: String,
    pub scenario: Option<String>,
    pub created_at: String,
}

/// Registry of open connections, keyed by generated id.
///
/// All operations are short critical sections over one table; nothing here
/// performs I/O while holding the lock.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Record a newly opened stream and hand back its generated id.
    pub fn open(&self, identity: &str, scenario: Option<&str>, sink: EventSink) -> String {
        let id = generate_connection_id();
        let connection = Connection {
            id: id.clone(),
            identity: identity.to_string(),
            scenario: scenario.map(str::to_string),
            sink,
            created_at: Utc::now(),
        };
        self.connections.write().insert(id.clone(), connection);
        info!(
            "Connection opened: {} for identity: {}{}",
            id,
            identity,
            scenario.map(|s| format!(" with scenario: {s}")).unwrap_or_default()
        );
        id
    }

    /// Remove a connection record. The caller is responsible for disarming
    /// its schedule first.
    pub fn remove(&self, connection_id: &str) -> Option<Connection> {
        self.connections.write().remove(connection_id)
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.connections.read().contains_key(connection_id)
    }

    /// Full record for a connection, if it is still registered.
    pub fn get(&self, connection_id: &str) -> Option<Connection> {
        self.connections.read().get(connection_id).cloned()
    }

    /// Live sink for a connection, if it is still registered.
    pub fn sink(&self, connection_id: &str) -> Option<EventSink> {
        self.connections
            .read()
            .get(connection_id)
            .map(|conn| conn.sink.clone())
    }

    /// Snapshot of every open connection, for display.
    pub fn list(&self) -> Vec<ConnectionInfo> {
        self.connections
            .read()
            .values()
            .map(|conn| ConnectionInfo {
                id: conn.id.clone(),
                url: conn.identity.clone(),
                scenario: conn.scenario.clone(),
                created_at: conn.created_at.to_rfc3339(),
            })
            .collect()
    }

    /// Ids of every open connection.
    pub fn ids(&self) -> Vec<String> {
        self.connections.read().keys().cloned().collect()
    }

    /// Sinks of every connection whose identity string-equals `identity`.
    pub fn sinks_for_identity(&self, identity: &str) -> Vec<(String, EventSink)> {
        self.connections
            .read()
            .values()
            .filter(|conn| conn.identity == identity)
            .map(|conn| (conn.id.clone(), conn.sink.clone()))
            .collect()
    }

    /// Sinks of every open connection.
    pub fn all_sinks(&self) -> Vec<(String, EventSink)> {
        self.connections
            .read()
            .values()
            .map(|conn| (conn.id.clone(), conn.sink.clone()))
            .collect()
    }

    /// Ids of connections matching an identity (exact or same base) whose
    /// scenario agrees with the given one. A scenario agrees when either
    /// side is unset or both are equal.
    pub fn ids_matching(&self, identity: &str, scenario: Option<&str>) -> Vec<String> {
        let base = crate::matcher::normalize_base(identity);
        self.connections
            .read()
            .values()
            .filter(|conn| {
                conn.identity == identity || crate::matcher::normalize_base(&conn.identity) == base
            })
            .filter(|conn| match (scenario, conn.scenario.as_deref()) {
                (Some(requested), Some(held)) => requested == held,
                _ => true,
            })
            .map(|conn| conn.id.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.connections.read().len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Millisecond timestamp plus a random suffix; unpredictable enough to
/// avoid collision under concurrent opens.
fn generate_connection_id() -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("{}-{}", millis, suffix.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> (EventSink, mpsc::UnboundedReceiver<Bytes>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn test_open_and_get_sink() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = sink();
        let id = registry.open("https://api/x", None, tx);
        assert!(registry.contains(&id));
        assert!(registry.sink(&id).is_some());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_remove_unknown_is_none() {
        let registry = ConnectionRegistry::new();
        assert!(registry.remove("nope").is_none());
    }

    #[test]
    fn test_list_snapshot_fields() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = sink();
        let id = registry.open("https://api/x", Some("S1"), tx);
        let listing = registry.list();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].id, id);
        assert_eq!(listing[0].url, "https://api/x");
        assert_eq!(listing[0].scenario.as_deref(), Some("S1"));
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let registry = ConnectionRegistry::new();
        let mut ids = std::collections::HashSet::new();
        for _ in 0..100 {
            let (tx, _rx) = sink();
            ids.insert(registry.open("https://api/x", None, tx));
        }
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn test_ids_matching_base_and_scenario() {
        let registry = ConnectionRegistry::new();
        let (tx1, _rx1) = sink();
        let (tx2, _rx2) = sink();
        let (tx3, _rx3) = sink();
        let with_query = registry.open("https://api/x?id=1", None, tx1);
        let plain = registry.open("https://api/x", Some("S1"), tx2);
        let other = registry.open("https://api/y", None, tx3);

        let matched = registry.ids_matching("https://api/x", None);
        assert!(matched.contains(&with_query));
        assert!(matched.contains(&plain));
        assert!(!matched.contains(&other));

        // A scenario only excludes connections holding a different one.
        let matched = registry.ids_matching("https://api/x", Some("S2"));
        assert!(matched.contains(&with_query));
        assert!(!matched.contains(&plain));
    }
}
