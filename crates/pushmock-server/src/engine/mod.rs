//! The push engine: one service object owning connection state, schedules,
//! and dispatch. Constructed once per process and shared by handle; there
//! is no module-level singleton.

mod dispatcher;
mod registry;
mod scheduler;

pub use dispatcher::{keep_alive_frame, EventDispatcher};
pub use registry::{Connection, ConnectionInfo, ConnectionRegistry, EventSink};
pub use scheduler::TimelineScheduler;

use crate::mock::{self, FileMockStore, MockDefinition, StoredMock};
use std::sync::Arc;
use tracing::info;

/// Errors surfaced to the control surfaces.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),
    #[error("Mock not found for identity: {0}")]
    MockNotFound(String),
}

/// Single-process authority over open streams and their schedules.
pub struct PushEngine {
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<EventDispatcher>,
    scheduler: TimelineScheduler,
    store: Arc<FileMockStore>,
}

impl PushEngine {
    pub fn new(store: Arc<FileMockStore>) -> Arc<Self> {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Arc::new(EventDispatcher::new(Arc::clone(&registry)));
        let scheduler = TimelineScheduler::new(Arc::clone(&dispatcher));
        Arc::new(Self {
            registry,
            dispatcher,
            scheduler,
            store,
        })
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn store(&self) -> &FileMockStore {
        &self.store
    }

    /// Register a new stream, then resolve its identity against the store
    /// and arm the matching mock, if any. Returns the connection id.
    pub fn open_stream(&self, identity: &str, scenario: Option<&str>, sink: EventSink) -> String {
        let connection_id = self.registry.open(identity, scenario, sink);
        match mock::resolve(identity, scenario, self.store.as_ref()) {
            Some(stored) => {
                info!(
                    "Mock found for identity: {}, starting mock for connection {}",
                    identity, connection_id
                );
                self.scheduler.arm(&connection_id, &stored.definition);
            }
            None => {
                info!("No mock found for identity: {}", identity);
            }
        }
        connection_id
    }

    /// Tear down a stream: disarm first, then drop the registry entry, so
    /// no deferred delivery outlives the record by more than one in-flight
    /// firing.
    pub fn close(&self, connection_id: &str) {
        self.scheduler.disarm(connection_id);
        if self.registry.remove(connection_id).is_some() {
            info!("Connection closed: {}", connection_id);
        }
    }

    /// Resolve an identity (+ optional scenario) against the store.
    pub fn resolve(&self, identity: &str, scenario: Option<&str>) -> Option<StoredMock> {
        mock::resolve(identity, scenario, self.store.as_ref())
    }

    /// Arm a definition on one already-open connection.
    pub fn start_mock_for_connection(
        &self,
        connection_id: &str,
        definition: &MockDefinition,
    ) -> Result<(), EngineError> {
        if !self.registry.contains(connection_id) {
            return Err(EngineError::ConnectionNotFound(connection_id.to_string()));
        }
        self.scheduler.arm(connection_id, definition);
        Ok(())
    }

    /// Arm a definition on every connection matching the identity whose
    /// scenario agrees. Returns how many connections were armed.
    pub fn start_mock_for_identity(
        &self,
        identity: &str,
        scenario: Option<&str>,
        definition: &MockDefinition,
    ) -> usize {
        let targets = self.registry.ids_matching(identity, scenario);
        for connection_id in &targets {
            self.scheduler.arm(connection_id, definition);
        }
        targets.len()
    }

    /// Close every sink and cancel every schedule before process exit.
    pub fn shutdown(&self) {
        info!("Shutting down: closing {} connection(s)", self.registry.count());
        self.scheduler.disarm_all();
        for connection_id in self.registry.ids() {
            self.registry.remove(&connection_id);
        }
    }

    #[cfg(test)]
    pub(crate) fn scheduler(&self) -> &TimelineScheduler {
        &self.scheduler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::TimelineEntry;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn definition(url: &str, entries: Vec<(u64, i64, u16)>, data: Vec<serde_json::Value>) -> MockDefinition {
        MockDefinition {
            url: url.to_string(),
            scenario: None,
            matching: None,
            responses: entries
                .into_iter()
                .map(|(time, response, status_code)| TimelineEntry {
                    time,
                    response,
                    status_code,
                })
                .collect(),
            data,
        }
    }

    fn engine_with_empty_store() -> (Arc<PushEngine>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileMockStore::new(dir.path()));
        store.ensure_layout().unwrap();
        (PushEngine::new(store), dir)
    }

    async fn recv_frame(rx: &mut mpsc::UnboundedReceiver<Bytes>, within: Duration) -> Option<Bytes> {
        tokio::time::timeout(within, rx.recv()).await.ok().flatten()
    }

    #[tokio::test]
    async fn test_arm_fires_timeline_in_offset_order() {
        let (engine, _dir) = engine_with_empty_store();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = engine.registry().open("https://api/x", None, tx);

        let def = definition(
            "https://api/x",
            vec![(0, 0, 200), (30, 1, 200)],
            vec![serde_json::json!({"seq": 1}), serde_json::json!({"seq": 2})],
        );
        engine.start_mock_for_connection(&id, &def).unwrap();

        let first = recv_frame(&mut rx, Duration::from_millis(500)).await.unwrap();
        let second = recv_frame(&mut rx, Duration::from_millis(500)).await.unwrap();
        assert!(String::from_utf8_lossy(&first).contains("\"seq\":1"));
        assert!(String::from_utf8_lossy(&second).contains("\"seq\":2"));
    }

    #[tokio::test]
    async fn test_rearm_replaces_previous_schedule() {
        let (engine, _dir) = engine_with_empty_store();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = engine.registry().open("https://api/x", None, tx);

        let slow = definition(
            "https://api/x",
            vec![(80, 0, 200)],
            vec![serde_json::json!({"from": "first"})],
        );
        let fast = definition(
            "https://api/x",
            vec![(10, 0, 200)],
            vec![serde_json::json!({"from": "second"})],
        );
        engine.start_mock_for_connection(&id, &slow).unwrap();
        engine.start_mock_for_connection(&id, &fast).unwrap();

        let frame = recv_frame(&mut rx, Duration::from_millis(500)).await.unwrap();
        assert!(String::from_utf8_lossy(&frame).contains("second"));

        // Nothing from the replaced schedule fires afterwards.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_cancels_pending_deliveries() {
        let (engine, _dir) = engine_with_empty_store();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = engine.registry().open("https://api/x", None, tx);

        let def = definition(
            "https://api/x",
            vec![(60, 0, 200)],
            vec![serde_json::json!({"late": true})],
        );
        engine.start_mock_for_connection(&id, &def).unwrap();
        engine.close(&id);

        assert!(!engine.scheduler().is_armed(&id));
        assert!(!engine.registry().contains(&id));
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalid_definition_arms_nothing() {
        let (engine, _dir) = engine_with_empty_store();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = engine.registry().open("https://api/x", None, tx);

        // Payload index out of range: unusable, but not an error.
        let def = definition("https://api/x", vec![(0, 3, 200)], vec![serde_json::json!(1)]);
        engine.start_mock_for_connection(&id, &def).unwrap();

        assert!(!engine.scheduler().is_armed(&id));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_start_mock_for_unknown_connection_errors() {
        let (engine, _dir) = engine_with_empty_store();
        let def = definition("https://api/x", vec![], vec![serde_json::json!(1)]);
        let err = engine.start_mock_for_connection("missing", &def).unwrap_err();
        assert!(matches!(err, EngineError::ConnectionNotFound(_)));
    }

    #[tokio::test]
    async fn test_start_mock_for_identity_arms_matching_connections() {
        let (engine, _dir) = engine_with_empty_store();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let (tx3, mut rx3) = mpsc::unbounded_channel();
        engine.registry().open("https://api/x", None, tx1);
        engine.registry().open("https://api/x?id=7", None, tx2);
        engine.registry().open("https://api/other", None, tx3);

        let def = definition(
            "https://api/x",
            vec![(0, 0, 200)],
            vec![serde_json::json!({"broadcast": true})],
        );
        let started = engine.start_mock_for_identity("https://api/x", None, &def);
        assert_eq!(started, 2);

        assert!(recv_frame(&mut rx1, Duration::from_millis(500)).await.is_some());
        assert!(recv_frame(&mut rx2, Duration::from_millis(500)).await.is_some());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_shutdown_closes_sinks_and_schedules() {
        let (engine, _dir) = engine_with_empty_store();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = engine.registry().open("https://api/x", None, tx);
        let def = definition(
            "https://api/x",
            vec![(60, 0, 200)],
            vec![serde_json::json!(1)],
        );
        engine.start_mock_for_connection(&id, &def).unwrap();

        engine.shutdown();
        assert_eq!(engine.registry().count(), 0);
        // Dropping the registry entry drops the sender: the stream ends.
        assert!(recv_frame(&mut rx, Duration::from_millis(200)).await.is_none());
    }
}
