//! Timeline scheduling: deferred deliveries bound to one connection.

use super::dispatcher::EventDispatcher;
use crate::mock::MockDefinition;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Owns the pending deferred deliveries of every armed connection.
///
/// Each timeline entry becomes one spawned task sleeping until its offset,
/// then handing the delivery to the dispatcher by connection id. Disarming
/// aborts whatever is still pending; a firing that already started may
/// complete (the dispatcher tolerates the resulting stale write).
pub struct TimelineScheduler {
    dispatcher: Arc<EventDispatcher>,
    schedules: Mutex<HashMap<String, Vec<JoinHandle<()>>>>,
}

impl TimelineScheduler {
    pub fn new(dispatcher: Arc<EventDispatcher>) -> Self {
        Self {
            dispatcher,
            schedules: Mutex::new(HashMap::new()),
        }
    }

    /// Arm a definition's timeline against a connection, replacing any
    /// schedule already armed for it. An invalid definition logs and arms
    /// nothing.
    pub fn arm(&self, connection_id: &str, definition: &MockDefinition) {
        self.disarm(connection_id);

        if let Err(e) = definition.validate() {
            error!("Invalid mock data for connection {}: {}", connection_id, e);
            return;
        }

        let mut handles = Vec::with_capacity(definition.responses.len());
        for entry in &definition.responses {
            let Some(payload) = definition.data.get(entry.response as usize) else {
                continue;
            };
            let dispatcher = Arc::clone(&self.dispatcher);
            let id = connection_id.to_string();
            let payload = payload.clone();
            let status_code = entry.status_code;
            let offset = entry.time;
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(offset)).await;
                dispatcher.send_to(&id, &payload, status_code);
                debug!("Mock event fired for connection {} at {}ms", id, offset);
            }));
        }

        info!(
            "Mock armed for connection {} with {} scheduled event(s)",
            connection_id,
            handles.len()
        );
        self.schedules
            .lock()
            .insert(connection_id.to_string(), handles);
    }

    /// Cancel every still-pending delivery for a connection. Safe to call
    /// when no schedule exists.
    pub fn disarm(&self, connection_id: &str) {
        if let Some(handles) = self.schedules.lock().remove(connection_id) {
            for handle in &handles {
                handle.abort();
            }
            debug!("Schedule cleared for connection: {}", connection_id);
        }
    }

    /// Cancel everything (process shutdown).
    pub fn disarm_all(&self) {
        let mut schedules = self.schedules.lock();
        for (id, handles) in schedules.drain() {
            for handle in &handles {
                handle.abort();
            }
            debug!("Schedule cleared for connection: {}", id);
        }
    }

    /// Whether a connection currently has an armed schedule.
    pub fn is_armed(&self, connection_id: &str) -> bool {
        self.schedules.lock().contains_key(connection_id)
    }
}
