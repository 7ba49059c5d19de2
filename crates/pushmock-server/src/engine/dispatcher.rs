//! Event dispatch: frame formatting and delivery to open connections.
//!
//! The dispatcher never holds a captured sink. Every delivery re-resolves
//! the target through the registry at write time, so a deferred delivery
//! that outlives its connection degrades to a logged no-op.

use super::registry::ConnectionRegistry;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct EventDispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl EventDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Write one status-bearing event frame to a single connection.
    ///
    /// A missing or already-closed connection is tolerated: the scheduled
    /// delivery may race its own cancellation, so this logs and reports
    /// `false` instead of erroring.
    pub fn send_to(&self, connection_id: &str, payload: &serde_json::Value, status_code: u16) -> bool {
        let Some(sink) = self.registry.sink(connection_id) else {
            warn!("Connection not found: {}", connection_id);
            return false;
        };
        if sink.send(response_frame(status_code, payload)).is_err() {
            warn!("Connection {} closed before delivery, dropping event", connection_id);
            return false;
        }
        debug!("Event sent to connection: {}", connection_id);
        true
    }

    /// Write a bare data frame to every connection whose identity
    /// string-equals `identity`. Returns the number of connections written.
    pub fn send_to_identity(&self, identity: &str, payload: &serde_json::Value) -> usize {
        let frame = data_frame(payload);
        let mut sent = 0;
        for (id, sink) in self.registry.sinks_for_identity(identity) {
            if sink.send(frame.clone()).is_ok() {
                sent += 1;
            } else {
                warn!("Connection {} closed before delivery, dropping event", id);
            }
        }
        debug!("Event sent to {} connection(s) for identity: {}", sent, identity);
        sent
    }

    /// Write a bare data frame to every open connection. Returns the count.
    pub fn send_to_all(&self, payload: &serde_json::Value) -> usize {
        let frame = data_frame(payload);
        let mut sent = 0;
        for (id, sink) in self.registry.all_sinks() {
            if sink.send(frame.clone()).is_ok() {
                sent += 1;
            } else {
                warn!("Connection {} closed before delivery, dropping event", id);
            }
        }
        debug!("Event sent to all {} connection(s)", sent);
        sent
    }
}

/// Comment frame written immediately on stream accept.
pub fn keep_alive_frame() -> Bytes {
    Bytes::from_static(b": keep-alive\n\n")
}

/// Scheduled-delivery frame embedding the status code.
fn response_frame(status_code: u16, payload: &serde_json::Value) -> Bytes {
    let data = serde_json::json!({ "statusCode": status_code, "body": payload });
    Bytes::from(format!("event: response\ndata: {data}\n\n"))
}

/// Ad hoc frame: string payloads are written raw, everything else as JSON.
fn data_frame(payload: &serde_json::Value) -> Bytes {
    let text = match payload {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Bytes::from(format!("data: {text}\n\n"))
}
