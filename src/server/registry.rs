//! Connection registry — per-session metadata and liveness accounting.
//!
//! One mutex guards the whole table. Channels hold their own outbound
//! queues; the registry keeps a sending handle per connection so the idle
//! sweeper can close from outside the session task.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::server::frames::{Outbound, OutboundTx};

/// WebSocket close code for idle eviction (going away).
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Capability handle for acting on a live connection from outside its task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub tx: OutboundTx,
    pub cancel: CancellationToken,
}

/// Per-connection activity metadata.
#[derive(Debug, Clone)]
pub struct ConnectionMeta {
    pub auth_id: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: Instant,
    pub msgs_sent: u64,
    pub msgs_received: u64,
}

struct ConnectionEntry {
    handle: ConnectionHandle,
    meta: ConnectionMeta,
}

/// Aggregate pool counters for the `stats` command.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionPoolStats {
    pub active_connections: usize,
    pub identified_connections: usize,
    pub messages_sent: u64,
    pub messages_received: u64,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<String, ConnectionEntry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ConnectionEntry>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, connection_id: &str, handle: ConnectionHandle) {
        let entry = ConnectionEntry {
            handle,
            meta: ConnectionMeta {
                auth_id: None,
                connected_at: Utc::now(),
                last_activity: Instant::now(),
                msgs_sent: 0,
                msgs_received: 0,
            },
        };
        self.lock().insert(connection_id.to_string(), entry);
        debug!(%connection_id, "connection registered");
    }

    pub fn unregister(&self, connection_id: &str) {
        if self.lock().remove(connection_id).is_some() {
            debug!(%connection_id, "connection unregistered");
        }
    }

    /// Bind an asserted identity to the connection. Returns `false` when the
    /// connection is unknown (already evicted).
    pub fn bind_identity(&self, connection_id: &str, auth_id: &str) -> bool {
        let mut connections = self.lock();
        match connections.get_mut(connection_id) {
            Some(entry) => {
                entry.meta.auth_id = Some(auth_id.to_string());
                entry.meta.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    /// The identity bound to a connection, if any.
    pub fn auth_id(&self, connection_id: &str) -> Option<String> {
        self.lock()
            .get(connection_id)
            .and_then(|e| e.meta.auth_id.clone())
    }

    /// Touch `last_activity` and bump the sent/received counters.
    pub fn update_activity(&self, connection_id: &str, sent: u64, received: u64) {
        if let Some(entry) = self.lock().get_mut(connection_id) {
            entry.meta.last_activity = Instant::now();
            entry.meta.msgs_sent += sent;
            entry.meta.msgs_received += received;
        }
    }

    pub fn meta(&self, connection_id: &str) -> Option<ConnectionMeta> {
        self.lock().get(connection_id).map(|e| e.meta.clone())
    }

    pub fn stats(&self) -> ConnectionPoolStats {
        let connections = self.lock();
        ConnectionPoolStats {
            active_connections: connections.len(),
            identified_connections: connections
                .values()
                .filter(|e| e.meta.auth_id.is_some())
                .count(),
            messages_sent: connections.values().map(|e| e.meta.msgs_sent).sum(),
            messages_received: connections.values().map(|e| e.meta.msgs_received).sum(),
        }
    }

    /// Close and remove every connection idle for longer than `timeout`.
    /// Returns the number of evicted connections.
    pub fn cleanup_stale(&self, timeout: Duration) -> usize {
        let now = Instant::now();
        let stale: Vec<(String, ConnectionHandle)> = {
            let connections = self.lock();
            connections
                .iter()
                .filter(|(_, e)| now.duration_since(e.meta.last_activity) > timeout)
                .map(|(id, e)| (id.clone(), e.handle.clone()))
                .collect()
        };

        for (connection_id, handle) in &stale {
            info!(%connection_id, "closing idle connection");
            let _ = handle.tx.send(Outbound::Close {
                code: CLOSE_GOING_AWAY,
                reason: "idle timeout",
            });
            handle.cancel.cancel();
        }

        let mut connections = self.lock();
        for (connection_id, _) in &stale {
            connections.remove(connection_id);
        }
        stale.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
