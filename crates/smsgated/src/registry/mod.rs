//! Connection registry.
//!
//! The registry is the authoritative record of live delivery workers and
//! their busy/idle state. Connect, disconnect and event callbacks arrive
//! concurrently from independent tasks (HTTP requests, websocket tasks, the
//! idle reaper), so every mutation goes through one mutex.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐  register / unregister  ┌──────────────────────────┐
//! │  Gateway        │────────────────────────▶│   ConnectionRegistry     │
//! │  (transports)   │  mark_idle / recipients │  Mutex<HashMap<Id,Entry>>│
//! └─────────────────┘                         └────────────┬─────────────┘
//!                                                          │ ConnectionEvent
//!                                                          ▼ (broadcast)
//!                                                   logging, tests
//! ```
//!
//! The lock guards the map mutation only. Broadcasts take a snapshot of
//! recipients under the lock and send after releasing it, so a slow worker
//! can never hold up the transports.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Unknown ids are logged and ignored, never raised

mod connection;
mod events;

pub use connection::{Connection, SendError};
pub use events::{ConnectionEvent, DisconnectReason};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use smsgate_core::ConnectionId;

/// Capacity of the lifecycle event channel.
const EVENT_BUFFER: usize = 256;

/// Registry slot for one connection.
struct Entry {
    connection: Arc<Connection>,
    busy: bool,
}

/// Outcome of [`ConnectionRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// A new connection was added
    Inserted { total: usize },
    /// The id was already registered; nothing changed
    Duplicate { total: usize },
}

/// Tracks live connections and their busy flag.
pub struct ConnectionRegistry {
    entries: Mutex<HashMap<ConnectionId, Entry>>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            entries: Mutex::new(HashMap::new()),
            events,
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Registers a connection with `busy = false`.
    ///
    /// Idempotent per id: the transport reports connect a second time when a
    /// polling session upgrades to a websocket, and that call must neither
    /// replace the live entry nor change the count.
    pub fn register(&self, connection: Arc<Connection>) -> Registration {
        let id = connection.id().clone();

        let outcome = {
            let mut entries = self.entries.lock();
            if entries.contains_key(&id) {
                Registration::Duplicate {
                    total: entries.len(),
                }
            } else {
                entries.insert(
                    id.clone(),
                    Entry {
                        connection,
                        busy: false,
                    },
                );
                Registration::Inserted {
                    total: entries.len(),
                }
            }
        };

        match outcome {
            Registration::Inserted { total } => {
                info!(id = %id, total_clients = total, "Client connected");
                let _ = self.events.send(ConnectionEvent::Registered { id, total });
            }
            Registration::Duplicate { total } => {
                info!(
                    id = %id,
                    total_clients = total,
                    "Duplicate connect (transport upgrade) ignored"
                );
            }
        }

        outcome
    }

    /// Removes a connection if present.
    ///
    /// Disconnect and registration are not ordered, so an unknown id is a
    /// no-op. Returns the removed connection so the caller can close it.
    pub fn unregister(
        &self,
        id: &ConnectionId,
        reason: DisconnectReason,
    ) -> Option<Arc<Connection>> {
        let (removed, total) = {
            let mut entries = self.entries.lock();
            let removed = entries.remove(id);
            (removed, entries.len())
        };

        match removed {
            Some(entry) => {
                let session = Utc::now() - entry.connection.connected_at();
                info!(
                    id = %id,
                    reason = %reason,
                    total_clients = total,
                    session_secs = session.num_seconds(),
                    "Client disconnected"
                );
                let _ = self.events.send(ConnectionEvent::Removed {
                    id: id.clone(),
                    reason,
                    total,
                });
                Some(entry.connection)
            }
            None => {
                debug!(id = %id, reason = %reason, "Unregister for unknown client ignored");
                None
            }
        }
    }

    /// Clears the busy flag after a worker reports a finished job.
    ///
    /// Returns `false` for an unknown id: a worker may report completion
    /// after a racing disconnect already evicted it.
    pub fn mark_idle(&self, id: &ConnectionId) -> bool {
        let known = {
            let mut entries = self.entries.lock();
            match entries.get_mut(id) {
                Some(entry) => {
                    entry.busy = false;
                    true
                }
                None => false,
            }
        };

        if known {
            info!(id = %id, "Job done, client marked available");
            let _ = self.events.send(ConnectionEvent::Idle { id: id.clone() });
        } else {
            warn!(id = %id, "Job done from unknown client");
        }

        known
    }

    /// Removes every connection, used on shutdown.
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        let drained: Vec<Arc<Connection>> = {
            let mut entries = self.entries.lock();
            entries.drain().map(|(_, entry)| entry.connection).collect()
        };

        for connection in &drained {
            let _ = self.events.send(ConnectionEvent::Removed {
                id: connection.id().clone(),
                reason: DisconnectReason::Shutdown,
                total: 0,
            });
        }

        drained
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Number of live connections. Observability only.
    pub fn count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Number of connections currently flagged busy. Observability only.
    pub fn busy_count(&self) -> usize {
        self.entries.lock().values().filter(|e| e.busy).count()
    }

    /// Busy flag of one connection, `None` if unknown.
    pub fn is_busy(&self, id: &ConnectionId) -> Option<bool> {
        self.entries.lock().get(id).map(|e| e.busy)
    }

    /// Looks up a live connection.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.entries
            .lock()
            .get(id)
            .map(|e| Arc::clone(&e.connection))
    }

    /// Snapshot of every live connection for a broadcast.
    ///
    /// All connections are returned regardless of busy state. With
    /// `mark_busy`, each one is flagged busy until it reports job done.
    pub fn recipients(&self, mark_busy: bool) -> Vec<Arc<Connection>> {
        let mut entries = self.entries.lock();
        entries
            .values_mut()
            .map(|entry| {
                if mark_busy {
                    entry.busy = true;
                }
                Arc::clone(&entry.connection)
            })
            .collect()
    }

    /// Ids of connections without inbound activity for at least `idle_for`.
    pub fn stale(&self, idle_for: Duration) -> Vec<ConnectionId> {
        self.entries
            .lock()
            .iter()
            .filter(|(_, e)| e.connection.idle_for() >= idle_for)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Subscribes to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
