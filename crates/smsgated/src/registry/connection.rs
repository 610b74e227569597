//! Per-connection state shared between the registry and the transports.
//!
//! A `Connection` is one logical worker session. It owns a bounded outbox
//! of server packets that outlives any single transport: long-poll requests
//! drain it one batch at a time, a websocket writer drains it continuously.
//! Transport upgrades therefore never lose queued packets.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Send failures are returned to the caller, never raised

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use smsgate_core::ConnectionId;
use smsgate_protocol::{ServerPacket, Transport};

/// One logical realtime connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,

    /// Producer side of the outbox; broadcasts push here without waiting
    outbox: mpsc::Sender<ServerPacket>,

    /// Consumer side of the outbox; held by at most one transport reader
    inbox: tokio::sync::Mutex<mpsc::Receiver<ServerPacket>>,

    transport: Mutex<Transport>,

    /// Last inbound activity (poll, post, frame, pong)
    last_seen: Mutex<Instant>,

    /// Cancelled once the session moves to the websocket transport
    upgraded: CancellationToken,

    /// Cancelled once the connection is torn down
    closed: CancellationToken,

    connected_at: DateTime<Utc>,
}

impl Connection {
    /// Creates a connection with an outbox of `capacity` packets.
    pub fn new(id: ConnectionId, transport: Transport, capacity: usize) -> Self {
        let (outbox, inbox) = mpsc::channel(capacity.max(1));
        let upgraded = CancellationToken::new();
        if transport == Transport::Websocket {
            upgraded.cancel();
        }

        Self {
            id,
            outbox,
            inbox: tokio::sync::Mutex::new(inbox),
            transport: Mutex::new(transport),
            last_seen: Mutex::new(Instant::now()),
            upgraded,
            closed: CancellationToken::new(),
            connected_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn transport(&self) -> Transport {
        *self.transport.lock()
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Queues a packet without waiting.
    ///
    /// A full outbox means the worker has stalled; the packet is dropped for
    /// this connection only.
    pub fn send(&self, packet: ServerPacket) -> Result<(), SendError> {
        if self.closed.is_cancelled() {
            return Err(SendError::Closed);
        }
        self.outbox.try_send(packet).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Full,
            TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// The outbox consumer. Long-poll handlers `try_lock` it; the websocket
    /// writer holds it for the lifetime of the socket.
    pub fn inbox(&self) -> &tokio::sync::Mutex<mpsc::Receiver<ServerPacket>> {
        &self.inbox
    }

    /// Records inbound activity.
    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last inbound activity.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Moves the session to the websocket transport.
    ///
    /// Returns `false` if it already was on the websocket transport.
    pub fn upgrade(&self) -> bool {
        let mut transport = self.transport.lock();
        if *transport == Transport::Websocket {
            return false;
        }
        *transport = Transport::Websocket;
        drop(transport);

        self.touch();
        self.upgraded.cancel();
        true
    }

    /// Token cancelled on upgrade; pending polls watch it to step aside.
    pub fn upgraded(&self) -> &CancellationToken {
        &self.upgraded
    }

    /// Marks the connection as torn down and wakes every transport task.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Token cancelled on teardown.
    pub fn closed(&self) -> &CancellationToken {
        &self.closed
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// Why a packet could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("outbox full")]
    Full,

    #[error("connection closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn polling(capacity: usize) -> Connection {
        Connection::new(ConnectionId::new("conn-1"), Transport::Polling, capacity)
    }

    #[tokio::test]
    async fn test_send_then_receive() {
        let conn = polling(4);
        conn.send(ServerPacket::Ping).unwrap();

        let mut inbox = conn.inbox().lock().await;
        assert_eq!(inbox.recv().await, Some(ServerPacket::Ping));
    }

    #[tokio::test]
    async fn test_full_outbox_drops() {
        let conn = polling(1);
        assert!(conn.send(ServerPacket::Ping).is_ok());
        assert_eq!(conn.send(ServerPacket::Noop), Err(SendError::Full));
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_sends() {
        let conn = polling(4);
        conn.close();
        assert!(conn.is_closed());
        assert_eq!(conn.send(ServerPacket::Ping), Err(SendError::Closed));
    }

    #[tokio::test]
    async fn test_connected_at_is_stamped_on_creation() {
        let before = Utc::now();
        let conn = polling(4);
        assert!(conn.connected_at() >= before);
        assert!(conn.connected_at() <= Utc::now());
    }

    #[tokio::test]
    async fn test_upgrade_once() {
        let conn = polling(4);
        assert!(!conn.upgraded().is_cancelled());

        assert!(conn.upgrade());
        assert_eq!(conn.transport(), Transport::Websocket);
        assert!(conn.upgraded().is_cancelled());

        assert!(!conn.upgrade());
    }

    #[tokio::test]
    async fn test_websocket_connection_starts_upgraded() {
        let conn = Connection::new(ConnectionId::new("ws"), Transport::Websocket, 4);
        assert!(conn.upgraded().is_cancelled());
        assert!(!conn.upgrade());
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_resets_idle_time() {
        let conn = polling(4);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(conn.idle_for() >= Duration::from_secs(30));

        conn.touch();
        assert!(conn.idle_for() < Duration::from_secs(1));
    }
}
