//! Realtime gateway.
//!
//! Delivery workers hold one logical connection each, carried over either
//! HTTP long-polling or a websocket. A session starts on whichever transport
//! the worker opens first; a polling session may later upgrade to a
//! websocket under the same id without being counted twice.
//!
//! # Routes
//!
//! ```text
//! GET  /realtime/poll          handshake, returns [open]
//! GET  /realtime/poll?sid=ID   long-poll for queued packets
//! POST /realtime/poll?sid=ID   JSON array of client packets
//! GET  /realtime/ws[?sid=ID]   websocket (fresh, or upgrade of ID)
//! ```
//!
//! Every request passes the origin check and an optional `v=<major.minor>`
//! protocol version check before it touches the registry.

mod error;
mod origin;
mod polling;
mod websocket;

pub use error::GatewayError;
pub use origin::{Admission, OriginPolicy};

use std::sync::Arc;
use std::time::Duration;

use axum::http::header::ORIGIN;
use axum::http::HeaderMap;
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use smsgate_core::{ConnectionId, DeliveryJob};
use smsgate_protocol::{
    ClientPacket, ProtocolVersion, ServerPacket, Transport, DELIVERY_EVENT, JOB_DONE_EVENT,
    MESSAGE_EVENT, SENDER_STATUS_EVENT,
};

use crate::registry::{Connection, ConnectionRegistry, DisconnectReason, SendError};
use crate::service::Broadcaster;

/// Timing and sizing knobs for the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    /// Interval between server pings on websocket connections
    pub ping_interval: Duration,

    /// Extra silence tolerated after a ping before eviction
    pub ping_timeout: Duration,

    /// How long a long-poll request waits for packets
    pub poll_timeout: Duration,

    /// Per-connection outbox size; packets beyond it are dropped
    pub outbox_capacity: usize,
}

impl GatewaySettings {
    /// Inbound silence after which a connection is evicted.
    pub fn idle_timeout(&self) -> Duration {
        self.ping_interval + self.ping_timeout
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(25),
            ping_timeout: Duration::from_secs(20),
            poll_timeout: Duration::from_secs(20),
            outbox_capacity: 64,
        }
    }
}

/// Query string shared by the realtime routes.
#[derive(Debug, Default, Deserialize)]
pub struct RealtimeQuery {
    /// Session id from a previous handshake
    pub sid: Option<String>,
    /// Protocol version announced by the worker
    pub v: Option<String>,
}

/// What to do with a connection after a client packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketOutcome {
    Continue,
    Close,
}

/// Per-broadcast delivery counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Connections in the snapshot
    pub recipients: usize,
    /// Packets queued
    pub queued: usize,
    /// Packets dropped on a full outbox
    pub dropped: usize,
}

/// Receives worker events other than job completion.
pub trait WorkerEvents: Send + Sync {
    fn on_event(&self, id: &ConnectionId, event: &str, data: Option<&serde_json::Value>);
}

/// Logs sender status and free-form messages; ignores anything else.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogWorkerEvents;

impl WorkerEvents for LogWorkerEvents {
    fn on_event(&self, id: &ConnectionId, event: &str, data: Option<&serde_json::Value>) {
        match event {
            SENDER_STATUS_EVENT => info!(id = %id, data = ?data, "Sender status"),
            MESSAGE_EVENT => info!(id = %id, data = ?data, "Message from client"),
            other => debug!(id = %id, event = %other, "Ignoring unknown event"),
        }
    }
}

/// The realtime gateway.
///
/// Owns admission, the packet handlers and the idle reaper. Connection
/// state itself lives in the shared [`ConnectionRegistry`].
pub struct Gateway {
    registry: Arc<ConnectionRegistry>,
    origins: OriginPolicy,
    settings: GatewaySettings,
    cancel: CancellationToken,
    worker_events: Arc<dyn WorkerEvents>,
}

impl Gateway {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        origins: OriginPolicy,
        settings: GatewaySettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            origins,
            settings,
            cancel,
            worker_events: Arc::new(LogWorkerEvents),
        }
    }

    /// Replaces the default logging handler for informational events.
    pub fn with_worker_events(mut self, worker_events: Arc<dyn WorkerEvents>) -> Self {
        self.worker_events = worker_events;
        self
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// Router for the realtime endpoints.
    pub fn routes(self: Arc<Self>) -> Router {
        Router::new()
            .route("/realtime/poll", get(polling::poll).post(polling::push))
            .route("/realtime/ws", get(websocket::upgrade))
            .with_state(self)
    }

    // ========================================================================
    // Admission
    // ========================================================================

    /// Checks a connection attempt's origin against the allow-set.
    pub fn accept(&self, origin: Option<&str>) -> Admission {
        self.origins.check(origin)
    }

    /// Checks origin and protocol version of an incoming request.
    ///
    /// An `Origin` header that is not visible ASCII cannot match any listed
    /// origin and is denied.
    pub fn admit(&self, headers: &HeaderMap, version: Option<&str>) -> Result<(), GatewayError> {
        let admission = match headers.get(ORIGIN).map(|v| v.to_str()).transpose() {
            Ok(origin) => self.accept(origin),
            Err(_) => Admission::Deny,
        };
        if admission == Admission::Deny {
            let origin = headers
                .get(ORIGIN)
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .unwrap_or_default();
            warn!(origin = %origin, "Rejected connection from disallowed origin");
            return Err(GatewayError::OriginDenied { origin });
        }

        if let Some(version) = version {
            ProtocolVersion::negotiate(version).map_err(|e| {
                warn!(version = %version, error = %e, "Rejected protocol version");
                e
            })?;
        }

        Ok(())
    }

    /// Creates and registers a fresh connection.
    pub fn open(&self, transport: Transport) -> Arc<Connection> {
        let connection = Arc::new(Connection::new(
            ConnectionId::generate(),
            transport,
            self.settings.outbox_capacity,
        ));
        debug!(id = %connection.id(), transport = %transport, "Opening connection");
        self.registry.register(Arc::clone(&connection));
        connection
    }

    /// Handshake packet for a new connection.
    pub fn open_packet(&self, id: &ConnectionId) -> ServerPacket {
        ServerPacket::Open {
            sid: id.clone(),
            protocol_version: ProtocolVersion::CURRENT,
            upgrades: vec![Transport::Websocket],
            ping_interval_ms: millis(self.settings.ping_interval),
            ping_timeout_ms: millis(self.settings.ping_timeout),
        }
    }

    /// Looks up a live session.
    pub fn lookup(&self, sid: &str) -> Result<Arc<Connection>, GatewayError> {
        let id = ConnectionId::new(sid);
        self.registry
            .get(&id)
            .ok_or(GatewayError::UnknownSession(id))
    }

    /// Looks up a polling session that may still upgrade.
    pub fn lookup_polling(&self, sid: &str) -> Result<Arc<Connection>, GatewayError> {
        let connection = self.lookup(sid)?;
        if connection.transport() == Transport::Websocket {
            return Err(GatewayError::TransportMismatch(connection.id().clone()));
        }
        Ok(connection)
    }

    /// Moves a polling session onto the websocket transport.
    ///
    /// The transport reports the connect again; the registry treats it as a
    /// duplicate and keeps the entry. The pending poll, if any, is released
    /// with a noop.
    pub fn upgrade(&self, sid: &str) -> Result<Arc<Connection>, GatewayError> {
        let connection = self.lookup_polling(sid)?;
        self.registry.register(Arc::clone(&connection));
        if !connection.upgrade() {
            return Err(GatewayError::TransportMismatch(connection.id().clone()));
        }
        info!(id = %connection.id(), "Connection upgraded to websocket");
        Ok(connection)
    }

    // ========================================================================
    // Packets
    // ========================================================================

    /// Handles one packet from a worker.
    pub fn handle_packet(&self, connection: &Connection, packet: ClientPacket) -> PacketOutcome {
        connection.touch();
        match packet {
            ClientPacket::Pong => PacketOutcome::Continue,
            ClientPacket::Close => PacketOutcome::Close,
            ClientPacket::Event { event, data } => {
                self.handle_event(connection.id(), &event, data.as_ref());
                PacketOutcome::Continue
            }
        }
    }

    /// Routes a named worker event.
    ///
    /// Job completion clears the busy flag; everything else goes to the
    /// [`WorkerEvents`] handler.
    pub fn handle_event(&self, id: &ConnectionId, event: &str, data: Option<&serde_json::Value>) {
        if event == JOB_DONE_EVENT {
            self.registry.mark_idle(id);
        } else {
            self.worker_events.on_event(id, event, data);
        }
    }

    /// Removes a connection and wakes its transport.
    pub fn disconnect(&self, id: &ConnectionId, reason: DisconnectReason) {
        if let Some(connection) = self.registry.unregister(id, reason) {
            connection.close();
        }
    }

    // ========================================================================
    // Broadcast
    // ========================================================================

    /// Sends an event to every live connection.
    ///
    /// Recipients are snapshotted under the registry lock and sent to after
    /// it is released. A delivery event flags every recipient busy.
    pub fn broadcast<T: Serialize + ?Sized>(&self, event: &str, payload: &T) -> BroadcastReport {
        let data = match serde_json::to_value(payload) {
            Ok(data) => data,
            Err(e) => {
                warn!(event = %event, error = %e, "Failed to encode broadcast payload");
                return BroadcastReport::default();
            }
        };

        let recipients = self.registry.recipients(event == DELIVERY_EVENT);
        let packet = ServerPacket::event(event, data);
        let mut report = BroadcastReport {
            recipients: recipients.len(),
            ..BroadcastReport::default()
        };

        for connection in recipients {
            match connection.send(packet.clone()) {
                Ok(()) => report.queued += 1,
                Err(SendError::Full) => {
                    report.dropped += 1;
                    warn!(id = %connection.id(), event = %event, "Outbox full, packet dropped");
                }
                Err(SendError::Closed) => {
                    debug!(id = %connection.id(), event = %event, "Skipping closed connection");
                }
            }
        }

        info!(
            event = %event,
            connected_clients = report.recipients,
            queued = report.queued,
            dropped = report.dropped,
            "Broadcast"
        );

        report
    }

    // ========================================================================
    // Background work
    // ========================================================================

    /// Evicts connections silent for longer than the idle timeout.
    pub fn reap_idle(&self) -> usize {
        let stale = self.registry.stale(self.settings.idle_timeout());
        for id in &stale {
            self.disconnect(id, DisconnectReason::IdleTimeout);
        }
        stale.len()
    }

    /// Spawns the idle reaper; it stops with the gateway's cancel token.
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(gateway.settings.ping_interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = gateway.cancel.cancelled() => {
                        debug!("Idle reaper stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let evicted = gateway.reap_idle();
                        if evicted > 0 {
                            info!(evicted, "Evicted idle connections");
                        }
                    }
                }
            }
        })
    }

    /// Closes every connection, used on shutdown.
    pub fn shutdown(&self) -> usize {
        let drained = self.registry.drain();
        for connection in &drained {
            let _ = connection.send(ServerPacket::close("shutdown"));
            connection.close();
        }
        info!(closed = drained.len(), "Gateway shut down");
        drained.len()
    }
}

impl Broadcaster for Gateway {
    fn deliver(&self, job: &DeliveryJob) -> usize {
        self.broadcast(DELIVERY_EVENT, job).recipients
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use smsgate_core::LocalPhone;

    fn gateway_with(settings: GatewaySettings) -> Gateway {
        Gateway::new(
            Arc::new(ConnectionRegistry::new()),
            OriginPolicy::new(["http://localhost"]),
            settings,
            CancellationToken::new(),
        )
    }

    fn gateway() -> Gateway {
        gateway_with(GatewaySettings::default())
    }

    fn job() -> DeliveryJob {
        DeliveryJob::message(&LocalPhone::parse("61234567").unwrap(), "hello")
    }

    #[test]
    fn test_admit_checks_origin() {
        let gw = gateway();
        let mut headers = HeaderMap::new();
        assert!(gw.admit(&headers, None).is_ok());

        headers.insert(ORIGIN, HeaderValue::from_static("http://evil.example"));
        assert!(matches!(
            gw.admit(&headers, None),
            Err(GatewayError::OriginDenied { origin }) if origin == "http://evil.example"
        ));
    }

    #[test]
    fn test_accept_denies_unlisted_origin() {
        let gw = gateway();
        assert_eq!(gw.accept(Some("http://evil.example")), Admission::Deny);
        assert_eq!(gw.accept(Some("http://localhost")), Admission::Allow);
        assert_eq!(gw.accept(None), Admission::Allow);
        assert_eq!(gw.accept(Some("")), Admission::Allow);
        assert_eq!(gw.registry().count(), 0);
    }

    #[test]
    fn test_admit_denies_non_ascii_origin() {
        let gw = gateway();
        let mut headers = HeaderMap::new();
        headers.insert(ORIGIN, HeaderValue::from_bytes(b"http://\xffbad").unwrap());
        assert!(matches!(
            gw.admit(&headers, None),
            Err(GatewayError::OriginDenied { .. })
        ));
    }

    #[test]
    fn test_admit_checks_version() {
        let gw = gateway();
        let headers = HeaderMap::new();
        assert!(gw.admit(&headers, Some("1.7")).is_ok());
        assert!(matches!(
            gw.admit(&headers, Some("2.0")),
            Err(GatewayError::Version(_))
        ));
        assert!(matches!(
            gw.admit(&headers, Some("one")),
            Err(GatewayError::Version(_))
        ));
    }

    #[test]
    fn test_open_registers_connection() {
        let gw = gateway();
        let conn = gw.open(Transport::Polling);
        assert_eq!(gw.registry().count(), 1);
        assert_eq!(gw.registry().is_busy(conn.id()), Some(false));

        match gw.open_packet(conn.id()) {
            ServerPacket::Open {
                sid,
                upgrades,
                ping_interval_ms,
                ping_timeout_ms,
                ..
            } => {
                assert_eq!(&sid, conn.id());
                assert_eq!(upgrades, vec![Transport::Websocket]);
                assert_eq!(ping_interval_ms, 25_000);
                assert_eq!(ping_timeout_ms, 20_000);
            }
            other => panic!("expected open, got {other:?}"),
        }
    }

    #[test]
    fn test_upgrade_keeps_single_entry() {
        let gw = gateway();
        let conn = gw.open(Transport::Polling);
        let upgraded = gw.upgrade(conn.id().as_str()).unwrap();

        assert!(Arc::ptr_eq(&conn, &upgraded));
        assert_eq!(gw.registry().count(), 1);
        assert_eq!(conn.transport(), Transport::Websocket);
        assert!(conn.upgraded().is_cancelled());

        assert!(matches!(
            gw.upgrade(conn.id().as_str()),
            Err(GatewayError::TransportMismatch(_))
        ));
    }

    #[test]
    fn test_upgrade_unknown_session() {
        let gw = gateway();
        assert!(matches!(
            gw.upgrade("nope"),
            Err(GatewayError::UnknownSession(_))
        ));
    }

    #[tokio::test]
    async fn test_broadcast_delivery_marks_busy() {
        let gw = gateway();
        let a = gw.open(Transport::Polling);
        let b = gw.open(Transport::Websocket);

        assert_eq!(gw.deliver(&job()), 2);
        assert_eq!(gw.registry().busy_count(), 2);

        let mut inbox = a.inbox().lock().await;
        let packet = inbox.recv().await.unwrap();
        assert_eq!(packet.event_name(), Some(DELIVERY_EVENT));
        drop(inbox);

        gw.handle_event(b.id(), JOB_DONE_EVENT, None);
        assert_eq!(gw.registry().is_busy(b.id()), Some(false));
        assert_eq!(gw.registry().is_busy(a.id()), Some(true));
    }

    #[test]
    fn test_broadcast_other_event_keeps_idle() {
        let gw = gateway();
        gw.open(Transport::Polling);
        let report = gw.broadcast("notice", &serde_json::json!({"x": 1}));
        assert_eq!(report.recipients, 1);
        assert_eq!(report.queued, 1);
        assert_eq!(gw.registry().busy_count(), 0);
    }

    #[derive(Default)]
    struct RecordingEvents(parking_lot::Mutex<Vec<String>>);

    impl WorkerEvents for RecordingEvents {
        fn on_event(&self, _id: &ConnectionId, event: &str, _data: Option<&serde_json::Value>) {
            self.0.lock().push(event.to_string());
        }
    }

    #[test]
    fn test_worker_events_forwarded_except_job_done() {
        let recorder = Arc::new(RecordingEvents::default());
        let gw = gateway().with_worker_events(recorder.clone());
        let conn = gw.open(Transport::Polling);

        gw.handle_event(conn.id(), SENDER_STATUS_EVENT, None);
        gw.handle_event(conn.id(), JOB_DONE_EVENT, None);
        gw.handle_event(conn.id(), MESSAGE_EVENT, None);

        assert_eq!(
            *recorder.0.lock(),
            vec![SENDER_STATUS_EVENT.to_string(), MESSAGE_EVENT.to_string()]
        );
    }

    #[test]
    fn test_broadcast_with_no_connections() {
        let gw = gateway();
        assert_eq!(gw.deliver(&job()), 0);
    }

    #[test]
    fn test_full_outbox_drops_for_that_connection_only() {
        let gw = gateway_with(GatewaySettings {
            outbox_capacity: 1,
            ..GatewaySettings::default()
        });
        let slow = gw.open(Transport::Polling);
        gw.deliver(&job());
        let fast = gw.open(Transport::Polling);

        let report = gw.broadcast(DELIVERY_EVENT, &job());
        assert_eq!(report.recipients, 2);
        assert_eq!(report.queued, 1);
        assert_eq!(report.dropped, 1);
        assert!(!slow.is_closed());
        assert!(!fast.is_closed());
        assert_eq!(gw.registry().count(), 2);
    }

    #[test]
    fn test_close_packet_ends_connection() {
        let gw = gateway();
        let conn = gw.open(Transport::Polling);
        assert_eq!(
            gw.handle_packet(&conn, ClientPacket::Pong),
            PacketOutcome::Continue
        );
        assert_eq!(
            gw.handle_packet(&conn, ClientPacket::Close),
            PacketOutcome::Close
        );
    }

    #[test]
    fn test_disconnect_closes_connection() {
        let gw = gateway();
        let conn = gw.open(Transport::Polling);
        gw.disconnect(conn.id(), DisconnectReason::ClientClose);
        assert!(conn.is_closed());
        assert_eq!(gw.registry().count(), 0);

        // second disconnect is a no-op
        gw.disconnect(conn.id(), DisconnectReason::TransportClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reap_idle_evicts_silent_connections() {
        let gw = gateway();
        let silent = gw.open(Transport::Polling);
        let chatty = gw.open(Transport::Websocket);

        tokio::time::advance(Duration::from_secs(30)).await;
        chatty.touch();
        tokio::time::advance(Duration::from_secs(16)).await;

        assert_eq!(gw.reap_idle(), 1);
        assert!(silent.is_closed());
        assert!(!chatty.is_closed());
        assert_eq!(gw.registry().count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_sends_close_and_drains() {
        let gw = gateway();
        let conn = gw.open(Transport::Polling);
        assert_eq!(gw.shutdown(), 1);
        assert!(conn.is_closed());
        assert_eq!(gw.registry().count(), 0);

        let mut inbox = conn.inbox().lock().await;
        assert_eq!(inbox.recv().await, Some(ServerPacket::close("shutdown")));
    }
}
