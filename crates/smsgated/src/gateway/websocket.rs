//! Websocket transport.
//!
//! Each socket is driven by its own spawned task. The upgrade callback
//! awaits that task's handle, so a panic inside the driver is observed,
//! logged and turned into a normal disconnect instead of leaking a
//! registry entry.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

use smsgate_protocol::{ClientPacket, ServerPacket, Transport};

use super::{Gateway, GatewayError, PacketOutcome, RealtimeQuery};
use crate::registry::{Connection, DisconnectReason};

/// Max time for a single frame write.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

type Sink = SplitSink<WebSocket, Message>;

/// `GET /realtime/ws[?sid=ID]`.
///
/// Admission and session lookup happen before the upgrade so a bad request
/// gets a plain HTTP error. The session itself is opened or upgraded once
/// the socket exists.
pub(super) async fn upgrade(
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<RealtimeQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, GatewayError> {
    gateway.admit(&headers, query.v.as_deref())?;

    if let Some(sid) = query.sid.as_deref() {
        gateway.lookup_polling(sid)?;
    }

    Ok(ws
        .on_failed_upgrade(|e| warn!(error = %e, "Websocket upgrade failed"))
        .on_upgrade(move |socket| supervise(gateway, socket, query.sid)))
}

/// Opens or upgrades the session, runs the driver, then unregisters.
async fn supervise(gateway: Arc<Gateway>, mut socket: WebSocket, sid: Option<String>) {
    let (connection, greeting) = match sid {
        None => {
            let connection = gateway.open(Transport::Websocket);
            let open = gateway.open_packet(connection.id());
            (connection, open)
        }
        Some(sid) => match gateway.upgrade(&sid) {
            Ok(connection) => {
                let upgraded = ServerPacket::Upgraded {
                    sid: connection.id().clone(),
                };
                (connection, upgraded)
            }
            Err(e) => {
                warn!(sid = %sid, error = %e, "Upgrade target vanished");
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
        },
    };

    let id = connection.id().clone();
    let driver = tokio::spawn(drive(Arc::clone(&gateway), socket, connection, greeting));

    let reason = match driver.await {
        Ok(reason) => reason,
        Err(e) if e.is_panic() => {
            error!(id = %id, "Connection handler panicked");
            DisconnectReason::Panicked
        }
        Err(_) => DisconnectReason::Shutdown,
    };

    gateway.disconnect(&id, reason);
}

async fn drive(
    gateway: Arc<Gateway>,
    socket: WebSocket,
    connection: Arc<Connection>,
    greeting: ServerPacket,
) -> DisconnectReason {
    let (mut sink, mut stream) = socket.split();

    if let Err(reason) = write_packet(&mut sink, &greeting).await {
        return reason;
    }

    // A pending poll steps aside on upgrade, so this wait is short.
    let mut inbox = connection.inbox().lock().await;

    let mut ping = tokio::time::interval(gateway.settings().ping_interval);
    ping.tick().await;

    info!(id = %connection.id(), "Websocket connection ready");

    loop {
        tokio::select! {
            _ = connection.closed().cancelled() => {
                while let Ok(packet) = inbox.try_recv() {
                    if write_packet(&mut sink, &packet).await.is_err() {
                        break;
                    }
                }
                let _ = sink.send(Message::Close(None)).await;
                return DisconnectReason::Shutdown;
            }

            packet = inbox.recv() => {
                let Some(packet) = packet else {
                    return DisconnectReason::TransportClosed;
                };
                if let Err(reason) = write_packet(&mut sink, &packet).await {
                    return reason;
                }
            }

            _ = ping.tick() => {
                if let Err(reason) = write_packet(&mut sink, &ServerPacket::Ping).await {
                    return reason;
                }
            }

            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientPacket>(text.as_str()) {
                        Ok(packet) => {
                            if gateway.handle_packet(&connection, packet) == PacketOutcome::Close {
                                let _ = sink.send(Message::Close(None)).await;
                                return DisconnectReason::ClientClose;
                            }
                        }
                        Err(e) => {
                            connection.touch();
                            warn!(id = %connection.id(), error = %e, "Malformed client packet");
                        }
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => connection.touch(),
                Some(Ok(Message::Binary(_))) => {
                    connection.touch();
                    debug!(id = %connection.id(), "Ignoring binary frame");
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(id = %connection.id(), frame = ?frame, "Client initiated close");
                    return DisconnectReason::ClientClose;
                }
                Some(Err(e)) => {
                    warn!(id = %connection.id(), error = %e, "Websocket receive error");
                    return DisconnectReason::TransportError;
                }
                None => return DisconnectReason::TransportClosed,
            },
        }
    }
}

/// Writes one packet as a text frame.
async fn write_packet(sink: &mut Sink, packet: &ServerPacket) -> Result<(), DisconnectReason> {
    let json = match serde_json::to_string(packet) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "Failed to encode packet");
            return Ok(());
        }
    };

    match tokio::time::timeout(WRITE_TIMEOUT, sink.send(Message::Text(json.into()))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!(error = %e, "Websocket write failed");
            Err(DisconnectReason::TransportError)
        }
        Err(_) => {
            warn!("Websocket write timed out");
            Err(DisconnectReason::TransportError)
        }
    }
}
