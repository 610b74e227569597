//! HTTP long-polling transport.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use tracing::debug;

use smsgate_protocol::{ClientPacket, ServerPacket, Transport};

use super::{Gateway, GatewayError, PacketOutcome, RealtimeQuery};
use crate::registry::{Connection, DisconnectReason};

/// Most packets returned by one poll.
const MAX_BATCH: usize = 32;

/// `GET /realtime/poll`: handshake without `sid`, long-poll with it.
pub(super) async fn poll(
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<RealtimeQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<ServerPacket>>, GatewayError> {
    gateway.admit(&headers, query.v.as_deref())?;

    let Some(sid) = query.sid else {
        let connection = gateway.open(Transport::Polling);
        return Ok(Json(vec![gateway.open_packet(connection.id())]));
    };

    let connection = gateway.lookup_polling(&sid)?;
    connection.touch();
    let batch = long_poll(&gateway, &connection).await?;
    connection.touch();

    Ok(Json(batch))
}

/// `POST /realtime/poll?sid=ID`: a JSON array of client packets.
pub(super) async fn push(
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<RealtimeQuery>,
    headers: HeaderMap,
    Json(packets): Json<Vec<ClientPacket>>,
) -> Result<StatusCode, GatewayError> {
    gateway.admit(&headers, query.v.as_deref())?;

    let sid = query.sid.ok_or(GatewayError::MissingSession)?;
    let connection = gateway.lookup(&sid)?;

    for packet in packets {
        if gateway.handle_packet(&connection, packet) == PacketOutcome::Close {
            gateway.disconnect(connection.id(), DisconnectReason::ClientClose);
            break;
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Waits for queued packets, the poll timeout, an upgrade or teardown.
///
/// Only one poll may hold the inbox at a time; an overlapping poll is
/// rejected rather than queued behind the first.
async fn long_poll(
    gateway: &Gateway,
    connection: &Connection,
) -> Result<Vec<ServerPacket>, GatewayError> {
    let mut inbox = connection
        .inbox()
        .try_lock()
        .map_err(|_| GatewayError::OverlappingPoll(connection.id().clone()))?;

    let first = tokio::select! {
        packet = inbox.recv() => packet,
        _ = tokio::time::sleep(gateway.settings().poll_timeout) => {
            return Ok(Vec::new());
        }
        _ = connection.upgraded().cancelled() => {
            debug!(id = %connection.id(), "Pending poll released by upgrade");
            return Ok(vec![ServerPacket::Noop]);
        }
        _ = connection.closed().cancelled() => {
            return Ok(vec![ServerPacket::close("closed")]);
        }
    };

    let Some(first) = first else {
        return Ok(vec![ServerPacket::close("closed")]);
    };

    let mut batch = vec![first];
    while batch.len() < MAX_BATCH {
        match inbox.try_recv() {
            Ok(packet) => batch.push(packet),
            Err(_) => break,
        }
    }

    Ok(batch)
}
