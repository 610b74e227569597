//! Realtime packet types.

use serde::{Deserialize, Serialize};
use std::fmt;

use smsgate_core::ConnectionId;

use crate::version::ProtocolVersion;

/// Outbound event carrying a [`smsgate_core::DeliveryJob`].
pub const DELIVERY_EVENT: &str = "otp";

/// Inbound event a worker emits after finishing a job.
pub const JOB_DONE_EVENT: &str = "sended";

/// Inbound worker status report, logged only.
pub const SENDER_STATUS_EVENT: &str = "otpsender";

/// Inbound free-form worker message, logged only.
pub const MESSAGE_EVENT: &str = "message";

/// Transport currently carrying a logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Stateless request/response long-polling
    Polling,
    /// Persistent full-duplex socket
    Websocket,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Polling => write!(f, "polling"),
            Self::Websocket => write!(f, "websocket"),
        }
    }
}

/// Packets sent from the daemon to workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerPacket {
    /// Handshake accepted
    Open {
        /// Assigned connection id, reused for polling requests and upgrade
        sid: ConnectionId,
        /// Daemon's protocol version
        protocol_version: ProtocolVersion,
        /// Transports the session may upgrade to
        upgrades: Vec<Transport>,
        /// Interval between server pings
        ping_interval_ms: u64,
        /// Silence tolerated after a ping before the connection is dropped
        ping_timeout_ms: u64,
    },

    /// Application event
    Event {
        /// Event name
        event: String,
        /// Event payload
        data: serde_json::Value,
    },

    /// Heartbeat request; workers answer with [`ClientPacket::Pong`]
    Ping,

    /// Polling session moved to the websocket transport
    Upgraded {
        /// The id that was upgraded
        sid: ConnectionId,
    },

    /// Releases a pending poll without content
    Noop,

    /// Server is closing the connection
    Close {
        /// Why the connection is closing
        reason: String,
    },
}

impl ServerPacket {
    /// Creates an event packet.
    pub fn event(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self::Event {
            event: event.into(),
            data,
        }
    }

    /// Creates a close packet.
    pub fn close(reason: impl Into<String>) -> Self {
        Self::Close {
            reason: reason.into(),
        }
    }

    /// Returns the event name if this is an event packet.
    pub fn event_name(&self) -> Option<&str> {
        match self {
            Self::Event { event, .. } => Some(event),
            _ => None,
        }
    }
}

/// Packets sent from workers to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientPacket {
    /// Application event
    Event {
        /// Event name
        event: String,
        /// Optional payload
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },

    /// Heartbeat answer
    Pong,

    /// Worker is disconnecting gracefully
    Close,
}

impl ClientPacket {
    /// Creates an event packet.
    pub fn event(event: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self::Event {
            event: event.into(),
            data,
        }
    }

    /// Creates the job-done report.
    pub fn job_done() -> Self {
        Self::event(JOB_DONE_EVENT, None)
    }
}
