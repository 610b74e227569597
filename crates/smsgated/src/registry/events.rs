//! Registry lifecycle events.

use std::fmt;

use smsgate_core::ConnectionId;

/// Why a connection left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Worker sent a close packet or a websocket close frame
    ClientClose,

    /// Transport ended without a close handshake
    TransportClosed,

    /// Read or write on the transport failed
    TransportError,

    /// No inbound activity within the ping timeout
    IdleTimeout,

    /// The connection's handler task panicked
    Panicked,

    /// The daemon is shutting down
    Shutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::ClientClose => "client close",
            Self::TransportClosed => "transport close",
            Self::TransportError => "transport error",
            Self::IdleTimeout => "ping timeout",
            Self::Panicked => "handler panic",
            Self::Shutdown => "server shutdown",
        };
        write!(f, "{reason}")
    }
}

/// Events published by the registry to subscribers.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A new connection was registered.
    Registered {
        id: ConnectionId,
        /// Live connections after the insert
        total: usize,
    },

    /// A connection reported job done and is available again.
    Idle { id: ConnectionId },

    /// A connection was removed.
    Removed {
        id: ConnectionId,
        reason: DisconnectReason,
        /// Live connections after the removal
        total: usize,
    },
}
