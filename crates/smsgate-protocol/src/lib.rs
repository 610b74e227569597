//! smsgate Protocol - Realtime wire protocol for delivery workers
//!
//! This crate provides the packet types exchanged between the daemon and
//! connected delivery workers, over either the long-poll transport or the
//! websocket transport. Both transports carry the same JSON packets.

pub mod message;
pub mod version;

pub use message::{
    ClientPacket, ServerPacket, Transport, DELIVERY_EVENT, JOB_DONE_EVENT, MESSAGE_EVENT,
    SENDER_STATUS_EVENT,
};
pub use version::{ProtocolVersion, VersionError};
