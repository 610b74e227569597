//! smsgate Core - Shared types for code issuance and SMS relay
//!
//! This crate provides the domain types shared between the daemon
//! (smsgated) and the realtime wire protocol (smsgate-protocol).
//!
//! All code follows the panic-free policy: no `.unwrap()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.
//! The one `.expect()` compiles a literal regex pattern once, which
//! cannot fail at runtime and is covered by the phone tests.

pub mod code;
pub mod connection;
pub mod error;
pub mod job;
pub mod phone;

// Re-exports for convenience
pub use code::{OtpCode, CODE_MAX, CODE_MIN};
pub use connection::ConnectionId;
pub use error::{DomainError, DomainResult};
pub use job::DeliveryJob;
pub use phone::{LocalPhone, COUNTRY_PREFIX};
