//! smsgate Daemon - code service, connection registry and realtime gateway
//!
//! This crate provides the daemon's building blocks:
//! - `store` - Time-expiring code store (Redis or in-memory)
//! - `registry` - Live delivery workers and their busy/idle state
//! - `gateway` - Long-poll and websocket transports, broadcast, idle reaper
//! - `service` - Code issuance/verification and message dispatch
//! - `api` - HTTP routes and middleware
//! - `config` - Command line, environment and file configuration
//! - `server` - Wiring and graceful serving
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      smsgated daemon                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  HTTP ──▶ api ──▶ CodeService ──┬──▶ CodeStore (Redis)      │
//! │               └─▶ DispatchService│                          │
//! │                                 ▼                           │
//! │                  Gateway::deliver (Broadcaster)             │
//! │                                 │ snapshot, then try_send   │
//! │                                 ▼                           │
//! │  ┌─────────────────────┐   ┌──────────────────────────┐     │
//! │  │ ConnectionRegistry  │◀──│ per-connection outboxes  │     │
//! │  │ (busy / idle)       │   │ poll or websocket task   │     │
//! │  └─────────────────────┘   └──────────────────────────┘     │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - A panicking connection task is contained and unregistered

pub mod api;
pub mod config;
pub mod gateway;
pub mod registry;
pub mod server;
pub mod service;
pub mod store;
