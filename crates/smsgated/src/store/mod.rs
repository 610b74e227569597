//! Time-expiring code store.
//!
//! Pending one-time codes live in an external key/value store with native
//! per-key TTL. The daemon talks to it through [`CodeStore`] so the backend
//! can be Redis in production and an in-process map for local runs and tests.
//!
//! Key layout is an external contract: `otp:<raw phone>` holding the plain
//! code string, expiring after [`CODE_TTL`].

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Prefix for every code key.
pub const KEY_PREFIX: &str = "otp:";

/// Lifetime of a pending code.
pub const CODE_TTL: Duration = Duration::from_secs(1800);

/// Builds the store key for a phone number.
pub fn code_key(phone: &str) -> String {
    format!("{KEY_PREFIX}{phone}")
}

/// A key/value store with per-key expiry.
///
/// Each single-key operation must be atomic on the backend; callers rely on
/// that for get/set/delete linearizability and add no locking of their own.
#[async_trait]
pub trait CodeStore: Send + Sync {
    /// Returns the live value for `key`, `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores `value` under `key`, expiring after `ttl`.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Deletes `key`. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Checks that the backend is reachable.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Errors that can occur talking to the store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),

    #[error("store command {command} failed: {reason}")]
    Command {
        command: &'static str,
        reason: String,
    },

    #[error("store command {command} timed out after {timeout:?}")]
    Timeout {
        command: &'static str,
        timeout: Duration,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_key_layout() {
        assert_eq!(code_key("61234567"), "otp:61234567");
    }

    #[test]
    fn test_ttl_is_thirty_minutes() {
        assert_eq!(CODE_TTL.as_secs(), 1800);
    }

    #[test]
    fn test_timeout_display() {
        let err = StoreError::Timeout {
            command: "GET",
            timeout: Duration::from_millis(2000),
        };
        assert!(err.to_string().contains("GET"));
        assert!(err.to_string().contains("2s"));
    }
}
