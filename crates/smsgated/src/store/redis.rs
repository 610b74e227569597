//! Redis-backed code store.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;

use super::{CodeStore, StoreError};

/// Code store on a Redis server.
///
/// Uses a [`ConnectionManager`], which multiplexes one connection and
/// reconnects on its own after a drop.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connects to `url` (e.g. `redis://:secret@127.0.0.1:6379/`) and
    /// verifies the server answers `PING`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(url).map_err(|e| StoreError::Connection(e.to_string()))?;
        let addr = client.get_connection_info().addr.to_string();

        info!(addr = %addr, "Connecting to Redis");
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self { conn };
        store.ping().await?;
        info!(addr = %addr, "Redis connected and ready");

        Ok(store)
    }
}

fn command_error(command: &'static str) -> impl Fn(redis::RedisError) -> StoreError {
    move |e| StoreError::Command {
        command,
        reason: e.to_string(),
    }
}

#[async_trait]
impl CodeStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(command_error("GET"))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await
            .map_err(command_error("SETEX"))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(command_error("DEL"))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(command_error("PING"))?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
