//! Redis-backed [`KvStore`] for the recency cache.
//!
//! Markers are plain `SET key value EX ttl` entries, so expiry is handled by
//! Redis itself. Reads use one `MGET`, writes one pipeline.

use crate::cache::KvStore;
use crate::error::CacheError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use std::env;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

pub struct RedisKvStore {
    client: Client,
    /// Established lazily so a Redis outage at startup does not stop collection
    connection: Mutex<Option<ConnectionManager>>,
}

impl RedisKvStore {
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("Invalid REDIS_URL")?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
        })
    }

    pub fn from_env() -> Result<Self> {
        let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        Self::new(&redis_url)
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = ConnectionManager::new(self.client.clone()).await?;
        info!("Connected to Redis recency cache");
        *guard = Some(conn.clone());
        Ok(conn)
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        let values: Vec<Option<String>> = redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;
        Ok(values)
    }

    async fn set_many_with_ttl(
        &self,
        entries: &[(String, String)],
        ttl: Duration,
    ) -> Result<(), CacheError> {
        if entries.is_empty() {
            return Ok(());
        }
        let ttl_secs = ttl.as_secs().max(1);
        let mut pipe = redis::pipe();
        for (key, value) in entries {
            pipe.cmd("SET").arg(key).arg(value).arg("EX").arg(ttl_secs).ignore();
        }

        let mut conn = self.connection().await?;
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}
