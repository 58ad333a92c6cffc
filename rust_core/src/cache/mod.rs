//! Recency cache: "was (item, source) refreshed within the freshness window".
//!
//! Freshness lives in a shared key-value store with native per-key expiry so
//! every collector instance sees the same view. Reads fail open: if the store
//! is unreachable every item is treated as stale and gets re-fetched.

pub mod memory;

use crate::clock::Clock;
use crate::error::CacheError;
use crate::types::ItemId;
use async_trait::async_trait;
use chrono::DateTime;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub use memory::MemoryKvStore;

/// Keys per MGET round trip
const MAX_KEYS_PER_READ: usize = 1000;

/// Minimal key-value contract the cache needs
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Bulk read, one round trip; result is aligned with `keys`
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError>;

    /// Bulk write with expiry, one round trip
    async fn set_many_with_ttl(
        &self,
        entries: &[(String, String)],
        ttl: Duration,
    ) -> Result<(), CacheError>;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut values = self.get_many(&[key.to_string()]).await?;
        Ok(values.pop().flatten())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.set_many_with_ttl(&[(key.to_string(), value.to_string())], ttl)
            .await
    }
}

pub struct RecencyCache {
    store: Arc<dyn KvStore>,
    ttl: Duration,
    op_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl RecencyCache {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration, op_timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            ttl,
            op_timeout,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn key(source_id: &str, item_id: ItemId) -> String {
        format!("price:fresh:{}:{}", source_id, item_id)
    }

    /// Single-item check. Any cache failure reads as "stale".
    pub async fn is_fresh(&self, item_id: ItemId, source_id: &str) -> bool {
        self.fresh_items(&[item_id], source_id).await.contains(&item_id)
    }

    /// Bulk check returning the subset of `item_ids` that are fresh.
    pub async fn fresh_items(&self, item_ids: &[ItemId], source_id: &str) -> HashSet<ItemId> {
        let mut fresh = HashSet::new();

        for chunk in item_ids.chunks(MAX_KEYS_PER_READ) {
            let keys: Vec<String> = chunk.iter().map(|id| Self::key(source_id, *id)).collect();

            let values = match self.bounded(self.store.get_many(&keys)).await {
                Ok(values) => values,
                Err(e) => {
                    warn!(
                        "Recency cache read failed for {} ({} keys), treating as stale: {}",
                        source_id,
                        keys.len(),
                        e
                    );
                    continue;
                }
            };

            for (item_id, value) in chunk.iter().zip(values) {
                if value.as_deref().map(is_marker).unwrap_or(false) {
                    fresh.insert(*item_id);
                }
            }
        }

        debug!(
            "Recency cache: {}/{} items fresh for {}",
            fresh.len(),
            item_ids.len(),
            source_id
        );
        fresh
    }

    /// Record that `item_ids` were durably written for `source_id`.
    /// Failures are logged; losing a marker only costs one extra fetch.
    pub async fn mark_fresh(&self, item_ids: &[ItemId], source_id: &str, ttl: Option<Duration>) {
        if item_ids.is_empty() {
            return;
        }
        let ttl = ttl.unwrap_or(self.ttl);
        let stamp = self.clock.now().to_rfc3339();
        let entries: Vec<(String, String)> = item_ids
            .iter()
            .map(|id| (Self::key(source_id, *id), stamp.clone()))
            .collect();

        if let Err(e) = self.bounded(self.store.set_many_with_ttl(&entries, ttl)).await {
            warn!(
                "Recency cache write failed for {} ({} items): {}",
                source_id,
                entries.len(),
                e
            );
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.op_timeout)),
        }
    }
}

/// A live marker means fresh: the store's own expiry enforces whatever TTL
/// it was written with. Unreadable values count as stale.
fn is_marker(raw: &str) -> bool {
    DateTime::parse_from_rfc3339(raw).is_ok()
}
