//! In-process [`KvStore`] with TTL, for local runs and tests.

use super::KvStore;
use crate::clock::{Clock, TokioClock};
use crate::error::CacheError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
    clock: Arc<dyn Clock>,
    unreachable: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(TokioClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            unreachable: AtomicBool::new(false),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Simulate an outage: every call fails until reset
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn read_round_trips(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_round_trips(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Live (unexpired) entry count
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .lock()
            .values()
            .filter(|(_, expires_at)| *expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_reachable(&self) -> Result<(), CacheError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(CacheError::Unreachable("connection refused".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        self.check_reachable()?;
        self.reads.fetch_add(1, Ordering::SeqCst);

        let now = self.clock.now();
        let mut entries = self.entries.lock();
        entries.retain(|_, (_, expires_at)| *expires_at > now);

        Ok(keys
            .iter()
            .map(|k| entries.get(k).map(|(v, _)| v.clone()))
            .collect())
    }

    async fn set_many_with_ttl(
        &self,
        entries: &[(String, String)],
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.check_reachable()?;
        self.writes.fetch_add(1, Ordering::SeqCst);

        let expires_at = self.clock.now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
        let mut map = self.entries.lock();
        for (key, value) in entries {
            map.insert(key.clone(), (value.clone(), expires_at));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn test_entries_expire() {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryKvStore::with_clock(clock.clone());

        store.set_with_ttl("a", "1", Duration::from_secs(10)).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));

        clock.advance(Duration::from_secs(11));
        assert_eq!(store.get("a").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_errors() {
        let store = MemoryKvStore::new();
        store.set_unreachable(true);
        assert!(store.get("a").await.is_err());
        assert!(store.set_with_ttl("a", "1", Duration::from_secs(1)).await.is_err());
    }
}
