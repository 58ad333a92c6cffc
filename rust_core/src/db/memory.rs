//! In-process [`PriceStore`] mirroring the Postgres conflict semantics.
//!
//! Used by tests and dry runs. Like Postgres, a single upsert that touches the
//! same identity key twice is rejected.

use super::prices::{validate_staging_name, PriceStore};
use crate::error::StoreError;
use crate::types::{CanonicalPriceRecord, IdentityKey};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

#[derive(Default)]
pub struct MemoryPriceStore {
    rows: Mutex<BTreeMap<IdentityKey, CanonicalPriceRecord>>,
    staging: Mutex<HashMap<String, Vec<CanonicalPriceRecord>>>,
    /// Size of every upsert call, in order
    upsert_calls: Mutex<Vec<usize>>,
    merge_calls: AtomicU32,
    /// Upcoming upsert calls that should fail
    failures_pending: AtomicU32,
    /// Calls that still succeed before `failures_pending` kicks in
    successes_before_failure: AtomicU32,
    always_fail: AtomicBool,
}

impl MemoryPriceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` upsert calls fail
    pub fn fail_next_upserts(&self, n: u32) {
        self.failures_pending.store(n, Ordering::SeqCst);
    }

    /// Let `successes` upsert calls through, then fail the next `n`
    pub fn fail_upserts_after(&self, successes: u32, n: u32) {
        self.successes_before_failure.store(successes, Ordering::SeqCst);
        self.failures_pending.store(n, Ordering::SeqCst);
    }

    /// Make every write fail until reset
    pub fn set_always_fail(&self, fail: bool) {
        self.always_fail.store(fail, Ordering::SeqCst);
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().len()
    }

    /// Snapshot of all rows ordered by identity key
    pub fn rows(&self) -> Vec<CanonicalPriceRecord> {
        self.rows.lock().values().cloned().collect()
    }

    pub fn rows_for_source(&self, source_id: &str) -> Vec<CanonicalPriceRecord> {
        self.rows
            .lock()
            .values()
            .filter(|r| r.source_id == source_id)
            .cloned()
            .collect()
    }

    pub fn upsert_call_sizes(&self) -> Vec<usize> {
        self.upsert_calls.lock().clone()
    }

    pub fn merge_call_count(&self) -> u32 {
        self.merge_calls.load(Ordering::SeqCst)
    }

    /// Names of staging tables that still exist
    pub fn staging_tables(&self) -> Vec<String> {
        self.staging.lock().keys().cloned().collect()
    }

    fn injected_failure(&self) -> Result<(), StoreError> {
        if self.always_fail.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        let pending = self.failures_pending.load(Ordering::SeqCst);
        let allowed = self.successes_before_failure.load(Ordering::SeqCst);
        if pending > 0 && allowed > 0 {
            self.successes_before_failure.store(allowed - 1, Ordering::SeqCst);
            return Ok(());
        }
        if pending > 0 {
            self.failures_pending.store(pending - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }

    fn apply(rows: &mut BTreeMap<IdentityKey, CanonicalPriceRecord>, record: &CanonicalPriceRecord) {
        match rows.get_mut(&record.identity_key()) {
            Some(existing) => {
                existing.price = record.price;
                existing.currency = record.currency.clone();
                existing.low_price = record.low_price;
                existing.mid_price = record.mid_price;
                existing.high_price = record.high_price;
                existing.market_price = record.market_price;
                existing.listing_count = record.listing_count;
            }
            None => {
                rows.insert(record.identity_key(), record.clone());
            }
        }
    }
}

#[async_trait]
impl PriceStore for MemoryPriceStore {
    async fn upsert_prices(&self, records: &[CanonicalPriceRecord]) -> Result<u64, StoreError> {
        self.upsert_calls.lock().push(records.len());
        self.injected_failure()?;

        let mut seen = HashSet::with_capacity(records.len());
        for record in records {
            if !seen.insert(record.identity_key()) {
                return Err(StoreError::Unavailable(
                    "ON CONFLICT DO UPDATE command cannot affect row a second time".to_string(),
                ));
            }
        }

        let mut rows = self.rows.lock();
        for record in records {
            Self::apply(&mut rows, record);
        }
        Ok(records.len() as u64)
    }

    async fn create_staging(&self, table: &str) -> Result<(), StoreError> {
        validate_staging_name(table)?;
        self.staging.lock().insert(table.to_string(), Vec::new());
        Ok(())
    }

    async fn stage_prices(&self, table: &str, records: &[CanonicalPriceRecord]) -> Result<u64, StoreError> {
        validate_staging_name(table)?;
        if self.always_fail.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        let mut staging = self.staging.lock();
        let rows = staging
            .get_mut(table)
            .ok_or_else(|| StoreError::StagingNotFound(table.to_string()))?;
        rows.extend_from_slice(records);
        Ok(records.len() as u64)
    }

    async fn merge_staging(&self, table: &str) -> Result<u64, StoreError> {
        validate_staging_name(table)?;
        self.merge_calls.fetch_add(1, Ordering::SeqCst);
        if self.always_fail.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }

        let staged = self
            .staging
            .lock()
            .get(table)
            .cloned()
            .ok_or_else(|| StoreError::StagingNotFound(table.to_string()))?;

        // DISTINCT ON (key) ORDER BY seq DESC: last staged row per key wins
        let mut latest: BTreeMap<IdentityKey, CanonicalPriceRecord> = BTreeMap::new();
        for record in staged {
            latest.insert(record.identity_key(), record);
        }

        let mut rows = self.rows.lock();
        for record in latest.values() {
            Self::apply(&mut rows, record);
        }
        Ok(latest.len() as u64)
    }

    async fn drop_staging(&self, table: &str) -> Result<(), StoreError> {
        validate_staging_name(table)?;
        self.staging.lock().remove(table);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Condition, Language};
    use chrono::{TimeZone, Utc};

    fn record(item_id: i64, price: f64) -> CanonicalPriceRecord {
        CanonicalPriceRecord {
            item_id,
            source_id: "scryfall".to_string(),
            observed_at: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            price,
            currency: "USD".to_string(),
            condition: Condition::NearMint,
            is_foil: false,
            language: Language::English,
            low_price: None,
            mid_price: None,
            high_price: None,
            market_price: None,
            listing_count: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_updates_price_fields_only() {
        let store = MemoryPriceStore::new();
        store.upsert_prices(&[record(1, 10.0)]).await.unwrap();
        store.upsert_prices(&[record(1, 12.5)]).await.unwrap();

        let rows = store.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].price, 12.5);
    }

    #[tokio::test]
    async fn test_duplicate_key_in_one_batch_is_rejected() {
        let store = MemoryPriceStore::new();
        let result = store.upsert_prices(&[record(1, 10.0), record(1, 11.0)]).await;
        assert!(result.is_err());
        assert_eq!(store.row_count(), 0);
    }

    #[tokio::test]
    async fn test_staging_merge_last_row_wins() {
        let store = MemoryPriceStore::new();
        store.create_staging("stage_a").await.unwrap();
        store
            .stage_prices("stage_a", &[record(1, 1.0), record(2, 2.0), record(1, 3.0)])
            .await
            .unwrap();

        assert_eq!(store.merge_staging("stage_a").await.unwrap(), 2);
        store.drop_staging("stage_a").await.unwrap();

        let rows = store.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].price, 3.0);
        assert!(store.staging_tables().is_empty());
    }
}
