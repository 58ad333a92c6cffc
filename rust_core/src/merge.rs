//! Batch merger: bounded, conflict-resolving upserts into the price store.

use crate::clock::Clock;
use crate::db::PriceStore;
use crate::error::StoreError;
use crate::retry::{execute_with_retry, RetryPolicy};
use crate::types::CanonicalPriceRecord;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

pub const DEFAULT_BATCH_SIZE: usize = 500;

pub struct BatchMerger {
    store: Arc<dyn PriceStore>,
    batch_size: usize,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl BatchMerger {
    pub fn new(store: Arc<dyn PriceStore>, batch_size: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            retry: RetryPolicy::once(Duration::from_millis(500)),
            clock,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Write `records` in batches of at most `batch_size`. Returns rows
    /// written. Stops at the first batch that still fails after its retry;
    /// batches before it stay committed.
    pub async fn upsert(&self, records: &[CanonicalPriceRecord]) -> Result<u64, StoreError> {
        let mut written = 0;
        for (index, chunk) in records.chunks(self.batch_size).enumerate() {
            let batch = collapse_duplicates(chunk);
            let label = format!("price batch {} ({} rows)", index, batch.len());

            let rows = execute_with_retry(&self.retry, self.clock.as_ref(), &label, || {
                self.store.upsert_prices(&batch)
            })
            .await
            .map_err(|e| {
                error!("{} failed after retry: {}", label, e);
                e
            })?;

            debug!("{} committed, {} rows affected", label, rows);
            written += rows;
        }
        Ok(written)
    }
}

/// Keep the last record for every identity key, preserving first-seen order
pub fn collapse_duplicates(records: &[CanonicalPriceRecord]) -> Vec<CanonicalPriceRecord> {
    let mut position = HashMap::with_capacity(records.len());
    let mut collapsed: Vec<CanonicalPriceRecord> = Vec::with_capacity(records.len());

    for record in records {
        match position.get(&record.identity_key()) {
            Some(&i) => collapsed[i] = record.clone(),
            None => {
                position.insert(record.identity_key(), collapsed.len());
                collapsed.push(record.clone());
            }
        }
    }
    collapsed
}
