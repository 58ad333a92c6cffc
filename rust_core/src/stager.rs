//! Bulk stager: full-catalog dumps go through a scratch table and a single
//! set-based merge instead of thousands of batch upserts.

use crate::clock::Clock;
use crate::db::PriceStore;
use crate::error::StoreError;
use crate::retry::{execute_with_retry, RetryPolicy};
use crate::source::PriceSource;
use crate::types::{BulkLoadReport, CanonicalPriceRecord, RawRecord};
use futures_util::{pin_mut, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct BulkStager {
    store: Arc<dyn PriceStore>,
    chunk_size: usize,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl BulkStager {
    pub fn new(store: Arc<dyn PriceStore>, chunk_size: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
            retry: RetryPolicy::once(Duration::from_secs(1)),
            clock,
        }
    }

    /// Stream `records` from `source` into a fresh staging table, merge it
    /// into the canonical table once, and drop the staging table whatever
    /// happened. If the returned future is dropped before it finishes, the
    /// staging table is dropped in the background on the current runtime.
    pub async fn bulk_load<S>(&self, source: &dyn PriceSource, records: S) -> Result<BulkLoadReport, StoreError>
    where
        S: Stream<Item = RawRecord>,
    {
        let table = format!("price_staging_{}", Uuid::new_v4().simple());
        let source_id = source.source_id().to_string();
        info!("{}: bulk load into {}", source_id, table);

        self.store.create_staging(&table).await?;
        let mut guard = StagingGuard::new(self.store.clone(), table.clone());
        let result = self.stage_and_merge(source, records, &table).await;

        guard.disarm();
        if let Err(e) = self.store.drop_staging(&table).await {
            warn!("{}: failed to drop staging table {}: {}", source_id, table, e);
        }

        match &result {
            Ok(report) => info!(
                "{}: bulk load staged={} dropped={} merged={}",
                source_id, report.staged_count, report.dropped_count, report.inserted_count
            ),
            Err(e) => error!("{}: bulk load failed: {}", source_id, e),
        }
        result
    }

    async fn stage_and_merge<S>(
        &self,
        source: &dyn PriceSource,
        records: S,
        table: &str,
    ) -> Result<BulkLoadReport, StoreError>
    where
        S: Stream<Item = RawRecord>,
    {
        let mut report = BulkLoadReport {
            source_id: source.source_id().to_string(),
            staged_count: 0,
            dropped_count: 0,
            inserted_count: 0,
        };

        pin_mut!(records);
        let mut chunk: Vec<CanonicalPriceRecord> = Vec::with_capacity(self.chunk_size);
        while let Some(raw) = records.next().await {
            match source.normalize(&raw) {
                Ok(record) => chunk.push(record),
                Err(e) => {
                    report.dropped_count += 1;
                    warn!("{}: dropping bulk record for item {}: {}", report.source_id, raw.item_id, e);
                }
            }
            if chunk.len() >= self.chunk_size {
                report.staged_count += self.stage(table, &chunk).await?;
                chunk.clear();
            }
        }
        if !chunk.is_empty() {
            report.staged_count += self.stage(table, &chunk).await?;
        }

        // Staged duplicates collapse inside the merge, so a retry is harmless
        report.inserted_count = execute_with_retry(&self.retry, self.clock.as_ref(), "staging merge", || {
            self.store.merge_staging(table)
        })
        .await?;
        Ok(report)
    }

    async fn stage(&self, table: &str, chunk: &[CanonicalPriceRecord]) -> Result<u64, StoreError> {
        execute_with_retry(&self.retry, self.clock.as_ref(), "staging write", || {
            self.store.stage_prices(table, chunk)
        })
        .await
    }
}

/// Drops a staging table whose load was abandoned mid-flight
struct StagingGuard {
    store: Arc<dyn PriceStore>,
    table: String,
    armed: bool,
}

impl StagingGuard {
    fn new(store: Arc<dyn PriceStore>, table: String) -> Self {
        Self {
            store,
            table,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let table = std::mem::take(&mut self.table);
        warn!("Bulk load for {} was cancelled, dropping staging table", table);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = self.store.clone();
                handle.spawn(async move {
                    if let Err(e) = store.drop_staging(&table).await {
                        warn!("Failed to drop staging table {}: {}", table, e);
                    }
                });
            }
            Err(_) => error!("No runtime to drop staging table {}", table),
        }
    }
}
