//! Source adapter: runs one [`PriceSource`] over a catalog slice.
//!
//! Per run: skip items the recency cache reports fresh, fetch the rest one
//! at a time behind the source's rate limiter (retrying transient failures),
//! normalize, flush full batches through the [`BatchMerger`] and mark the
//! flushed items fresh once their batch has committed.

use crate::cache::RecencyCache;
use crate::clock::Clock;
use crate::error::SourceError;
use crate::merge::BatchMerger;
use crate::rate_limit::RateLimiter;
use crate::retry::{execute_with_retry, RetryPolicy};
use crate::source::PriceSource;
use crate::types::{
    bucket_timestamp, AdapterOutcome, CanonicalPriceRecord, CatalogItem, ErrorKind, ItemId,
    RawRecord,
};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Cooperative stop flag shared between the dispatcher and one adapter run.
/// Also carries the rows the run has committed so far, so a run that has to
/// be abandoned can still report them.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    cancelled: Arc<AtomicBool>,
    committed: Arc<AtomicU64>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn add_committed(&self, rows: u64) {
        self.committed.fetch_add(rows, Ordering::SeqCst);
    }

    /// Rows written by completed batches of this run
    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Width of the `observed_at` bucket
    pub price_bucket: Duration,
    /// Abort with `Partial` after this many items fail in a row
    pub max_consecutive_failures: u32,
    pub retry: RetryPolicy,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            price_bucket: Duration::from_secs(86_400),
            max_consecutive_failures: 5,
            retry: RetryPolicy::default(),
        }
    }
}

/// Why a run stopped before the end of the slice
struct Abort {
    kind: ErrorKind,
    message: String,
}

/// Normalized records waiting for the merger, plus the items they belong to.
/// An item is complete once every one of its records has been written.
#[derive(Default)]
struct PendingBatch {
    records: Vec<CanonicalPriceRecord>,
    /// (item, offset one past its last record in `records`)
    items: Vec<(ItemId, usize)>,
}

impl PendingBatch {
    fn push_item(&mut self, item_id: ItemId, records: Vec<CanonicalPriceRecord>) {
        if records.is_empty() {
            return;
        }
        self.records.extend(records);
        self.items.push((item_id, self.records.len()));
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Take the first `n` records and the items they complete. Items whose
    /// records straddle the cut stay pending.
    fn take_front(&mut self, n: usize) -> (Vec<CanonicalPriceRecord>, Vec<ItemId>) {
        let n = n.min(self.records.len());
        let batch: Vec<CanonicalPriceRecord> = self.records.drain(..n).collect();

        let complete = self.items.iter().take_while(|(_, end)| *end <= n).count();
        let completed: Vec<ItemId> = self.items.drain(..complete).map(|(id, _)| id).collect();
        for (_, end) in self.items.iter_mut() {
            *end -= n;
        }
        (batch, completed)
    }

    fn clear(&mut self) {
        self.records.clear();
        self.items.clear();
    }
}

pub struct SourceAdapter {
    source: Arc<dyn PriceSource>,
    cache: Arc<RecencyCache>,
    merger: Arc<BatchMerger>,
    limiter: RateLimiter,
    clock: Arc<dyn Clock>,
    config: AdapterConfig,
}

impl SourceAdapter {
    pub fn new(
        source: Arc<dyn PriceSource>,
        cache: Arc<RecencyCache>,
        merger: Arc<BatchMerger>,
        clock: Arc<dyn Clock>,
        config: AdapterConfig,
    ) -> Self {
        let limiter = RateLimiter::new(&source.rate_limit_policy());
        Self {
            source,
            cache,
            merger,
            limiter,
            clock,
            config,
        }
    }

    pub fn source_id(&self) -> &str {
        self.source.source_id()
    }

    /// Collect prices for `slice`. Never fails: every problem ends up in the
    /// returned outcome.
    pub async fn collect(&self, slice: &[CatalogItem], cancel: &CancelSignal) -> AdapterOutcome {
        let started = Instant::now();
        let source_id = self.source.source_id().to_string();
        let mut outcome = AdapterOutcome::new(&source_id);

        let ids: Vec<ItemId> = slice.iter().map(|item| item.item_id).collect();
        let fresh = self.cache.fresh_items(&ids, &source_id).await;
        outcome.skipped_cached_count = slice.iter().filter(|i| fresh.contains(&i.item_id)).count() as u64;

        let todo: Vec<&CatalogItem> = slice.iter().filter(|i| !fresh.contains(&i.item_id)).collect();
        info!(
            "{}: collecting {} items ({} fresh in cache)",
            source_id,
            todo.len(),
            outcome.skipped_cached_count
        );

        let batch_size = self.merger.batch_size();
        let mut pending = PendingBatch::default();
        let mut consecutive_failures = 0u32;
        let mut abort: Option<Abort> = None;

        for item in todo {
            if cancel.is_cancelled() {
                abort = Some(Abort {
                    kind: ErrorKind::Timeout,
                    message: format!("deadline reached after {} items", outcome.attempted_count),
                });
                break;
            }

            outcome.attempted_count += 1;
            let observed_at = bucket_timestamp(self.clock.now(), self.config.price_bucket);

            let raws = match self.fetch_with_retry(item, observed_at).await {
                Ok(raws) => {
                    consecutive_failures = 0;
                    raws
                }
                Err(e) if e.is_retriable() => {
                    outcome.failed_count += 1;
                    consecutive_failures += 1;
                    warn!(
                        "{}: dropping item {} after retries: {}",
                        source_id, item.item_id, e
                    );
                    if consecutive_failures >= self.config.max_consecutive_failures {
                        abort = Some(Abort {
                            kind: ErrorKind::Partial,
                            message: format!(
                                "{} consecutive item failures, last: {}",
                                consecutive_failures, e
                            ),
                        });
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    outcome.failed_count += 1;
                    abort = Some(Abort {
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                    break;
                }
            };

            if raws.is_empty() {
                debug!("{}: no price for item {}", source_id, item.item_id);
                continue;
            }
            outcome.fetched_count += raws.len() as u64;

            let mut records = Vec::with_capacity(raws.len());
            for raw in &raws {
                match self.source.normalize(raw) {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        outcome.normalization_dropped += 1;
                        warn!(
                            "{}: dropping record for item {}: {}",
                            source_id, item.item_id, e
                        );
                    }
                }
            }
            pending.push_item(item.item_id, records);

            while pending.len() >= batch_size {
                if let Err(abort_reason) = self.flush(&mut pending, batch_size, &mut outcome, cancel).await {
                    abort = Some(abort_reason);
                    break;
                }
            }
            if abort.is_some() {
                break;
            }
        }

        // A store failure leaves nothing worth flushing; anything else still
        // commits what was already fetched.
        let store_failed = matches!(&abort, Some(a) if a.kind == ErrorKind::Store);
        if !store_failed && !pending.is_empty() {
            if let Err(abort_reason) = self.flush(&mut pending, batch_size, &mut outcome, cancel).await {
                abort = Some(abort_reason);
            }
        }

        if let Some(Abort { kind, message }) = abort {
            error!("{}: run stopped early ({}): {}", source_id, kind, message);
            outcome.error = Some(kind);
            outcome.error_message = Some(message);
        }

        outcome.elapsed = started.elapsed();
        info!(
            "{}: attempted={} fetched={} inserted={} cached={} failed={} dropped={} in {:?}",
            source_id,
            outcome.attempted_count,
            outcome.fetched_count,
            outcome.inserted_count,
            outcome.skipped_cached_count,
            outcome.failed_count,
            outcome.normalization_dropped,
            outcome.elapsed
        );
        outcome
    }

    async fn fetch_with_retry(
        &self,
        item: &CatalogItem,
        observed_at: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>, SourceError> {
        let source = self.source.as_ref();
        let limiter = &self.limiter;
        let clock = self.clock.as_ref();
        let label = format!("{} fetch item {}", source.source_id(), item.item_id);

        execute_with_retry(&self.config.retry, clock, &label, move || async move {
            limiter.acquire(clock).await;
            source.fetch_one(item, observed_at).await
        })
        .await
    }

    /// Write at most one merger batch from the front of `pending`, then mark
    /// the items it completed fresh. On failure the rest of the buffer is
    /// discarded.
    async fn flush(
        &self,
        pending: &mut PendingBatch,
        batch_size: usize,
        outcome: &mut AdapterOutcome,
        cancel: &CancelSignal,
    ) -> Result<(), Abort> {
        let (batch, completed) = pending.take_front(batch_size);

        match self.merger.upsert(&batch).await {
            Ok(written) => {
                outcome.inserted_count += written;
                cancel.add_committed(written);
                if !completed.is_empty() {
                    self.cache
                        .mark_fresh(&completed, self.source.source_id(), None)
                        .await;
                }
                Ok(())
            }
            Err(e) => {
                pending.clear();
                Err(Abort {
                    kind: ErrorKind::Store,
                    message: e.to_string(),
                })
            }
        }
    }
}
