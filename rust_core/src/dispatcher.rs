//! Collection cycle: one task per source over the same catalog slice.
//!
//! Sources never see each other's failures. A panicking adapter becomes a
//! `CRASHED` outcome, an adapter past its deadline is asked to stop and,
//! if it does not within the grace period, abandoned as `TIMEOUT`.

use crate::adapter::{CancelSignal, SourceAdapter};
use crate::clock::Clock;
use crate::types::{AdapterOutcome, CatalogItem, CycleReport, ErrorKind};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Per-source wall-clock budget before the cancel signal fires
    pub source_deadline: Duration,
    /// Extra time a cancelled adapter gets to flush and return
    pub grace: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            source_deadline: Duration::from_secs(1500),
            grace: Duration::from_secs(30),
        }
    }
}

pub struct Dispatcher {
    config: DispatcherConfig,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    /// Run every adapter against `catalog_slice` concurrently and wait for
    /// all of them. Always returns a report with one outcome per adapter,
    /// in adapter order.
    pub async fn run_cycle(
        &self,
        catalog_slice: Vec<CatalogItem>,
        adapters: &[Arc<SourceAdapter>],
    ) -> CycleReport {
        let cycle_id = Uuid::new_v4();
        let started_at = self.clock.now();
        let slice_size = catalog_slice.len();
        let slice = Arc::new(catalog_slice);

        info!(
            "Cycle {} starting: {} items x {} sources",
            cycle_id,
            slice_size,
            adapters.len()
        );

        let supervised = adapters.iter().map(|adapter| {
            let adapter = Arc::clone(adapter);
            let slice = Arc::clone(&slice);
            let cancel = CancelSignal::new();
            let source_id = adapter.source_id().to_string();

            let task_cancel = cancel.clone();
            let handle = tokio::spawn(async move { adapter.collect(&slice, &task_cancel).await });

            self.supervise(source_id, handle, cancel)
        });
        let outcomes = join_all(supervised).await;

        let report = CycleReport {
            cycle_id,
            started_at,
            finished_at: self.clock.now(),
            slice_size,
            outcomes,
        };

        info!(
            "Cycle {} finished: fetched={} inserted={} cached={} failed_sources={}",
            cycle_id,
            report.total_fetched(),
            report.total_inserted(),
            report.total_skipped_cached(),
            report.failed_sources().len()
        );
        report
    }

    async fn supervise(
        &self,
        source_id: String,
        mut handle: JoinHandle<AdapterOutcome>,
        cancel: CancelSignal,
    ) -> AdapterOutcome {
        tokio::select! {
            joined = &mut handle => return Self::joined(source_id, joined),
            _ = tokio::time::sleep(self.config.source_deadline) => {
                warn!(
                    "{}: deadline of {:?} reached, signalling cancel",
                    source_id, self.config.source_deadline
                );
                cancel.cancel();
            }
        }

        match tokio::time::timeout(self.config.grace, &mut handle).await {
            Ok(joined) => Self::joined(source_id, joined),
            Err(_) => {
                handle.abort();
                error!(
                    "{}: did not stop within {:?} grace, abandoned",
                    source_id, self.config.grace
                );
                let mut outcome = AdapterOutcome::failed(
                    source_id,
                    ErrorKind::Timeout,
                    "abandoned after deadline and grace period",
                );
                outcome.inserted_count = cancel.committed();
                outcome.elapsed = self.config.source_deadline + self.config.grace;
                outcome
            }
        }
    }

    fn joined(source_id: String, joined: Result<AdapterOutcome, JoinError>) -> AdapterOutcome {
        match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = if e.is_panic() {
                    format!("adapter panicked: {}", panic_message(e))
                } else {
                    format!("adapter task cancelled: {}", e)
                };
                error!("{}: {}", source_id, message);
                AdapterOutcome::failed(source_id, ErrorKind::Crashed, message)
            }
        }
    }
}

fn panic_message(e: JoinError) -> String {
    let payload = e.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
