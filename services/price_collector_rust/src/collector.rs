//! Wires Postgres, Redis and the marketplace clients into one collector.

use crate::bulk::record_stream;
use crate::config::CollectorConfig;
use crate::sources::{build_enabled_sources, build_source};
use anyhow::{anyhow, Context, Result};
use pricefeed_rust_core::catalog::PgCatalog;
use pricefeed_rust_core::db::health::{check_pool_health, PoolStats};
use pricefeed_rust_core::db::schema::ensure_schema;
use pricefeed_rust_core::db::{create_pool, DbPoolConfig, PgPriceStore};
use pricefeed_rust_core::redis::RedisKvStore;
use pricefeed_rust_core::types::bucket_timestamp;
use pricefeed_rust_core::{
    AdapterOutcome, BatchMerger, BulkLoadReport, BulkStager, CatalogSource, Clock, CycleReport, Dispatcher,
    PipelineConfig, PriceSource, PriceStore, RecencyCache, SourceAdapter, TokioClock,
};
use sqlx::PgPool;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{error, info, warn};

pub struct PriceCollector {
    catalog: Arc<dyn CatalogSource>,
    catalog_slice_limit: Option<i64>,
    adapters: Vec<Arc<SourceAdapter>>,
    /// Enabled sources that could not be built, reported in every cycle
    unavailable: Vec<AdapterOutcome>,
    dispatcher: Dispatcher,
}

impl PriceCollector {
    /// Assemble a collector from already-built parts.
    pub fn new(
        pipeline: PipelineConfig,
        catalog: Arc<dyn CatalogSource>,
        catalog_slice_limit: Option<i64>,
        store: Arc<dyn PriceStore>,
        cache: Arc<RecencyCache>,
        sources: Vec<Arc<dyn PriceSource>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let merger = Arc::new(BatchMerger::new(store.clone(), pipeline.batch_size, clock.clone()));
        let adapters = sources
            .into_iter()
            .map(|source| {
                Arc::new(SourceAdapter::new(
                    source,
                    cache.clone(),
                    merger.clone(),
                    clock.clone(),
                    pipeline.adapter_config(),
                ))
            })
            .collect();
        let dispatcher = Dispatcher::new(pipeline.dispatcher_config(), clock.clone());

        Self {
            catalog,
            catalog_slice_limit,
            adapters,
            unavailable: Vec::new(),
            dispatcher,
        }
    }

    /// Report these outcomes alongside the adapters' in every cycle.
    pub fn with_unavailable(mut self, unavailable: Vec<AdapterOutcome>) -> Self {
        self.unavailable = unavailable;
        self
    }

    /// Connect to Postgres and Redis and build every enabled source.
    pub async fn connect(config: &CollectorConfig) -> Result<Self> {
        config.pipeline.validate()?;
        let pool = connect_pool(config, DbPoolConfig::from_env()).await?;

        let kv = RedisKvStore::new(&config.redis_url).context("Failed to create Redis store")?;
        let clock: Arc<dyn Clock> = Arc::new(TokioClock);
        let cache = Arc::new(RecencyCache::new(
            Arc::new(kv),
            config.pipeline.freshness_ttl,
            config.pipeline.cache_op_timeout,
            clock.clone(),
        ));

        let enabled = build_enabled_sources(config);
        if enabled.sources.is_empty() {
            return Err(anyhow!("No usable sources (ENABLED_SOURCES={:?})", config.enabled_sources));
        }

        Ok(Self::new(
            config.pipeline.clone(),
            Arc::new(PgCatalog::new(pool.clone())),
            config.catalog_slice_limit,
            Arc::new(PgPriceStore::new(pool)),
            cache,
            enabled.sources,
            clock,
        )
        .with_unavailable(enabled.unavailable))
    }

    /// Ids of the sources that will actually run
    pub fn source_ids(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.source_id()).collect()
    }

    /// One collection cycle over the eligible catalog slice.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let slice = self
            .catalog
            .eligible_items(self.catalog_slice_limit)
            .await
            .context("Failed to load catalog slice")?;
        info!("Loaded {} catalog items for sources {:?}", slice.len(), self.source_ids());

        let mut report = self.dispatcher.run_cycle(slice, &self.adapters).await;
        report.outcomes.extend(self.unavailable.iter().cloned());
        for outcome in report.failed_sources() {
            warn!(
                "{} failed: {} ({})",
                outcome.source_id,
                outcome.error.map(|k| k.to_string()).unwrap_or_default(),
                outcome.error_message.as_deref().unwrap_or("")
            );
        }
        Ok(report)
    }
}

/// Stream a JSONL dump for `source` through the bulk stager. Every record
/// gets the current price bucket as its observation time.
pub async fn load_dump<R>(
    store: Arc<dyn PriceStore>,
    pipeline: &PipelineConfig,
    clock: Arc<dyn Clock>,
    source: &dyn PriceSource,
    reader: R,
) -> Result<BulkLoadReport>
where
    R: AsyncBufRead + Unpin,
{
    let observed_at = bucket_timestamp(clock.now(), pipeline.price_bucket);
    let rejected = Arc::new(AtomicU64::new(0));
    let records = record_stream(reader, source.source_id().to_string(), observed_at, rejected.clone());

    let stager = BulkStager::new(store, pipeline.batch_size, clock);
    let mut report = stager.bulk_load(source, records).await?;
    report.dropped_count += rejected.load(Ordering::Relaxed);
    Ok(report)
}

async fn connect_pool(config: &CollectorConfig, pool_config: DbPoolConfig) -> Result<PgPool> {
    let pool = create_pool(&config.database_url, &pool_config).await?;
    check_pool_health(&pool).await?;
    let stats = PoolStats::of(&pool);
    info!("Postgres pool ready: size={} idle={}", stats.size, stats.idle);
    Ok(pool)
}

/// `cycle` subcommand. Errors when any source hit a hard failure so the
/// process exits non-zero and the scheduler notices.
pub async fn run_cycle_command(config: &CollectorConfig) -> Result<()> {
    let collector = PriceCollector::connect(config).await?;
    let report = collector.run_cycle().await?;

    info!("Cycle report: {}", serde_json::to_string(&report)?);
    if report.has_hard_failure() {
        let failed: Vec<&str> = report
            .failed_sources()
            .iter()
            .filter(|o| o.error.map(|k| k.is_hard_failure()).unwrap_or(false))
            .map(|o| o.source_id.as_str())
            .collect();
        error!("Hard failures in sources: {:?}", failed);
        return Err(anyhow!("Cycle {} finished with hard failures: {:?}", report.cycle_id, failed));
    }
    Ok(())
}

/// `bulk` subcommand. Bulk loads never consult or refresh the recency cache.
pub async fn run_bulk_command(config: &CollectorConfig, source_id: &str, path: &Path) -> Result<()> {
    config.pipeline.validate()?;
    let source = build_source(source_id, config)?;
    let pool = connect_pool(config, DbPoolConfig::from_env_with_defaults(DbPoolConfig::bulk_import())).await?;

    let file = File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let report = load_dump(
        Arc::new(PgPriceStore::new(pool)),
        &config.pipeline,
        Arc::new(TokioClock),
        source.as_ref(),
        BufReader::new(file),
    )
    .await?;

    info!("Bulk report: {}", serde_json::to_string(&report)?);
    Ok(())
}

/// `schema` subcommand
pub async fn run_schema_command(config: &CollectorConfig) -> Result<()> {
    let pool = connect_pool(config, DbPoolConfig::from_env()).await?;
    ensure_schema(&pool).await?;
    info!("Schema is up to date");
    Ok(())
}
