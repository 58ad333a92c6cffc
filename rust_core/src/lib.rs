//! Pricefeed Core - multi-source card price ingestion.
//!
//! This crate provides:
//! - Marketplace clients (TCGplayer, Cardmarket, Scryfall) behind one `PriceSource` trait
//! - Per-source adapters with rate limiting, retry and normalization
//! - A Redis-backed recency cache that skips recently refreshed items
//! - Idempotent batch upserts and staged bulk merges into Postgres
//! - A dispatcher running all sources concurrently with failure isolation

pub mod adapter;
pub mod cache;
pub mod catalog;
pub mod clients;
pub mod clock;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod merge;
pub mod normalize;
pub mod rate_limit;
pub mod redis;
pub mod retry;
pub mod source;
pub mod stager;
pub mod types;

pub use adapter::{AdapterConfig, CancelSignal, SourceAdapter};
pub use cache::{KvStore, RecencyCache};
pub use catalog::CatalogSource;
pub use clock::{Clock, ManualClock, TokioClock};
pub use config::PipelineConfig;
pub use db::PriceStore;
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::{CacheError, NormalizationError, SourceError, StoreError};
pub use merge::BatchMerger;
pub use rate_limit::{RateLimitPolicy, RateLimiter};
pub use retry::RetryPolicy;
pub use source::PriceSource;
pub use stager::BulkStager;
pub use types::*;
