//! Marketplace capability trait.
//!
//! Every marketplace differs in authentication, pacing and payload shape;
//! all of that stays behind [`PriceSource`]. The adapter harness only ever
//! sees raw records going in and canonical records coming out.

pub mod scripted;

use crate::error::{NormalizationError, SourceError};
use crate::rate_limit::RateLimitPolicy;
use crate::types::{CanonicalPriceRecord, CatalogItem, RawRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use scripted::{FailWith, ScriptedSource};

#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Stable identifier, also the `source_id` column value
    fn source_id(&self) -> &str;

    /// Fetch current prices for one catalog item. An empty result means the
    /// marketplace has no listing (or the item has no id on this source).
    /// Every returned record must carry `observed_at`.
    async fn fetch_one(
        &self,
        item: &CatalogItem,
        observed_at: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>, SourceError>;

    /// Pure conversion of one raw record
    fn normalize(&self, raw: &RawRecord) -> Result<CanonicalPriceRecord, NormalizationError>;

    fn rate_limit_policy(&self) -> RateLimitPolicy;
}
