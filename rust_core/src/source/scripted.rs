//! Deterministic in-process source for tests and dry runs.
//!
//! Prices, failures and latency are scripted per item; every fetch is
//! recorded so tests can assert which items actually hit the "marketplace".

use super::PriceSource;
use crate::error::{NormalizationError, SourceError};
use crate::normalize::{
    base_record, ensure_source, optional_count, optional_price, parse_condition, parse_currency,
    parse_language, positive_price,
};
use crate::rate_limit::RateLimitPolicy;
use crate::types::{CanonicalPriceRecord, CatalogItem, ItemId, RawRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Scripted failure mode
#[derive(Debug, Clone, PartialEq)]
pub enum FailWith {
    Transient,
    RateLimited(Option<Duration>),
    Auth,
    Config,
    /// The fetch panics
    Panic,
    /// The fetch never completes
    Hang,
}

impl FailWith {
    async fn trigger(&self, item_id: ItemId) -> SourceError {
        match self {
            FailWith::Transient => SourceError::Transient(format!("connection reset (item {})", item_id)),
            FailWith::RateLimited(retry_after) => SourceError::RateLimited {
                retry_after: *retry_after,
            },
            FailWith::Auth => SourceError::Auth("401 Unauthorized".to_string()),
            FailWith::Config => SourceError::Config("400 Bad Request".to_string()),
            FailWith::Panic => panic!("scripted panic fetching item {}", item_id),
            FailWith::Hang => {
                std::future::pending::<()>().await;
                SourceError::Transient("unreachable".to_string())
            }
        }
    }
}

pub struct ScriptedSource {
    source_id: String,
    payloads: HashMap<ItemId, Vec<Value>>,
    failures: Mutex<HashMap<ItemId, VecDeque<FailWith>>>,
    always: Option<FailWith>,
    latency: Duration,
    rate_limit: RateLimitPolicy,
    calls: Mutex<Vec<ItemId>>,
}

impl ScriptedSource {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            payloads: HashMap::new(),
            failures: Mutex::new(HashMap::new()),
            always: None,
            latency: Duration::ZERO,
            rate_limit: RateLimitPolicy::Unlimited,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Near-mint, English, non-foil USD price
    pub fn with_price(self, item_id: ItemId, price: f64) -> Self {
        self.with_payload(
            item_id,
            json!({"price": price, "currency": "USD", "condition": "NM", "language": "en", "foil": false}),
        )
    }

    /// Add one raw payload for `item_id`; several payloads yield several records
    pub fn with_payload(mut self, item_id: ItemId, payload: Value) -> Self {
        self.payloads.entry(item_id).or_default().push(payload);
        self
    }

    /// First `times` fetches of `item_id` fail, later ones succeed
    pub fn fail_first(self, item_id: ItemId, times: usize, failure: FailWith) -> Self {
        self.failures
            .lock()
            .entry(item_id)
            .or_default()
            .extend(std::iter::repeat(failure).take(times));
        self
    }

    /// Every fetch fails the same way
    pub fn fail_always(mut self, failure: FailWith) -> Self {
        self.always = Some(failure);
        self
    }

    /// Real delay before each fetch answers
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_rate_limit(mut self, policy: RateLimitPolicy) -> Self {
        self.rate_limit = policy;
        self
    }

    /// Item ids in fetch order, retries included
    pub fn fetched_items(&self) -> Vec<ItemId> {
        self.calls.lock().clone()
    }

    pub fn fetch_count(&self, item_id: ItemId) -> usize {
        self.calls.lock().iter().filter(|id| **id == item_id).count()
    }

    pub fn total_fetches(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl PriceSource for ScriptedSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch_one(
        &self,
        item: &CatalogItem,
        observed_at: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>, SourceError> {
        self.calls.lock().push(item.item_id);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some(failure) = &self.always {
            return Err(failure.trigger(item.item_id).await);
        }
        let scripted = self
            .failures
            .lock()
            .get_mut(&item.item_id)
            .and_then(|queue| queue.pop_front());
        if let Some(failure) = scripted {
            return Err(failure.trigger(item.item_id).await);
        }

        Ok(self
            .payloads
            .get(&item.item_id)
            .map(|payloads| {
                payloads
                    .iter()
                    .map(|payload| RawRecord {
                        item_id: item.item_id,
                        source_id: self.source_id.clone(),
                        observed_at,
                        payload: payload.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn normalize(&self, raw: &RawRecord) -> Result<CanonicalPriceRecord, NormalizationError> {
        ensure_source(raw, &self.source_id)?;
        let p = &raw.payload;

        let currency = match p.get("currency").and_then(Value::as_str) {
            Some(code) => parse_currency(code)?,
            None => "USD".to_string(),
        };
        let mut record = base_record(raw, positive_price(p, "price")?, currency);

        if let Some(condition) = p.get("condition").and_then(Value::as_str) {
            record.condition = parse_condition(condition)?;
        }
        if let Some(language) = p.get("language").and_then(Value::as_str) {
            record.language = parse_language(language)?;
        }
        record.is_foil = p.get("foil").and_then(Value::as_bool).unwrap_or(false);
        record.market_price = optional_price(p, "market")?;
        record.listing_count = optional_count(p, "listings")?;
        Ok(record)
    }

    fn rate_limit_policy(&self) -> RateLimitPolicy {
        self.rate_limit.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_scripted_prices_and_failures() {
        let source = ScriptedSource::new("fake")
            .with_price(1, 10.0)
            .fail_first(1, 1, FailWith::Transient);
        let item = CatalogItem::new(1);

        assert!(source.fetch_one(&item, now()).await.is_err());
        let records = source.fetch_one(&item, now()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(source.fetch_count(1), 2);

        let record = source.normalize(&records[0]).unwrap();
        assert_eq!(record.price, 10.0);
        assert_eq!(record.observed_at, now());
    }

    #[tokio::test]
    async fn test_unknown_item_is_not_found() {
        let source = ScriptedSource::new("fake");
        let records = source.fetch_one(&CatalogItem::new(9), now()).await.unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_normalize_rejects_foreign_record() {
        let source = ScriptedSource::new("fake");
        let raw = RawRecord {
            item_id: 1,
            source_id: "other".to_string(),
            observed_at: now(),
            payload: json!({"price": 1.0}),
        };
        assert!(matches!(
            source.normalize(&raw),
            Err(NormalizationError::WrongSource { .. })
        ));
    }
}
