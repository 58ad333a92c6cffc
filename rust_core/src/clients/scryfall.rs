//! Scryfall card API (public, no auth).
//!
//! A card carries up to three USD prices (`usd`, `usd_foil`, `usd_etched`);
//! each present finish becomes one raw record. Etched shares the foil
//! identity key, so it is only used when there is no regular foil price.

use super::{http_client, read_json};
use crate::error::{NormalizationError, SourceError};
use crate::normalize::{base_record, ensure_source, parse_language, positive_price, require};
use crate::rate_limit::RateLimitPolicy;
use crate::source::PriceSource;
use crate::types::{CanonicalPriceRecord, CatalogItem, RawRecord};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

pub const SOURCE_ID: &str = "scryfall";
const DEFAULT_BASE_URL: &str = "https://api.scryfall.com";

/// Scryfall asks clients to keep 50-100ms between requests
const REQUEST_SPACING: Duration = Duration::from_millis(100);

pub struct ScryfallClient {
    client: Client,
    base_url: String,
}

impl ScryfallClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(base_url: String) -> Result<Self> {
        Ok(Self {
            client: http_client(Duration::from_secs(20))?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// One payload per priced finish
    pub fn split_finishes(card: &Value) -> Vec<Value> {
        let prices = match card.get("prices") {
            Some(p) => p,
            None => return Vec::new(),
        };
        let lang = card.get("lang").and_then(Value::as_str).unwrap_or("en");
        let priced = |field: &str| prices.get(field).filter(|v| !v.is_null()).cloned();

        let mut finishes = Vec::new();
        if let Some(usd) = priced("usd") {
            finishes.push(json!({"finish": "nonfoil", "price": usd, "lang": lang}));
        }
        match (priced("usd_foil"), priced("usd_etched")) {
            (Some(foil), _) => finishes.push(json!({"finish": "foil", "price": foil, "lang": lang})),
            (None, Some(etched)) => {
                finishes.push(json!({"finish": "etched", "price": etched, "lang": lang}))
            }
            (None, None) => {}
        }
        finishes
    }
}

#[async_trait]
impl PriceSource for ScryfallClient {
    fn source_id(&self) -> &str {
        SOURCE_ID
    }

    async fn fetch_one(
        &self,
        item: &CatalogItem,
        observed_at: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>, SourceError> {
        let card_id = match item.scryfall_id {
            Some(id) => id,
            None => return Ok(Vec::new()),
        };

        let url = format!("{}/cards/{}", self.base_url, card_id);
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?;

        let card = match read_json(response).await? {
            Some(card) => card,
            None => return Ok(Vec::new()),
        };

        Ok(Self::split_finishes(&card)
            .into_iter()
            .map(|payload| RawRecord {
                item_id: item.item_id,
                source_id: SOURCE_ID.to_string(),
                observed_at,
                payload,
            })
            .collect())
    }

    fn normalize(&self, raw: &RawRecord) -> Result<CanonicalPriceRecord, NormalizationError> {
        normalize_finish(raw)
    }

    fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::FixedDelay(REQUEST_SPACING)
    }
}

pub fn normalize_finish(raw: &RawRecord) -> Result<CanonicalPriceRecord, NormalizationError> {
    ensure_source(raw, SOURCE_ID)?;
    let p = &raw.payload;

    let finish = require(p, "finish")?.as_str().unwrap_or_default();
    let is_foil = match finish {
        "nonfoil" => false,
        "foil" | "etched" => true,
        other => {
            return Err(NormalizationError::InvalidValue {
                field: "finish",
                value: other.to_string(),
            })
        }
    };

    let mut record = base_record(raw, positive_price(p, "price")?, "USD".to_string());
    record.is_foil = is_foil;
    record.market_price = Some(record.price);
    if let Some(lang) = p.get("lang").and_then(Value::as_str) {
        record.language = parse_language(lang)?;
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Language;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn raw(payload: Value) -> RawRecord {
        RawRecord {
            item_id: 5,
            source_id: SOURCE_ID.to_string(),
            observed_at: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            payload,
        }
    }

    #[test]
    fn test_split_finishes() {
        let card = json!({
            "object": "card",
            "lang": "ja",
            "prices": {"usd": "0.25", "usd_foil": "1.10", "usd_etched": "3.00", "eur": "0.20"}
        });
        let finishes = ScryfallClient::split_finishes(&card);
        assert_eq!(finishes.len(), 2);
        assert_eq!(finishes[1]["finish"], "foil");

        let etched_only = json!({"prices": {"usd": null, "usd_foil": null, "usd_etched": "3.00"}});
        let finishes = ScryfallClient::split_finishes(&etched_only);
        assert_eq!(finishes.len(), 1);
        assert_eq!(finishes[0]["finish"], "etched");

        assert!(ScryfallClient::split_finishes(&json!({"object": "card"})).is_empty());
    }

    #[test]
    fn test_normalize_finish() {
        let card = json!({"lang": "ja", "prices": {"usd": "0.25", "usd_foil": "1.10"}});
        let finishes = ScryfallClient::split_finishes(&card);

        let nonfoil = normalize_finish(&raw(finishes[0].clone())).unwrap();
        assert_eq!(nonfoil.price, 0.25);
        assert!(!nonfoil.is_foil);
        assert_eq!(nonfoil.language, Language::Japanese);

        let foil = normalize_finish(&raw(finishes[1].clone())).unwrap();
        assert!(foil.is_foil);
        assert_ne!(foil.identity_key(), nonfoil.identity_key());
    }

    #[test]
    fn test_normalize_rejects_unknown_finish() {
        assert!(normalize_finish(&raw(json!({"finish": "gilded", "price": "1.00"}))).is_err());
    }

    #[tokio::test]
    #[ignore] // Requires network access
    async fn test_live_card() {
        let client = ScryfallClient::new().unwrap();
        let item = CatalogItem {
            scryfall_id: Uuid::parse_str("56ebc372-aabd-4174-a943-c7bf59e5028d").ok(),
            ..CatalogItem::new(1)
        };
        let records = client.fetch_one(&item, Utc::now()).await.unwrap();
        println!("Fetched {} Scryfall records", records.len());
    }
}
