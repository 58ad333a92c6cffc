//! Cardmarket price guide API.
//!
//! Requests are signed: `X-Signature = base64(HMAC-SHA256(secret, timestamp + path))`.
//! Prices are EUR and broken down per language, condition and finish.

use super::{http_client, read_json};
use crate::error::{NormalizationError, SourceError};
use crate::normalize::{
    base_record, ensure_source, optional_count, optional_price, parse_condition, parse_language,
    positive_price, require,
};
use crate::rate_limit::RateLimitPolicy;
use crate::source::PriceSource;
use crate::types::{CanonicalPriceRecord, CatalogItem, RawRecord};
use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;
use tracing::debug;

pub const SOURCE_ID: &str = "cardmarket";
const DEFAULT_BASE_URL: &str = "https://api.cardmarket.com/ws/v2.0";

type HmacSha256 = Hmac<Sha256>;

pub struct CardmarketClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl CardmarketClient {
    pub fn new(api_key: String, api_secret: String) -> Result<Self> {
        Self::with_base_url(api_key, api_secret, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, api_secret: String, base_url: String) -> Result<Self> {
        Ok(Self {
            client: http_client(Duration::from_secs(30))?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            api_secret,
        })
    }

    /// Signature over `timestamp + path`
    pub fn sign(secret: &str, timestamp: i64, path: &str) -> Result<String, SourceError> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| SourceError::Config(format!("invalid Cardmarket secret: {}", e)))?;
        mac.update(format!("{}{}", timestamp, path).as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    async fn signed_get(&self, path: &str) -> Result<Option<Value>, SourceError> {
        let timestamp = Utc::now().timestamp();
        let signature = Self::sign(&self.api_secret, timestamp, path)?;
        let url = format!("{}{}", self.base_url, path);
        debug!("Cardmarket GET {}", path);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .header("X-Api-Key", &self.api_key)
            .header("X-Timestamp", timestamp.to_string())
            .header("X-Signature", signature)
            .send()
            .await?;

        read_json(response).await
    }

    /// One payload per (language, condition, finish) entry
    pub fn split_prices(body: &Value) -> Vec<Value> {
        body.get("prices")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl PriceSource for CardmarketClient {
    fn source_id(&self) -> &str {
        SOURCE_ID
    }

    async fn fetch_one(
        &self,
        item: &CatalogItem,
        observed_at: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>, SourceError> {
        let product_id = match item.cardmarket_id {
            Some(id) => id,
            None => return Ok(Vec::new()),
        };

        let path = format!("/products/{}/prices", product_id);
        let body = match self.signed_get(&path).await? {
            Some(body) => body,
            None => return Ok(Vec::new()),
        };

        Ok(Self::split_prices(&body)
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
        normalize_entry(raw)
    }

    fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::per_second(5)
    }
}

pub fn normalize_entry(raw: &RawRecord) -> Result<CanonicalPriceRecord, NormalizationError> {
    ensure_source(raw, SOURCE_ID)?;
    let p = &raw.payload;

    let language = require(p, "language")?
        .as_str()
        .ok_or_else(|| NormalizationError::InvalidValue {
            field: "language",
            value: p["language"].to_string(),
        })?;
    let condition = require(p, "condition")?
        .as_str()
        .ok_or_else(|| NormalizationError::InvalidValue {
            field: "condition",
            value: p["condition"].to_string(),
        })?;

    let mut record = base_record(raw, positive_price(p, "price")?, "EUR".to_string());
    record.language = parse_language(language)?;
    record.condition = parse_condition(condition)?;
    record.is_foil = p.get("isFoil").and_then(Value::as_bool).unwrap_or(false);
    record.low_price = optional_price(p, "low")?;
    record.market_price = optional_price(p, "trend")?;
    record.listing_count = optional_count(p, "count")?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Condition, Language};
    use chrono::TimeZone;
    use serde_json::json;

    fn raw(payload: Value) -> RawRecord {
        RawRecord {
            item_id: 7,
            source_id: SOURCE_ID.to_string(),
            observed_at: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            payload,
        }
    }

    #[test]
    fn test_signature_is_deterministic() {
        let a = CardmarketClient::sign("secret", 1_700_000_000, "/products/1/prices").unwrap();
        let b = CardmarketClient::sign("secret", 1_700_000_000, "/products/1/prices").unwrap();
        let c = CardmarketClient::sign("secret", 1_700_000_001, "/products/1/prices").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        // 32-byte digest, base64 with padding
        assert_eq!(a.len(), 44);
        assert_eq!(BASE64.decode(&a).unwrap().len(), 32);
    }

    #[test]
    fn test_normalize_entries() {
        let body = json!({
            "idProduct": 265535,
            "prices": [
                {"language": "German", "condition": "NM", "isFoil": false,
                 "price": "1.95", "low": 1.20, "trend": 1.87, "count": 38},
                {"language": "English", "condition": "EX", "isFoil": true,
                 "price": 7.5, "low": null, "trend": null, "count": 2},
                {"language": "English", "condition": "NM", "isFoil": false, "price": null}
            ]
        });
        let entries = CardmarketClient::split_prices(&body);
        assert_eq!(entries.len(), 3);

        let de = normalize_entry(&raw(entries[0].clone())).unwrap();
        assert_eq!(de.currency, "EUR");
        assert_eq!(de.price, 1.95);
        assert_eq!(de.language, Language::German);
        assert_eq!(de.market_price, Some(1.87));
        assert_eq!(de.listing_count, Some(38));

        let foil = normalize_entry(&raw(entries[1].clone())).unwrap();
        assert!(foil.is_foil);
        assert_eq!(foil.condition, Condition::LightlyPlayed);

        assert_eq!(
            normalize_entry(&raw(entries[2].clone())),
            Err(NormalizationError::MissingField("price"))
        );
    }

    #[test]
    fn test_normalize_requires_language() {
        assert_eq!(
            normalize_entry(&raw(json!({"condition": "NM", "price": 1.0}))),
            Err(NormalizationError::MissingField("language"))
        );
    }

    #[tokio::test]
    #[ignore] // Requires CARDMARKET_API_KEY / CARDMARKET_API_SECRET and network access
    async fn test_live_prices() {
        let client = CardmarketClient::new(
            std::env::var("CARDMARKET_API_KEY").unwrap(),
            std::env::var("CARDMARKET_API_SECRET").unwrap(),
        )
        .unwrap();
        let item = CatalogItem {
            cardmarket_id: Some(265535),
            ..CatalogItem::new(1)
        };
        let records = client.fetch_one(&item, Utc::now()).await.unwrap();
        println!("Fetched {} Cardmarket records", records.len());
    }
}
