//! TCGplayer pricing API.
//!
//! OAuth client-credentials: the bearer token is cached in-process and
//! refreshed when it is about to expire or when the API answers 401.
//! One raw record per printing subtype (Normal, Foil, ...).

use super::{http_client, read_json, status_error};
use crate::error::{NormalizationError, SourceError};
use crate::normalize::{base_record, ensure_source, optional_price, positive_price};
use crate::rate_limit::RateLimitPolicy;
use crate::source::PriceSource;
use crate::types::{CanonicalPriceRecord, CatalogItem, RawRecord};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const SOURCE_ID: &str = "tcgplayer";
const DEFAULT_BASE_URL: &str = "https://api.tcgplayer.com";

/// Refresh this long before the advertised expiry
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct BearerToken {
    value: String,
    expires_at: DateTime<Utc>,
}

pub struct TcgplayerClient {
    client: Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<BearerToken>>,
}

impl TcgplayerClient {
    pub fn new(client_id: String, client_secret: String) -> Result<Self> {
        Self::with_base_url(client_id, client_secret, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(client_id: String, client_secret: String, base_url: String) -> Result<Self> {
        Ok(Self {
            client: http_client(Duration::from_secs(30))?,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id,
            client_secret,
            token: Mutex::new(None),
        })
    }

    /// Current bearer token, fetching a new one if missing or near expiry
    async fn bearer(&self) -> Result<String, SourceError> {
        let mut token = self.token.lock().await;
        if let Some(t) = token.as_ref() {
            if t.expires_at > Utc::now() {
                return Ok(t.value.clone());
            }
        }

        let fresh = self.request_token().await?;
        let value = fresh.value.clone();
        *token = Some(fresh);
        Ok(value)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    async fn request_token(&self) -> Result<BearerToken, SourceError> {
        let url = format!("{}/token", self.base_url);
        let response = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            // bad credentials come back as 400 from the token endpoint
            return Err(match status_error(status, None, &detail) {
                SourceError::Config(msg) => SourceError::Auth(msg),
                other => other,
            });
        }

        let body: TokenResponse = response.json().await?;
        let lifetime = (body.expires_in - TOKEN_EXPIRY_MARGIN_SECS).max(0);
        info!("TCGplayer token refreshed, valid for {}s", lifetime);
        Ok(BearerToken {
            value: body.access_token,
            expires_at: Utc::now() + ChronoDuration::seconds(lifetime),
        })
    }

    async fn get_pricing(&self, product_id: i64) -> Result<Option<Value>, SourceError> {
        let url = format!("{}/pricing/product/{}", self.base_url, product_id);

        let mut refreshed = false;
        loop {
            let token = self.bearer().await?;
            let response = self.client.get(&url).bearer_auth(&token).send().await?;

            if response.status() == StatusCode::UNAUTHORIZED && !refreshed {
                debug!("TCGplayer rejected token, refreshing once");
                self.invalidate_token().await;
                refreshed = true;
                continue;
            }
            return read_json(response).await;
        }
    }

    /// Split a pricing response into at most one payload per finish.
    ///
    /// Every foil-like subtype (Foil, Reverse Holofoil, Etched Foil, ...)
    /// shares the foil identity key, so only one of them is kept: the exact
    /// "Foil" subtype when it carries a price, otherwise the first priced
    /// variant. Non-foil subtypes are picked the same way around "Normal".
    pub fn split_results(body: &Value) -> Vec<Value> {
        let results = match body.get("results").and_then(Value::as_array) {
            Some(results) => results,
            None => return Vec::new(),
        };

        let mut picked = Vec::with_capacity(2);
        for (foil, canonical) in [(false, "Normal"), (true, "Foil")] {
            let candidates: Vec<&Value> = results
                .iter()
                .filter(|r| is_foil_subtype(subtype_of(r)) == foil)
                .collect();
            let choice = candidates
                .iter()
                .find(|r| subtype_of(r).eq_ignore_ascii_case(canonical) && has_price(r))
                .or_else(|| candidates.iter().find(|r| has_price(r)))
                .or_else(|| candidates.first());
            if let Some(choice) = choice {
                picked.push((*choice).clone());
            }
        }
        picked
    }
}

fn subtype_of(result: &Value) -> &str {
    result.get("subTypeName").and_then(Value::as_str).unwrap_or("")
}

fn is_foil_subtype(subtype: &str) -> bool {
    subtype.to_lowercase().contains("foil")
}

fn has_price(result: &Value) -> bool {
    ["marketPrice", "midPrice", "lowPrice"]
        .iter()
        .any(|field| result.get(*field).map(|v| !v.is_null()).unwrap_or(false))
}

#[async_trait]
impl PriceSource for TcgplayerClient {
    fn source_id(&self) -> &str {
        SOURCE_ID
    }

    async fn fetch_one(
        &self,
        item: &CatalogItem,
        observed_at: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>, SourceError> {
        let product_id = match item.tcgplayer_id {
            Some(id) => id,
            None => return Ok(Vec::new()),
        };

        let body = match self.get_pricing(product_id).await? {
            Some(body) => body,
            None => return Ok(Vec::new()),
        };

        Ok(Self::split_results(&body)
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
        normalize_result(raw)
    }

    fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::per_second(10)
    }
}

/// TCGplayer product pricing is near-mint English; the headline price is the
/// market price, falling back to mid then low.
pub fn normalize_result(raw: &RawRecord) -> Result<CanonicalPriceRecord, NormalizationError> {
    ensure_source(raw, SOURCE_ID)?;
    let p = &raw.payload;

    let market = optional_price(p, "marketPrice")?;
    let mid = optional_price(p, "midPrice")?;
    let low = optional_price(p, "lowPrice")?;
    let high = optional_price(p, "highPrice")?;

    let price = match (market, mid, low) {
        (Some(_), _, _) => positive_price(p, "marketPrice")?,
        (None, Some(_), _) => positive_price(p, "midPrice")?,
        (None, None, Some(_)) => positive_price(p, "lowPrice")?,
        (None, None, None) => return Err(NormalizationError::MissingField("marketPrice")),
    };

    let subtype = p
        .get("subTypeName")
        .and_then(Value::as_str)
        .ok_or(NormalizationError::MissingField("subTypeName"))?;

    let mut record = base_record(raw, price, "USD".to_string());
    record.is_foil = is_foil_subtype(subtype);
    record.low_price = low;
    record.mid_price = mid;
    record.high_price = high;
    record.market_price = market;
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
            item_id: 42,
            source_id: SOURCE_ID.to_string(),
            observed_at: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            payload,
        }
    }

    fn pricing_body() -> Value {
        json!({
            "success": true,
            "errors": [],
            "results": [
                {"productId": 1001, "lowPrice": 0.45, "midPrice": 0.80, "highPrice": 4.99,
                 "marketPrice": 0.62, "directLowPrice": null, "subTypeName": "Normal"},
                {"productId": 1001, "lowPrice": 2.10, "midPrice": 3.00, "highPrice": 9.99,
                 "marketPrice": null, "directLowPrice": null, "subTypeName": "Foil"},
                {"productId": 1001, "lowPrice": null, "midPrice": null, "highPrice": null,
                 "marketPrice": null, "directLowPrice": null, "subTypeName": "Reverse Holofoil"}
            ]
        })
    }

    #[test]
    fn test_split_results_one_per_finish() {
        let results = TcgplayerClient::split_results(&pricing_body());
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["subTypeName"], "Normal");
        assert_eq!(results[1]["subTypeName"], "Foil");
        assert!(TcgplayerClient::split_results(&json!({"success": false})).is_empty());
    }

    #[test]
    fn test_foil_variants_do_not_overwrite_foil() {
        let body = json!({"results": [
            {"subTypeName": "Reverse Holofoil", "marketPrice": 9.00},
            {"subTypeName": "Foil", "marketPrice": 3.00},
            {"subTypeName": "Etched Foil", "marketPrice": 7.50}
        ]});
        let results = TcgplayerClient::split_results(&body);
        assert_eq!(results.len(), 1);
        assert_eq!(normalize_result(&raw(results[0].clone())).unwrap().price, 3.00);

        // without a priced plain Foil the first priced variant stands in
        let body = json!({"results": [
            {"subTypeName": "Foil", "marketPrice": null},
            {"subTypeName": "Etched Foil", "marketPrice": 7.50},
            {"subTypeName": "Reverse Holofoil", "marketPrice": 9.00}
        ]});
        let results = TcgplayerClient::split_results(&body);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["subTypeName"], "Etched Foil");
    }

    #[test]
    fn test_normalize_normal_and_foil() {
        let results = TcgplayerClient::split_results(&pricing_body());

        let normal = normalize_result(&raw(results[0].clone())).unwrap();
        assert_eq!(normal.price, 0.62);
        assert!(!normal.is_foil);
        assert_eq!(normal.currency, "USD");
        assert_eq!(normal.condition, Condition::NearMint);
        assert_eq!(normal.language, Language::English);
        assert_eq!(normal.low_price, Some(0.45));

        let foil = normalize_result(&raw(results[1].clone())).unwrap();
        assert_eq!(foil.price, 3.00);
        assert!(foil.is_foil);
        assert_eq!(foil.market_price, None);
    }

    #[test]
    fn test_normalize_drops_unpriced_subtype() {
        let unpriced = json!({"subTypeName": "Reverse Holofoil", "lowPrice": null,
                              "midPrice": null, "marketPrice": null});
        assert_eq!(
            normalize_result(&raw(unpriced)),
            Err(NormalizationError::MissingField("marketPrice"))
        );
    }

    #[tokio::test]
    async fn test_item_without_product_id_is_not_found() {
        let client = TcgplayerClient::new("id".into(), "secret".into()).unwrap();
        let records = client
            .fetch_one(&CatalogItem::new(1), Utc::now())
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    #[ignore] // Requires TCGPLAYER_CLIENT_ID / TCGPLAYER_CLIENT_SECRET and network access
    async fn test_live_pricing() {
        let client = TcgplayerClient::new(
            std::env::var("TCGPLAYER_CLIENT_ID").unwrap(),
            std::env::var("TCGPLAYER_CLIENT_SECRET").unwrap(),
        )
        .unwrap();
        let item = CatalogItem {
            tcgplayer_id: Some(1001),
            ..CatalogItem::new(1)
        };
        let records = client.fetch_one(&item, Utc::now()).await.unwrap();
        println!("Fetched {} TCGplayer records", records.len());
    }
}
