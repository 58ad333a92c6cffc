//! Marketplace clients against a local mock HTTP server.

use chrono::Utc;
use pricefeed_rust_core::clients::{CardmarketClient, ScryfallClient, TcgplayerClient};
use pricefeed_rust_core::{CatalogItem, PriceSource, SourceError};
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, header, header_exists, method, path};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

const CARD_ID: &str = "56ebc372-aabd-4174-a943-c7bf59e5028d";

fn scryfall_item() -> CatalogItem {
    CatalogItem {
        scryfall_id: Uuid::parse_str(CARD_ID).ok(),
        ..CatalogItem::new(1)
    }
}

fn tcgplayer_item() -> CatalogItem {
    CatalogItem {
        tcgplayer_id: Some(1001),
        ..CatalogItem::new(2)
    }
}

fn cardmarket_item() -> CatalogItem {
    CatalogItem {
        cardmarket_id: Some(265535),
        ..CatalogItem::new(3)
    }
}

fn token_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": "tok-1",
        "token_type": "bearer",
        "expires_in": 1209599
    }))
}

fn pricing_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "success": true,
        "results": [
            {"productId": 1001, "marketPrice": 0.62, "lowPrice": 0.45, "subTypeName": "Normal"},
            {"productId": 1001, "marketPrice": 3.10, "lowPrice": 2.10, "subTypeName": "Foil"}
        ]
    }))
}

// ============================================================================
// Scryfall: status mapping shared by every client
// ============================================================================

#[tokio::test]
async fn test_scryfall_card_split_per_finish() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/cards/{}", CARD_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "card",
            "lang": "en",
            "prices": {"usd": "0.25", "usd_foil": "1.10", "usd_etched": null}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = ScryfallClient::with_base_url(server.uri()).unwrap();
    let records = client.fetch_one(&scryfall_item(), Utc::now()).await.unwrap();

    assert_eq!(records.len(), 2);
    let prices: Vec<f64> = records
        .iter()
        .map(|r| client.normalize(r).unwrap().price)
        .collect();
    assert_eq!(prices, vec![0.25, 1.10]);
}

#[tokio::test]
async fn test_not_found_is_an_empty_result() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"object": "error"})))
        .mount(&server)
        .await;

    let client = ScryfallClient::with_base_url(server.uri()).unwrap();
    let records = client.fetch_one(&scryfall_item(), Utc::now()).await.unwrap();

    assert!(records.is_empty());
}

#[tokio::test]
async fn test_rate_limited_carries_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .mount(&server)
        .await;

    let client = ScryfallClient::with_base_url(server.uri()).unwrap();
    let err = client.fetch_one(&scryfall_item(), Utc::now()).await.unwrap_err();

    match err {
        SourceError::RateLimited { retry_after } => {
            assert_eq!(retry_after, Some(Duration::from_secs(7)))
        }
        other => panic!("expected RateLimited, got {:?}", other),
    }
}

#[tokio::test]
async fn test_server_and_client_errors_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad card id"))
        .mount(&server)
        .await;

    let client = ScryfallClient::with_base_url(server.uri()).unwrap();

    let first = client.fetch_one(&scryfall_item(), Utc::now()).await.unwrap_err();
    assert!(matches!(first, SourceError::Transient(_)), "got {:?}", first);

    let second = client.fetch_one(&scryfall_item(), Utc::now()).await.unwrap_err();
    assert!(matches!(second, SourceError::Config(_)), "got {:?}", second);
}

// ============================================================================
// TCGplayer: bearer token lifecycle
// ============================================================================

#[tokio::test]
async fn test_tcgplayer_token_is_cached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(token_response())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pricing/product/1001"))
        .and(header("Authorization", "Bearer tok-1"))
        .respond_with(pricing_response())
        .expect(2)
        .mount(&server)
        .await;

    let client = TcgplayerClient::with_base_url("id".into(), "secret".into(), server.uri()).unwrap();
    for _ in 0..2 {
        let records = client.fetch_one(&tcgplayer_item(), Utc::now()).await.unwrap();
        assert_eq!(records.len(), 2);
    }
}

#[tokio::test]
async fn test_tcgplayer_refreshes_token_once_on_401() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(token_response())
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pricing/product/1001"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pricing/product/1001"))
        .respond_with(pricing_response())
        .mount(&server)
        .await;

    let client = TcgplayerClient::with_base_url("id".into(), "secret".into(), server.uri()).unwrap();
    let records = client.fetch_one(&tcgplayer_item(), Utc::now()).await.unwrap();

    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn test_tcgplayer_repeated_401_is_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(token_response())
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pricing/product/1001"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let client = TcgplayerClient::with_base_url("id".into(), "secret".into(), server.uri()).unwrap();
    let err = client.fetch_one(&tcgplayer_item(), Utc::now()).await.unwrap_err();

    assert!(matches!(err, SourceError::Auth(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_tcgplayer_rejected_credentials_are_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_client"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(pricing_response())
        .expect(0)
        .mount(&server)
        .await;

    let client = TcgplayerClient::with_base_url("id".into(), "wrong".into(), server.uri()).unwrap();
    let err = client.fetch_one(&tcgplayer_item(), Utc::now()).await.unwrap_err();

    assert!(matches!(err, SourceError::Auth(_)), "got {:?}", err);
    assert!(!err.is_retriable());
}

// ============================================================================
// Cardmarket: signed requests
// ============================================================================

/// Matches requests whose `X-Signature` is valid for their own timestamp and path
struct ValidSignature {
    secret: &'static str,
}

impl Match for ValidSignature {
    fn matches(&self, request: &Request) -> bool {
        let header_str = |name: &str| {
            request
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let (timestamp, signature) = match (header_str("X-Timestamp"), header_str("X-Signature")) {
            (Some(t), Some(s)) => (t, s),
            _ => return false,
        };
        let timestamp: i64 = match timestamp.parse() {
            Ok(t) => t,
            Err(_) => return false,
        };
        CardmarketClient::sign(self.secret, timestamp, request.url.path())
            .map(|expected| expected == signature)
            .unwrap_or(false)
    }
}

#[tokio::test]
async fn test_cardmarket_requests_are_signed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products/265535/prices"))
        .and(header("X-Api-Key", "key-1"))
        .and(header_exists("X-Timestamp"))
        .and(ValidSignature { secret: "secret-1" })
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "idProduct": 265535,
            "prices": [
                {"language": "German", "condition": "NM", "isFoil": false, "price": "1.95", "trend": 1.87},
                {"language": "English", "condition": "NM", "isFoil": true, "price": 7.5}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client =
        CardmarketClient::with_base_url("key-1".into(), "secret-1".into(), server.uri()).unwrap();
    let records = client.fetch_one(&cardmarket_item(), Utc::now()).await.unwrap();

    assert_eq!(records.len(), 2);
    let first = client.normalize(&records[0]).unwrap();
    assert_eq!(first.currency, "EUR");
    assert_eq!(first.price, 1.95);
}

#[tokio::test]
async fn test_cardmarket_wrong_secret_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(ValidSignature { secret: "secret-1" })
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"prices": []})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client =
        CardmarketClient::with_base_url("key-1".into(), "other".into(), server.uri()).unwrap();
    let err = client.fetch_one(&cardmarket_item(), Utc::now()).await.unwrap_err();

    assert!(matches!(err, SourceError::Auth(_)), "got {:?}", err);
}
