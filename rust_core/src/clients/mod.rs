//! Marketplace clients, each one a [`PriceSource`](crate::source::PriceSource).
//!
//! All three speak JSON over HTTPS and share one status-code mapping.

pub mod cardmarket;
pub mod scryfall;
pub mod tcgplayer;

pub use cardmarket::CardmarketClient;
pub use scryfall::ScryfallClient;
pub use tcgplayer::TcgplayerClient;

use crate::error::SourceError;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;

pub(crate) const USER_AGENT: &str = "pricefeed/0.1";

/// Shared HTTP client settings
pub(crate) fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .user_agent(USER_AGENT)
        .build()
        .context("Failed to create HTTP client")
}

/// Map a non-success status onto the pipeline's error taxonomy.
/// 404 is handled by the caller as "no listing".
pub fn status_error(status: StatusCode, retry_after: Option<Duration>, detail: &str) -> SourceError {
    let message = format!("HTTP {}: {}", status.as_u16(), detail);
    match status.as_u16() {
        401 | 403 => SourceError::Auth(message),
        429 => SourceError::RateLimited { retry_after },
        408 => SourceError::Transient(message),
        400..=499 => SourceError::Config(message),
        _ => SourceError::Transient(message),
    }
}

/// `Retry-After` as delta-seconds or an HTTP date
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|at| (at.with_timezone(&Utc) - now).to_std().unwrap_or(Duration::ZERO))
}

fn retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_retry_after(v, Utc::now()))
}

/// Decode a JSON body; `None` when the marketplace answered 404
pub(crate) async fn read_json(response: Response) -> Result<Option<Value>, SourceError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !status.is_success() {
        let retry_after = retry_after_header(response.headers());
        let body = response.text().await.unwrap_or_default();
        let detail: String = body.chars().take(200).collect();
        return Err(status_error(status, retry_after, &detail));
    }
    let body: Value = response.json().await?;
    Ok(Some(body))
}
