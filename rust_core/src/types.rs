//! Shared pipeline types: canonical price rows, catalog items, raw source
//! payloads, and the per-source / per-cycle reports.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Internal catalog identifier of a card printing.
pub type ItemId = i64;

/// Card condition grade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Condition {
    #[serde(rename = "NM")]
    NearMint,
    #[serde(rename = "LP")]
    LightlyPlayed,
    #[serde(rename = "MP")]
    ModeratelyPlayed,
    #[serde(rename = "HP")]
    HeavilyPlayed,
    #[serde(rename = "DMG")]
    Damaged,
}

impl Condition {
    /// Storage code
    pub fn as_code(&self) -> &'static str {
        match self {
            Condition::NearMint => "NM",
            Condition::LightlyPlayed => "LP",
            Condition::ModeratelyPlayed => "MP",
            Condition::HeavilyPlayed => "HP",
            Condition::Damaged => "DMG",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "NM" => Some(Condition::NearMint),
            "LP" => Some(Condition::LightlyPlayed),
            "MP" => Some(Condition::ModeratelyPlayed),
            "HP" => Some(Condition::HeavilyPlayed),
            "DMG" => Some(Condition::Damaged),
            _ => None,
        }
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::NearMint
    }
}

/// Printed language of a card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "en")]
    English,
    #[serde(rename = "ja")]
    Japanese,
    #[serde(rename = "de")]
    German,
    #[serde(rename = "fr")]
    French,
    #[serde(rename = "it")]
    Italian,
    #[serde(rename = "es")]
    Spanish,
    #[serde(rename = "pt")]
    Portuguese,
    #[serde(rename = "ko")]
    Korean,
    #[serde(rename = "zhs")]
    ChineseSimplified,
    #[serde(rename = "zht")]
    ChineseTraditional,
    #[serde(rename = "ru")]
    Russian,
}

impl Language {
    pub fn as_code(&self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Japanese => "ja",
            Language::German => "de",
            Language::French => "fr",
            Language::Italian => "it",
            Language::Spanish => "es",
            Language::Portuguese => "pt",
            Language::Korean => "ko",
            Language::ChineseSimplified => "zhs",
            Language::ChineseTraditional => "zht",
            Language::Russian => "ru",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "en" => Some(Language::English),
            "ja" => Some(Language::Japanese),
            "de" => Some(Language::German),
            "fr" => Some(Language::French),
            "it" => Some(Language::Italian),
            "es" => Some(Language::Spanish),
            "pt" => Some(Language::Portuguese),
            "ko" => Some(Language::Korean),
            "zhs" => Some(Language::ChineseSimplified),
            "zht" => Some(Language::ChineseTraditional),
            "ru" => Some(Language::Russian),
            _ => None,
        }
    }
}

impl Default for Language {
    fn default() -> Self {
        Self::English
    }
}

/// Unique storage identity of a price row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey {
    pub observed_at: DateTime<Utc>,
    pub item_id: ItemId,
    pub source_id: String,
    pub condition: Condition,
    pub is_foil: bool,
    pub language: Language,
}

/// One normalized price observation, the only shape the store accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalPriceRecord {
    pub item_id: ItemId,
    pub source_id: String,
    /// Observation time, already truncated to the price bucket
    pub observed_at: DateTime<Utc>,
    pub price: f64,
    /// ISO 4217 code
    pub currency: String,
    pub condition: Condition,
    pub is_foil: bool,
    pub language: Language,
    pub low_price: Option<f64>,
    pub mid_price: Option<f64>,
    pub high_price: Option<f64>,
    pub market_price: Option<f64>,
    pub listing_count: Option<i32>,
}

impl CanonicalPriceRecord {
    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey {
            observed_at: self.observed_at,
            item_id: self.item_id,
            source_id: self.source_id.clone(),
            condition: self.condition,
            is_foil: self.is_foil,
            language: self.language,
        }
    }
}

/// Catalog entry handed to sources; each marketplace looks up its own id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CatalogItem {
    pub item_id: ItemId,
    pub tcgplayer_id: Option<i64>,
    pub cardmarket_id: Option<i64>,
    pub scryfall_id: Option<Uuid>,
}

impl CatalogItem {
    pub fn new(item_id: ItemId) -> Self {
        Self {
            item_id,
            ..Default::default()
        }
    }
}

/// Source payload before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub item_id: ItemId,
    pub source_id: String,
    /// Bucketed observation time assigned when the record was fetched
    pub observed_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Error classification surfaced in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Timeout or connection failure, retried with backoff
    Transient,
    /// Marketplace signalled rate limiting, retried with backoff
    RateLimited,
    /// Malformed payload, record dropped
    Normalization,
    /// Bad credentials, adapter aborted
    Auth,
    /// Bad request or configuration, adapter aborted
    Config,
    /// Canonical store write failed after retry, adapter aborted
    Store,
    /// Freshness cache unreachable, never fatal
    Cache,
    /// Adapter gave up after consecutive fetch failures
    Partial,
    /// Source deadline reached
    Timeout,
    /// Adapter task panicked
    Crashed,
}

impl ErrorKind {
    /// Kinds worth retrying at the item level
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::RateLimited)
    }

    /// Kinds that count as a hard cycle-level failure
    pub fn is_hard_failure(&self) -> bool {
        matches!(
            self,
            ErrorKind::Auth | ErrorKind::Config | ErrorKind::Store | ErrorKind::Crashed
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Transient => "TRANSIENT",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::Normalization => "NORMALIZATION",
            ErrorKind::Auth => "AUTH",
            ErrorKind::Config => "CONFIG",
            ErrorKind::Store => "STORE",
            ErrorKind::Cache => "CACHE",
            ErrorKind::Partial => "PARTIAL",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Crashed => "CRASHED",
        };
        f.write_str(s)
    }
}

/// Result of one adapter run over a catalog slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterOutcome {
    pub source_id: String,
    /// Items actually sent to the marketplace (after the cache check)
    pub attempted_count: u64,
    /// Raw records returned by the marketplace
    pub fetched_count: u64,
    /// Rows written to the canonical store
    pub inserted_count: u64,
    pub skipped_cached_count: u64,
    /// Items dropped after exhausting retries
    pub failed_count: u64,
    pub normalization_dropped: u64,
    pub error: Option<ErrorKind>,
    pub error_message: Option<String>,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

impl AdapterOutcome {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            attempted_count: 0,
            fetched_count: 0,
            inserted_count: 0,
            skipped_cached_count: 0,
            failed_count: 0,
            normalization_dropped: 0,
            error: None,
            error_message: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Outcome for a task that never reported back
    pub fn failed(source_id: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        let mut outcome = Self::new(source_id);
        outcome.error = Some(kind);
        outcome.error_message = Some(message.into());
        outcome
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregated result of one collection cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub slice_size: usize,
    pub outcomes: Vec<AdapterOutcome>,
}

impl CycleReport {
    pub fn outcome(&self, source_id: &str) -> Option<&AdapterOutcome> {
        self.outcomes.iter().find(|o| o.source_id == source_id)
    }

    pub fn total_inserted(&self) -> u64 {
        self.outcomes.iter().map(|o| o.inserted_count).sum()
    }

    pub fn total_fetched(&self) -> u64 {
        self.outcomes.iter().map(|o| o.fetched_count).sum()
    }

    pub fn total_skipped_cached(&self) -> u64 {
        self.outcomes.iter().map(|o| o.skipped_cached_count).sum()
    }

    pub fn failed_sources(&self) -> Vec<&AdapterOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success()).collect()
    }

    pub fn has_hard_failure(&self) -> bool {
        self.outcomes
            .iter()
            .filter_map(|o| o.error)
            .any(|kind| kind.is_hard_failure())
    }
}

/// Result of a one-off bulk import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkLoadReport {
    pub source_id: String,
    pub staged_count: u64,
    pub dropped_count: u64,
    pub inserted_count: u64,
}

/// Truncate a timestamp to the start of its price bucket.
pub fn bucket_timestamp(ts: DateTime<Utc>, bucket: Duration) -> DateTime<Utc> {
    let bucket_secs = bucket.as_secs() as i64;
    if bucket_secs <= 0 {
        return ts;
    }
    let secs = ts.timestamp();
    let floored = secs - secs.rem_euclid(bucket_secs);
    Utc.timestamp_opt(floored, 0).single().unwrap_or(ts)
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_timestamp_daily() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 17, 45, 12).unwrap();
        let bucketed = bucket_timestamp(ts, Duration::from_secs(86_400));
        assert_eq!(bucketed, Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_bucket_timestamp_zero_bucket_is_identity() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 17, 45, 12).unwrap();
        assert_eq!(bucket_timestamp(ts, Duration::ZERO), ts);
    }

    #[test]
    fn test_condition_codes() {
        for c in [
            Condition::NearMint,
            Condition::LightlyPlayed,
            Condition::ModeratelyPlayed,
            Condition::HeavilyPlayed,
            Condition::Damaged,
        ] {
            assert_eq!(Condition::from_code(c.as_code()), Some(c));
        }
        assert_eq!(Condition::from_code("mint"), None);
    }

    #[test]
    fn test_hard_failure_classification() {
        assert!(ErrorKind::Auth.is_hard_failure());
        assert!(ErrorKind::Store.is_hard_failure());
        assert!(!ErrorKind::Partial.is_hard_failure());
        assert!(!ErrorKind::Timeout.is_hard_failure());
        assert!(ErrorKind::RateLimited.is_transient());
    }

    #[test]
    fn test_outcome_serializes_error_kind() {
        let outcome = AdapterOutcome::failed("scryfall", ErrorKind::Timeout, "deadline");
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"TIMEOUT\""));
        assert!(json.contains("\"elapsed\":0"));
    }
}
