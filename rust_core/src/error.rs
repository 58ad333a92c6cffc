//! Error types for the ingestion pipeline.
//!
//! Each error maps onto an [`ErrorKind`] so adapters can decide between
//! retrying, dropping a single record, or aborting the whole run.

use crate::types::ErrorKind;
use std::time::Duration;
use thiserror::Error;

/// Failure while fetching from a marketplace
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SourceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SourceError::Transient(_) => ErrorKind::Transient,
            SourceError::RateLimited { .. } => ErrorKind::RateLimited,
            SourceError::Auth(_) => ErrorKind::Auth,
            SourceError::Config(_) => ErrorKind::Config,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.kind().is_transient()
    }

    /// Server supplied wait hint, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SourceError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            SourceError::Config(e.to_string())
        } else {
            // timeouts, connects, bodies and decodes are all worth another try
            SourceError::Transient(e.to_string())
        }
    }
}

/// Raw payload could not be turned into a canonical record
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizationError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("non-positive price: {0}")]
    NonPositivePrice(f64),

    #[error("payload belongs to source {found}, expected {expected}")]
    WrongSource { expected: String, found: String },
}

/// Canonical store failure
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid staging table name: {0}")]
    InvalidStagingName(String),

    #[error("staging table not found: {0}")]
    StagingNotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Freshness cache failure; never fatal to a cycle
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("cache unreachable: {0}")]
    Unreachable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_error_kinds() {
        assert_eq!(SourceError::Transient("x".into()).kind(), ErrorKind::Transient);
        assert_eq!(SourceError::Auth("x".into()).kind(), ErrorKind::Auth);
        assert!(SourceError::RateLimited { retry_after: None }.is_retriable());
        assert!(!SourceError::Config("bad".into()).is_retriable());
    }

    #[test]
    fn test_retry_after_hint() {
        let err = SourceError::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(SourceError::Transient("x".into()).retry_after(), None);
    }
}
