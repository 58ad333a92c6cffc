//! Pipeline tuning knobs, read from the environment.

use crate::adapter::AdapterConfig;
use crate::dispatcher::DispatcherConfig;
use crate::merge::DEFAULT_BATCH_SIZE;
use crate::retry::RetryPolicy;
use anyhow::{anyhow, Result};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Storage
    pub batch_size: usize,
    pub price_bucket: Duration,

    // Recency cache
    pub freshness_ttl: Duration,
    pub cache_op_timeout: Duration,

    // Dispatch
    pub source_deadline: Duration,
    pub deadline_grace: Duration,
    pub max_consecutive_failures: u32,

    // Fetch retries
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            price_bucket: Duration::from_secs(86_400),
            freshness_ttl: Duration::from_secs(7200),
            cache_op_timeout: Duration::from_millis(500),
            source_deadline: Duration::from_secs(1500),
            deadline_grace: Duration::from_secs(30),
            max_consecutive_failures: 5,
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            batch_size: parse_u64("PRICE_BATCH_SIZE", defaults.batch_size as u64)? as usize,
            price_bucket: Duration::from_secs(parse_u64(
                "PRICE_BUCKET_SECS",
                defaults.price_bucket.as_secs(),
            )?),
            freshness_ttl: Duration::from_secs(parse_u64(
                "PRICE_FRESHNESS_TTL_SECS",
                defaults.freshness_ttl.as_secs(),
            )?),
            cache_op_timeout: Duration::from_millis(parse_u64(
                "CACHE_OP_TIMEOUT_MS",
                defaults.cache_op_timeout.as_millis() as u64,
            )?),
            source_deadline: Duration::from_secs(parse_u64(
                "SOURCE_DEADLINE_SECS",
                defaults.source_deadline.as_secs(),
            )?),
            deadline_grace: Duration::from_secs(parse_u64(
                "SOURCE_DEADLINE_GRACE_SECS",
                defaults.deadline_grace.as_secs(),
            )?),
            max_consecutive_failures: parse_u32(
                "MAX_CONSECUTIVE_FAILURES",
                defaults.max_consecutive_failures,
            )?,
            retry: RetryPolicy {
                max_attempts: parse_u32("RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
                base_backoff: Duration::from_millis(parse_u64(
                    "RETRY_BASE_BACKOFF_MS",
                    defaults.retry.base_backoff.as_millis() as u64,
                )?),
                max_backoff: Duration::from_millis(parse_u64(
                    "RETRY_MAX_BACKOFF_MS",
                    defaults.retry.max_backoff.as_millis() as u64,
                )?),
                jitter: parse_f64("RETRY_JITTER", defaults.retry.jitter)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(anyhow!("PRICE_BATCH_SIZE must be > 0"));
        }
        if self.freshness_ttl.is_zero() {
            return Err(anyhow!("PRICE_FRESHNESS_TTL_SECS must be > 0"));
        }
        if self.cache_op_timeout.is_zero() {
            return Err(anyhow!("CACHE_OP_TIMEOUT_MS must be > 0"));
        }
        if self.source_deadline.is_zero() {
            return Err(anyhow!("SOURCE_DEADLINE_SECS must be > 0"));
        }
        if self.max_consecutive_failures == 0 {
            return Err(anyhow!("MAX_CONSECUTIVE_FAILURES must be > 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("RETRY_MAX_ATTEMPTS must be > 0"));
        }
        if self.retry.max_backoff < self.retry.base_backoff {
            return Err(anyhow!("RETRY_MAX_BACKOFF_MS must be >= RETRY_BASE_BACKOFF_MS"));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(anyhow!("RETRY_JITTER must be between 0 and 1"));
        }
        Ok(())
    }

    pub fn adapter_config(&self) -> AdapterConfig {
        AdapterConfig {
            price_bucket: self.price_bucket,
            max_consecutive_failures: self.max_consecutive_failures,
            retry: self.retry.clone(),
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            source_deadline: self.source_deadline,
            grace: self.deadline_grace,
        }
    }
}

/// Parse environment variable as f64 with default fallback
pub fn parse_f64(var_name: &str, default: f64) -> Result<f64> {
    match env::var(var_name) {
        Ok(val) => val.parse().map_err(|_| anyhow!("{} must be a valid f64", var_name)),
        Err(_) => Ok(default),
    }
}

/// Parse environment variable as u32 with default fallback
pub fn parse_u32(var_name: &str, default: u32) -> Result<u32> {
    match env::var(var_name) {
        Ok(val) => val.parse().map_err(|_| anyhow!("{} must be a valid u32", var_name)),
        Err(_) => Ok(default),
    }
}

/// Parse environment variable as u64 with default fallback
pub fn parse_u64(var_name: &str, default: u64) -> Result<u64> {
    match env::var(var_name) {
        Ok(val) => val.parse().map_err(|_| anyhow!("{} must be a valid u64", var_name)),
        Err(_) => Ok(default),
    }
}
