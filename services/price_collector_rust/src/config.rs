//! Configuration for price_collector_rust

use anyhow::{anyhow, Result};
use pricefeed_rust_core::PipelineConfig;
use std::env;

pub const ALL_SOURCES: &[&str] = &["tcgplayer", "cardmarket", "scryfall"];

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    // Storage
    pub database_url: String,
    pub redis_url: String,

    // Catalog
    pub catalog_slice_limit: Option<i64>,
    pub enabled_sources: Vec<String>,

    // Marketplace credentials
    pub tcgplayer_client_id: Option<String>,
    pub tcgplayer_client_secret: Option<String>,
    pub cardmarket_api_key: Option<String>,
    pub cardmarket_api_secret: Option<String>,

    pub pipeline: PipelineConfig,
}

impl CollectorConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").map_err(|_| anyhow!("DATABASE_URL must be set"))?;

        let catalog_slice_limit = match env::var("CATALOG_SLICE_LIMIT") {
            Ok(val) => {
                let limit: i64 = val
                    .parse()
                    .map_err(|_| anyhow!("CATALOG_SLICE_LIMIT must be a valid i64"))?;
                if limit <= 0 {
                    return Err(anyhow!("CATALOG_SLICE_LIMIT must be > 0"));
                }
                Some(limit)
            }
            Err(_) => None,
        };

        let enabled_sources = parse_sources(
            &env::var("ENABLED_SOURCES").unwrap_or_else(|_| ALL_SOURCES.join(",")),
        )?;

        Ok(Self {
            database_url,
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            catalog_slice_limit,
            enabled_sources,
            tcgplayer_client_id: non_empty_var("TCGPLAYER_CLIENT_ID"),
            tcgplayer_client_secret: non_empty_var("TCGPLAYER_CLIENT_SECRET"),
            cardmarket_api_key: non_empty_var("CARDMARKET_API_KEY"),
            cardmarket_api_secret: non_empty_var("CARDMARKET_API_SECRET"),
            pipeline: PipelineConfig::from_env()?,
        })
    }
}

/// Comma separated source ids; unknown ids are rejected, duplicates collapse
pub fn parse_sources(raw: &str) -> Result<Vec<String>> {
    let mut sources: Vec<String> = Vec::new();
    for id in raw.split(',').map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty()) {
        if !ALL_SOURCES.contains(&id.as_str()) {
            return Err(anyhow!(
                "ENABLED_SOURCES contains unknown source '{}' (known: {})",
                id,
                ALL_SOURCES.join(", ")
            ));
        }
        if !sources.contains(&id) {
            sources.push(id);
        }
    }
    if sources.is_empty() {
        return Err(anyhow!("ENABLED_SOURCES must name at least one source"));
    }
    Ok(sources)
}

fn non_empty_var(var_name: &str) -> Option<String> {
    env::var(var_name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sources() {
        assert_eq!(
            parse_sources("scryfall, TCGplayer,scryfall").unwrap(),
            vec!["scryfall".to_string(), "tcgplayer".to_string()]
        );
        assert!(parse_sources("scryfall,ebay").is_err());
        assert!(parse_sources(" , ").is_err());
    }

    #[test]
    fn test_missing_credentials_read_as_none() {
        assert_eq!(non_empty_var("NON_EXISTENT_COLLECTOR_VAR_XYZ"), None);
    }
}
