//! Builds marketplace clients from configuration.

use crate::config::CollectorConfig;
use anyhow::{anyhow, Result};
use pricefeed_rust_core::clients::{CardmarketClient, ScryfallClient, TcgplayerClient};
use pricefeed_rust_core::{AdapterOutcome, ErrorKind, PriceSource};
use std::sync::Arc;
use tracing::error;

/// Build one source by id. Fails when its credentials are missing.
pub fn build_source(id: &str, config: &CollectorConfig) -> Result<Arc<dyn PriceSource>> {
    let source: Arc<dyn PriceSource> = match id {
        "tcgplayer" => {
            let (client_id, secret) = config
                .tcgplayer_client_id
                .clone()
                .zip(config.tcgplayer_client_secret.clone())
                .ok_or_else(|| anyhow!("tcgplayer needs TCGPLAYER_CLIENT_ID and TCGPLAYER_CLIENT_SECRET"))?;
            Arc::new(TcgplayerClient::new(client_id, secret)?)
        }
        "cardmarket" => {
            let (key, secret) = config
                .cardmarket_api_key
                .clone()
                .zip(config.cardmarket_api_secret.clone())
                .ok_or_else(|| anyhow!("cardmarket needs CARDMARKET_API_KEY and CARDMARKET_API_SECRET"))?;
            Arc::new(CardmarketClient::new(key, secret)?)
        }
        "scryfall" => Arc::new(ScryfallClient::new()?),
        other => return Err(anyhow!("Unknown source '{}'", other)),
    };
    Ok(source)
}

/// Enabled sources split into the ones that could be built and the ones
/// that could not.
pub struct EnabledSources {
    pub sources: Vec<Arc<dyn PriceSource>>,
    /// One `CONFIG` outcome per enabled source that could not be built
    pub unavailable: Vec<AdapterOutcome>,
}

/// Build every enabled source. A misconfigured source does not stop the
/// others, but it is reported as a `CONFIG` failure so the cycle still fails.
pub fn build_enabled_sources(config: &CollectorConfig) -> EnabledSources {
    let mut enabled = EnabledSources {
        sources: Vec::new(),
        unavailable: Vec::new(),
    };
    for id in &config.enabled_sources {
        match build_source(id, config) {
            Ok(source) => enabled.sources.push(source),
            Err(e) => {
                error!("Source {} is enabled but unusable: {:#}", id, e);
                enabled
                    .unavailable
                    .push(AdapterOutcome::failed(id.as_str(), ErrorKind::Config, format!("{:#}", e)));
            }
        }
    }
    enabled
}
