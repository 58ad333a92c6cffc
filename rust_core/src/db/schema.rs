//! Idempotent DDL for the canonical price table and the catalog.

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::info;

pub const PRICE_TABLE: &str = "card_prices";

/// Identity key columns, in primary key order
pub const KEY_COLUMNS: &str = "observed_at, item_id, source_id, condition, is_foil, language";

/// Every column written by the pipeline
pub const PRICE_COLUMNS: &str = "observed_at, item_id, source_id, condition, is_foil, language, \
    price, currency, low_price, mid_price, high_price, market_price, listing_count";

/// Assignments applied on conflict: price-bearing fields only, never the key
pub const PRICE_UPDATE_SET: &str = "price = EXCLUDED.price, \
    currency = EXCLUDED.currency, \
    low_price = EXCLUDED.low_price, \
    mid_price = EXCLUDED.mid_price, \
    high_price = EXCLUDED.high_price, \
    market_price = EXCLUDED.market_price, \
    listing_count = EXCLUDED.listing_count, \
    updated_at = NOW()";

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS card_prices (
        observed_at   TIMESTAMPTZ      NOT NULL,
        item_id       BIGINT           NOT NULL,
        source_id     TEXT             NOT NULL,
        condition     TEXT             NOT NULL,
        is_foil       BOOLEAN          NOT NULL,
        language      TEXT             NOT NULL,
        price         DOUBLE PRECISION NOT NULL,
        currency      TEXT             NOT NULL,
        low_price     DOUBLE PRECISION,
        mid_price     DOUBLE PRECISION,
        high_price    DOUBLE PRECISION,
        market_price  DOUBLE PRECISION,
        listing_count INTEGER,
        updated_at    TIMESTAMPTZ      NOT NULL DEFAULT NOW(),
        PRIMARY KEY (observed_at, item_id, source_id, condition, is_foil, language)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_card_prices_item_source
        ON card_prices (item_id, source_id, observed_at DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS catalog_items (
        item_id        BIGINT  PRIMARY KEY,
        tcgplayer_id   BIGINT,
        cardmarket_id  BIGINT,
        scryfall_id    UUID,
        price_tracking BOOLEAN NOT NULL DEFAULT TRUE
    )
    "#,
];

/// Create tables and indexes if missing
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for statement in STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("Failed to apply price schema")?;
    }
    info!("Price schema ready ({} statements)", STATEMENTS.len());
    Ok(())
}
