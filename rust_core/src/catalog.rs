//! Catalog slice provider.

use crate::types::CatalogItem;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Items whose prices are tracked, lowest id first, at most `limit`
    async fn eligible_items(&self, limit: Option<i64>) -> Result<Vec<CatalogItem>>;
}

#[derive(FromRow)]
struct CatalogRow {
    item_id: i64,
    tcgplayer_id: Option<i64>,
    cardmarket_id: Option<i64>,
    scryfall_id: Option<Uuid>,
}

impl From<CatalogRow> for CatalogItem {
    fn from(row: CatalogRow) -> Self {
        Self {
            item_id: row.item_id,
            tcgplayer_id: row.tcgplayer_id,
            cardmarket_id: row.cardmarket_id,
            scryfall_id: row.scryfall_id,
        }
    }
}

pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogSource for PgCatalog {
    async fn eligible_items(&self, limit: Option<i64>) -> Result<Vec<CatalogItem>> {
        let rows: Vec<CatalogRow> = sqlx::query_as(
            r#"
            SELECT item_id, tcgplayer_id, cardmarket_id, scryfall_id
            FROM catalog_items
            WHERE price_tracking = TRUE
            ORDER BY item_id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load catalog slice")?;

        Ok(rows.into_iter().map(CatalogItem::from).collect())
    }
}

/// Fixed catalog, for tests and file-driven runs
pub struct StaticCatalog {
    items: Vec<CatalogItem>,
}

impl StaticCatalog {
    pub fn new(items: Vec<CatalogItem>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl CatalogSource for StaticCatalog {
    async fn eligible_items(&self, limit: Option<i64>) -> Result<Vec<CatalogItem>> {
        let mut items = self.items.clone();
        items.sort_by_key(|i| i.item_id);
        if let Some(limit) = limit {
            items.truncate(limit.max(0) as usize);
        }
        Ok(items)
    }
}
