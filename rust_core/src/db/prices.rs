//! Price writes against the canonical store.
//!
//! Two paths share one conflict rule (identity key, price fields only):
//! - `upsert_prices`: one multi-row `INSERT .. ON CONFLICT` per batch
//! - staging: unlogged scratch table + one set-based merge for bulk imports

use super::schema::{KEY_COLUMNS, PRICE_COLUMNS, PRICE_TABLE, PRICE_UPDATE_SET};
use crate::error::StoreError;
use crate::types::CanonicalPriceRecord;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

/// Bind parameters per row; Postgres caps a statement at 65535
const PARAMS_PER_ROW: usize = 13;
const MAX_ROWS_PER_STATEMENT: usize = 65_535 / PARAMS_PER_ROW;

#[async_trait]
pub trait PriceStore: Send + Sync {
    /// Insert-or-update one batch. Callers must not repeat an identity key
    /// inside a batch. Returns rows written (inserted or updated).
    async fn upsert_prices(&self, records: &[CanonicalPriceRecord]) -> Result<u64, StoreError>;

    async fn create_staging(&self, table: &str) -> Result<(), StoreError>;

    /// Append rows to a staging table; duplicates are allowed here
    async fn stage_prices(&self, table: &str, records: &[CanonicalPriceRecord]) -> Result<u64, StoreError>;

    /// Single set-based merge of a staging table into the canonical table.
    /// Later staged rows win over earlier ones with the same key.
    async fn merge_staging(&self, table: &str) -> Result<u64, StoreError>;

    async fn drop_staging(&self, table: &str) -> Result<(), StoreError>;
}

/// Staging tables are interpolated into SQL, so only plain identifiers pass
pub fn validate_staging_name(table: &str) -> Result<(), StoreError> {
    let mut chars = table.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_lowercase() || c == '_')
        .unwrap_or(false);
    let valid_rest = table
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if valid_start && valid_rest && table.len() <= 63 && table != PRICE_TABLE {
        Ok(())
    } else {
        Err(StoreError::InvalidStagingName(table.to_string()))
    }
}

#[derive(Clone)]
pub struct PgPriceStore {
    pool: PgPool,
}

impl PgPriceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn push_rows(builder: &mut QueryBuilder<'_, Postgres>, records: &[CanonicalPriceRecord]) {
        builder.push_values(records, |mut b, r| {
            b.push_bind(r.observed_at)
                .push_bind(r.item_id)
                .push_bind(r.source_id.clone())
                .push_bind(r.condition.as_code())
                .push_bind(r.is_foil)
                .push_bind(r.language.as_code())
                .push_bind(r.price)
                .push_bind(r.currency.clone())
                .push_bind(r.low_price)
                .push_bind(r.mid_price)
                .push_bind(r.high_price)
                .push_bind(r.market_price)
                .push_bind(r.listing_count);
        });
    }
}

#[async_trait]
impl PriceStore for PgPriceStore {
    async fn upsert_prices(&self, records: &[CanonicalPriceRecord]) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut written = 0;
        for chunk in records.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut builder =
                QueryBuilder::new(format!("INSERT INTO {} ({}) ", PRICE_TABLE, PRICE_COLUMNS));
            Self::push_rows(&mut builder, chunk);
            builder.push(format!(
                " ON CONFLICT ({}) DO UPDATE SET {}",
                KEY_COLUMNS, PRICE_UPDATE_SET
            ));

            let result = builder.build().execute(&self.pool).await?;
            written += result.rows_affected();
        }

        debug!("Upserted {} price rows", written);
        Ok(written)
    }

    async fn create_staging(&self, table: &str) -> Result<(), StoreError> {
        validate_staging_name(table)?;
        let sql = format!(
            r#"
            CREATE UNLOGGED TABLE {table} (
                seq           BIGSERIAL,
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
                listing_count INTEGER
            )
            "#
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        debug!("Created staging table {}", table);
        Ok(())
    }

    async fn stage_prices(&self, table: &str, records: &[CanonicalPriceRecord]) -> Result<u64, StoreError> {
        validate_staging_name(table)?;
        if records.is_empty() {
            return Ok(0);
        }

        let mut staged = 0;
        for chunk in records.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut builder = QueryBuilder::new(format!("INSERT INTO {} ({}) ", table, PRICE_COLUMNS));
            Self::push_rows(&mut builder, chunk);
            staged += builder.build().execute(&self.pool).await?.rows_affected();
        }
        Ok(staged)
    }

    async fn merge_staging(&self, table: &str) -> Result<u64, StoreError> {
        validate_staging_name(table)?;
        let sql = format!(
            r#"
            INSERT INTO {target} ({columns})
            SELECT DISTINCT ON ({key}) {columns}
            FROM {table}
            ORDER BY {key}, seq DESC
            ON CONFLICT ({key}) DO UPDATE SET {update}
            "#,
            target = PRICE_TABLE,
            columns = PRICE_COLUMNS,
            key = KEY_COLUMNS,
            table = table,
            update = PRICE_UPDATE_SET,
        );

        let merged = sqlx::query(&sql).execute(&self.pool).await?.rows_affected();
        debug!("Merged {} rows from {}", merged, table);
        Ok(merged)
    }

    async fn drop_staging(&self, table: &str) -> Result<(), StoreError> {
        validate_staging_name(table)?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
            .execute(&self.pool)
            .await?;
        debug!("Dropped staging table {}", table);
        Ok(())
    }
}
