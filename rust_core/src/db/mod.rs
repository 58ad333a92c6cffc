//! Canonical price store: pool setup, schema, and the upsert/staging
//! operations the pipeline writes through.

pub mod health;
pub mod memory;
pub mod pool;
pub mod prices;
pub mod schema;

pub use memory::MemoryPriceStore;
pub use pool::{create_pool, DbPoolConfig};
pub use prices::{PgPriceStore, PriceStore};
