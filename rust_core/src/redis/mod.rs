pub mod store;

pub use store::RedisKvStore;
