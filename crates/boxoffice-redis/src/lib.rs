//! Box Office — Redis projection store.

pub mod redis_projection_store;

pub use redis_projection_store::RedisProjectionStore;
