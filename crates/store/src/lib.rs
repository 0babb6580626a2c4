//! Store client for the job queue's Redis instance.
//!
//! The dashboard needs exactly one capability from the store: counting keys
//! that match a glob pattern. [`KeyCounter`] is that seam; [`RedisStore`] is
//! the production implementation, scanning in bounded batches and
//! reconnecting with capped exponential backoff (see [`reconnect`]).

pub mod config;
pub mod counter;
pub mod error;
pub mod reconnect;
pub mod redis_store;

pub use config::RedisConfig;
pub use counter::KeyCounter;
pub use error::StoreError;
pub use redis_store::RedisStore;
