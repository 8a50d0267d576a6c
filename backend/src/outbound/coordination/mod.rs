//! Coordination store adapters.
//!
//! - [`RedisCoordinationStore`]: shared store for multi-instance
//!   deployments.
//! - [`InMemoryCoordinationStore`]: process-local store with the same
//!   semantics, for tests and single-instance development.

mod memory;
mod redis_store;

pub use memory::InMemoryCoordinationStore;
pub use redis_store::{RedisConfig, RedisCoordinationStore, RedisPool};
