#![warn(clippy::unwrap_used)]

//! Durable per-prospect sequence state.
//! Two backends: `InMemoryBackend` (single process, tests) and
//! `RedisBackend` (shared across engine nodes).

pub mod backend;
pub mod memory;
pub mod redis_store;

pub use backend::{PersistenceBackend, StoreError};
pub use memory::InMemoryBackend;
pub use redis_store::RedisBackend;
