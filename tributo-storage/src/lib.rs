//! TRIBUTO Storage - Local Mirror
//!
//! Defines the key-value abstraction the offline layer persists through,
//! an in-memory implementation for tests, an LMDB implementation for durable
//! deployments, and the typed [`LocalStore`] that lays cached collections and
//! pending change queues over them.

pub mod lmdb;
pub mod local;
pub mod store;

pub use lmdb::{LmdbStore, LmdbStoreError};
pub use local::{cache_key, queue_key, LocalStore};
pub use store::{InMemoryStore, KeyValueStore};
