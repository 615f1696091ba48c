//! Named, versioned response cache.
//!
//! This module provides the cache store the agent works against:
//! - Generations identified by name (prefix + version), one of them current
//! - Entries keyed by request identity (method + URL)
//! - SQLite-backed durable storage and an in-memory store

mod layer;
mod storage;
mod traits;

pub use layer::CacheGeneration;
pub use storage::{MemoryStorage, SqliteStorage};
pub use traits::{CacheStore, RequestKey};

#[cfg(test)]
pub use traits::CachedEntry;
