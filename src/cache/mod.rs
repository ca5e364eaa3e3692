//! Generation-scoped response cache.
//!
//! This module provides the storage side of offline support:
//! - Request/response snapshot types keyed by method + URL
//! - Named buckets, one per cache generation
//! - All-or-nothing bulk population for precaching
//! - In-memory and SQLite backends

mod storage;
mod types;

pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
pub use types::{
  CacheResult, CacheSource, CachedEntry, Request, RequestKey, RequestMode, ResponseSnapshot,
  ResponseType,
};
