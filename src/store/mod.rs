//! Key-value storage behind the cache, quota ledger and confirmation register.
//!
//! # Key Concepts
//! - KvStore: the five primitives (get/set/incr/expire/ttl) plus delete, prefix scan and purge
//! - MemoryStore: in-process map, the default
//! - SqliteStore: single-file persistence via rusqlite
//! - KeyedLocks: per-key async critical sections
//!
//! Expired keys are invisible to every read; `purge_expired` reclaims them.

mod keyed_lock;
mod memory;
mod sqlite;

pub use keyed_lock::KeyedLocks;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Value at {key} is not an integer")]
    NotAnInteger { key: String },

    #[error("Corrupt value at {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Shared store handle.
pub type StoreRef = Arc<dyn KvStore>;

/// String key-value store with per-key expiry.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Value at `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value`. `ttl = None` means no expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Increment an integer value, creating it at 1. Existing expiry is kept.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Set expiry on an existing key. Returns false if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Remaining lifetime. `None` if the key is absent or has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// Remove a key. Returns true if it existed and was live.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// All live entries whose key starts with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError>;

    /// Drop every expired key starting with `prefix`. Returns how many were removed.
    async fn purge_expired(&self, prefix: &str) -> Result<usize, StoreError>;
}

/// Decode a JSON value stored at `key`.
pub(crate) fn decode<T: serde::de::DeserializeOwned>(key: &str, raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Encode a value as JSON for storage.
pub(crate) fn encode<T: serde::Serialize>(key: &str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
