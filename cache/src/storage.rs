//! Durable key-value backing for the cache.
//!
//! The app persists selected cache entries through a simple async key-value
//! store (device storage on mobile). The trait mirrors that surface; the
//! cache namespaces its keys so `clear` can wipe only its own records.

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by a durable storage backend.
///
/// The cache treats every storage failure as advisory: persist failures are
/// logged and never propagate to callers.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend rejected or failed the operation
    #[error("storage backend failed: {0}")]
    Backend(String),
}

/// A simple async key-value store backing the cache's `persistent` option.
#[async_trait]
pub trait DurableStorage: Send + Sync {
    /// Read the raw value stored under `key`, if any
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, overwriting any previous value
    async fn set(&self, key: &str, value: String) -> Result<(), StorageError>;

    /// Remove the value stored under `key`; absent keys are not an error
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// List every key currently stored
    async fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Remove several keys in one call; absent keys are not an error
    async fn multi_remove(&self, keys: &[String]) -> Result<(), StorageError>;
}
