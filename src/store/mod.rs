//! Persistent key-value state shared between worker processes.
//!
//! # Data Flow
//! ```text
//! CircuitRegistry ──┐                       ┌─ memory.rs (tests, single process)
//!                   ├─→ StateStore trait ───┤
//! SharedBucket ─────┘                       └─ file.rs (JSON document on disk)
//! ```
//!
//! # Namespaces
//! - `circuit_breakers`: key = circuit key, value = circuit snapshot
//! - `rate_limit_buckets`: key = `bucket:{instance_key}`, value = bucket state
//!
//! # Design Decisions
//! - Every record carries a version; `compare_and_put` rejects stale writers
//! - Values are opaque JSON; callers own their schemas
//! - No cross-namespace transactions

pub mod file;
pub mod memory;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use async_trait::async_trait;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

pub const CIRCUIT_NAMESPACE: &str = "circuit_breakers";
pub const BUCKET_NAMESPACE: &str = "rate_limit_buckets";

/// Store key for an upstream instance's shared bucket.
pub fn bucket_key(instance_key: &str) -> String {
    format!("bucket:{instance_key}")
}

/// Errors from state store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer updated the record since it was read.
    #[error("version conflict on {namespace}/{key}: expected {expected:?}, found {actual:?}")]
    VersionConflict {
        namespace: String,
        key: String,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A stored JSON value and its version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedValue {
    pub value: Value,
    pub version: u64,
}

/// Key-value storage with per-record versions.
#[async_trait]
pub trait StateStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<VersionedValue>>;

    /// Unconditional upsert. Returns the new version.
    async fn put(&self, namespace: &str, key: &str, value: Value) -> StoreResult<u64>;

    /// Write only if the stored version equals `expected_version`
    /// (`None`: the record must not exist yet). Returns the new version.
    async fn compare_and_put(
        &self,
        namespace: &str,
        key: &str,
        expected_version: Option<u64>,
        value: Value,
    ) -> StoreResult<u64>;

    /// Returns whether a record was removed.
    async fn delete(&self, namespace: &str, key: &str) -> StoreResult<bool>;

    /// All keys in a namespace, sorted.
    async fn keys(&self, namespace: &str) -> StoreResult<Vec<String>>;
}

/// Read and decode a typed record.
pub async fn load_typed<T: DeserializeOwned>(
    store: &dyn StateStore,
    namespace: &str,
    key: &str,
) -> StoreResult<Option<(T, u64)>> {
    match store.get(namespace, key).await? {
        Some(record) => {
            let value = serde_json::from_value(record.value)?;
            Ok(Some((value, record.version)))
        }
        None => Ok(None),
    }
}

fn conflict(namespace: &str, key: &str, expected: Option<u64>, actual: Option<u64>) -> StoreError {
    StoreError::VersionConflict {
        namespace: namespace.to_string(),
        key: key.to_string(),
        expected,
        actual,
    }
}
