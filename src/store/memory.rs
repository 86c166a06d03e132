//! In-process state store.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;

use async_trait::async_trait;

use crate::store::{conflict, StateStore, StoreResult, VersionedValue};

/// A `StateStore` living in a concurrent map. Clones are independent.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: DashMap<(String, String), VersionedValue>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<VersionedValue>> {
        Ok(self
            .entries
            .get(&(namespace.to_string(), key.to_string()))
            .map(|r| r.value().clone()))
    }

    async fn put(&self, namespace: &str, key: &str, value: Value) -> StoreResult<u64> {
        let version = match self.entries.entry((namespace.to_string(), key.to_string())) {
            Entry::Occupied(mut e) => {
                let version = e.get().version + 1;
                e.insert(VersionedValue { value, version });
                version
            }
            Entry::Vacant(e) => {
                e.insert(VersionedValue { value, version: 1 });
                1
            }
        };
        Ok(version)
    }

    async fn compare_and_put(
        &self,
        namespace: &str,
        key: &str,
        expected_version: Option<u64>,
        value: Value,
    ) -> StoreResult<u64> {
        match self.entries.entry((namespace.to_string(), key.to_string())) {
            Entry::Occupied(mut e) => {
                let current = e.get().version;
                if expected_version != Some(current) {
                    return Err(conflict(namespace, key, expected_version, Some(current)));
                }
                e.insert(VersionedValue {
                    value,
                    version: current + 1,
                });
                Ok(current + 1)
            }
            Entry::Vacant(e) => {
                if expected_version.is_some() {
                    return Err(conflict(namespace, key, expected_version, None));
                }
                e.insert(VersionedValue { value, version: 1 });
                Ok(1)
            }
        }
    }

    async fn delete(&self, namespace: &str, key: &str) -> StoreResult<bool> {
        Ok(self
            .entries
            .remove(&(namespace.to_string(), key.to_string()))
            .is_some())
    }

    async fn keys(&self, namespace: &str) -> StoreResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|r| r.key().0 == namespace)
            .map(|r| r.key().1.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
