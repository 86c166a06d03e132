//! JSON-file backed state store.
//!
//! The whole store is one JSON document. Every operation re-reads the file
//! under an OS lock on a sidecar `<file>.lock`: shared for reads, exclusive
//! for read-check-write. Writers stage into their own temp file in the same
//! directory and rename it over the document, so separate processes on one
//! host see each other's writes and never interleave a version check.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde_json::Value;
use tokio::sync::Mutex;

use async_trait::async_trait;

use crate::store::{conflict, StateStore, StoreError, StoreResult, VersionedValue};

type Document = BTreeMap<String, BTreeMap<String, VersionedValue>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Shared,
    Exclusive,
}

/// A `StateStore` persisted to a single JSON file.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    lock_path: PathBuf,
    /// Keeps this handle's own tasks off the blocking pool while another
    /// of them holds the file lock.
    local: Mutex<()>,
}

fn sidecar_lock_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}

fn read_document(path: &Path) -> StoreResult<Document> {
    match std::fs::read(path) {
        Ok(bytes) if bytes.is_empty() => Ok(Document::new()),
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Document::new()),
        Err(e) => Err(e.into()),
    }
}

fn write_document(path: &Path, doc: &Document) -> StoreResult<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut staged = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut staged, doc)?;
    staged.flush()?;
    staged.persist(path).map_err(|e| e.error)?;
    Ok(())
}

impl FileStateStore {
    /// Open (or lazily create) the store at `path`.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let store = Self {
            lock_path: sidecar_lock_path(&path),
            path,
            local: Mutex::new(()),
        };
        let doc = store.with_lock(LockMode::Shared, read_document).await?;
        let records: usize = doc.values().map(BTreeMap::len).sum();
        tracing::info!(path = ?store.path, records, "Opened state store");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `op` on the document path while holding the sidecar file lock.
    async fn with_lock<R, F>(&self, mode: LockMode, op: F) -> StoreResult<R>
    where
        F: FnOnce(&Path) -> StoreResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let _local = self.local.lock().await;
        let path = self.path.clone();
        let lock_path = self.lock_path.clone();

        tokio::task::spawn_blocking(move || {
            let lock_file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&lock_path)?;
            match mode {
                LockMode::Shared => FileExt::lock_shared(&lock_file)?,
                LockMode::Exclusive => FileExt::lock_exclusive(&lock_file)?,
            }
            // Released when `lock_file` is closed.
            op(&path)
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<VersionedValue>> {
        let (namespace, key) = (namespace.to_string(), key.to_string());
        self.with_lock(LockMode::Shared, move |path| {
            let doc = read_document(path)?;
            Ok(doc.get(&namespace).and_then(|ns| ns.get(&key)).cloned())
        })
        .await
    }

    async fn put(&self, namespace: &str, key: &str, value: Value) -> StoreResult<u64> {
        let (namespace, key) = (namespace.to_string(), key.to_string());
        self.with_lock(LockMode::Exclusive, move |path| {
            let mut doc = read_document(path)?;
            let ns = doc.entry(namespace).or_default();
            let version = ns.get(&key).map(|r| r.version + 1).unwrap_or(1);
            ns.insert(key, VersionedValue { value, version });
            write_document(path, &doc)?;
            Ok(version)
        })
        .await
    }

    async fn compare_and_put(
        &self,
        namespace: &str,
        key: &str,
        expected_version: Option<u64>,
        value: Value,
    ) -> StoreResult<u64> {
        let (namespace, key) = (namespace.to_string(), key.to_string());
        self.with_lock(LockMode::Exclusive, move |path| {
            let mut doc = read_document(path)?;
            let current = doc
                .get(&namespace)
                .and_then(|ns| ns.get(&key))
                .map(|r| r.version);
            if current != expected_version {
                return Err(conflict(&namespace, &key, expected_version, current));
            }
            let version = current.map(|v| v + 1).unwrap_or(1);
            doc.entry(namespace)
                .or_default()
                .insert(key, VersionedValue { value, version });
            write_document(path, &doc)?;
            Ok(version)
        })
        .await
    }

    async fn delete(&self, namespace: &str, key: &str) -> StoreResult<bool> {
        let (namespace, key) = (namespace.to_string(), key.to_string());
        self.with_lock(LockMode::Exclusive, move |path| {
            let mut doc = read_document(path)?;
            let removed = doc
                .get_mut(&namespace)
                .map(|ns| ns.remove(&key).is_some())
                .unwrap_or(false);
            if removed {
                write_document(path, &doc)?;
            }
            Ok(removed)
        })
        .await
    }

    async fn keys(&self, namespace: &str) -> StoreResult<Vec<String>> {
        let namespace = namespace.to_string();
        self.with_lock(LockMode::Shared, move |path| {
            let doc = read_document(path)?;
            Ok(doc
                .get(&namespace)
                .map(|ns| ns.keys().cloned().collect())
                .unwrap_or_default())
        })
        .await
    }
}
