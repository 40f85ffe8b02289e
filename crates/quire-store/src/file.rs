//! File-persisted storage backend

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use quire_core::{Envelope, Error, Result, StoredEnvelope};
use tracing::debug;

use crate::filter::ReadFilter;
use crate::{random_id, reset_not_permitted, RuntimeMode, Store};

type Collections = IndexMap<String, IndexMap<String, StoredEnvelope>>;

/// File-persisted storage backend
///
/// The in-memory structure of [`crate::MemoryStore`], mirrored to a single
/// JSON file after every write, delete, and reset. The file holds the full
/// two-level mapping as typed `IndexMap`s, so a reload reconstructs the
/// store mapping exactly — insertion order included — instead of collapsing
/// into a generic object tree.
///
/// Writes are whole-file rewrites; callers serialize mutations through the
/// version control protocol's per-key locking.
pub struct FileStore {
    path: PathBuf,
    collections: RwLock<Collections>,
    filter: RwLock<Option<Arc<dyn ReadFilter>>>,
    mode: RuntimeMode,
}

impl FileStore {
    /// Open a store backed by `path`. The file is loaded when present;
    /// a missing or empty file means an empty store. A file that exists but
    /// fails to parse is a `Store` error, not silent data loss.
    pub fn open(path: impl Into<PathBuf>, mode: RuntimeMode) -> Result<Self> {
        let path = path.into();
        let collections = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => Collections::new(),
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                Error::Store(format!("corrupt store file {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Collections::new(),
            Err(e) => {
                return Err(Error::Store(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        Ok(Self {
            path,
            collections: RwLock::new(collections),
            filter: RwLock::new(None),
            mode,
        })
    }

    fn flush(&self, collections: &Collections) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::Store(format!("failed to create {}: {}", parent.display(), e))
                })?;
            }
        }

        let text = serde_json::to_string_pretty(collections)
            .map_err(|e| Error::Store(e.to_string()))?;
        std::fs::write(&self.path, text)
            .map_err(|e| Error::Store(format!("failed to write {}: {}", self.path.display(), e)))?;

        debug!(path = %self.path.display(), "flushed store file");
        Ok(())
    }
}

fn collection_not_found(collection: &str) -> Error {
    Error::NotFound(format!("document {} not found", collection))
}

fn entry_not_found(collection: &str, id: &str) -> Error {
    Error::NotFound(format!("document {} id: {} not found", collection, id))
}

#[async_trait]
impl Store for FileStore {
    async fn exists(&self, collection: &str, id: &str) -> Result<bool> {
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .map_or(false, |entries| entries.contains_key(id)))
    }

    async fn read(&self, collection: &str, id: &str) -> Result<Option<Envelope>> {
        let collections = self.collections.read();
        let entries = collections
            .get(collection)
            .ok_or_else(|| collection_not_found(collection))?;
        let stored = entries
            .get(id)
            .ok_or_else(|| entry_not_found(collection, id))?;

        let envelope = Envelope::from_stored(id, stored.clone())?;
        if let Some(filter) = self.filter.read().as_ref() {
            if !filter.accepts(&envelope) {
                return Ok(None);
            }
        }
        Ok(Some(envelope))
    }

    async fn read_many(&self, collection: &str) -> Result<Vec<Envelope>> {
        let collections = self.collections.read();
        let entries = collections
            .get(collection)
            .ok_or_else(|| collection_not_found(collection))?;

        let filter = self.filter.read().clone();
        let mut envelopes = Vec::with_capacity(entries.len());
        for (id, stored) in entries {
            let envelope = Envelope::from_stored(id.clone(), stored.clone())?;
            if filter.as_ref().map_or(true, |f| f.accepts(&envelope)) {
                envelopes.push(envelope);
            }
        }
        Ok(envelopes)
    }

    async fn write(
        &self,
        collection: &str,
        id: Option<&str>,
        envelope: &Envelope,
        expected_version: Option<u64>,
    ) -> Result<String> {
        let stored = envelope.to_stored()?;
        let mut collections = self.collections.write();

        if let (Some(id), Some(expected)) = (id, expected_version) {
            let current = collections
                .get(collection)
                .and_then(|entries| entries.get(id))
                .ok_or_else(|| entry_not_found(collection, id))?;
            if current.version != expected {
                return Err(Error::VersionConflict {
                    expected,
                    stored: current.version,
                });
            }
        }

        let entries = collections.entry(collection.to_string()).or_default();
        let id = match id {
            Some(id) => id.to_string(),
            None => random_id(entries),
        };
        entries.insert(id.clone(), stored);

        self.flush(&collections)?;
        Ok(id)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let mut collections = self.collections.write();
        let entries = collections
            .get_mut(collection)
            .ok_or_else(|| collection_not_found(collection))?;
        entries
            .shift_remove(id)
            .ok_or_else(|| entry_not_found(collection, id))?;

        if entries.is_empty() {
            collections.shift_remove(collection);
        }

        self.flush(&collections)
    }

    async fn reset(&self) -> Result<()> {
        if !self.mode.allows_reset() {
            return Err(reset_not_permitted());
        }

        let mut collections = self.collections.write();
        collections.clear();
        self.flush(&collections)
    }

    fn set_filter(&self, filter: Arc<dyn ReadFilter>) {
        *self.filter.write() = Some(filter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(document: serde_json::Value) -> Envelope {
        Envelope::new(document.as_object().unwrap().clone())
    }

    fn store_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("store.json")
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(store_path(&dir), RuntimeMode::Test).unwrap();

        assert!(!store.exists("orders", "1").await.unwrap());
    }

    #[tokio::test]
    async fn test_round_trip_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_path(&dir);

        let store = FileStore::open(&path, RuntimeMode::Test).unwrap();
        let id = store
            .write(
                "orders",
                None,
                &envelope(json!({"total": 10, "items": [{"sku": "a"}, {"sku": "b"}]})),
                None,
            )
            .await
            .unwrap();

        let reopened = FileStore::open(&path, RuntimeMode::Test).unwrap();
        let read = reopened.read("orders", &id).await.unwrap().unwrap();
        assert_eq!(read.version, 0);
        assert_eq!(
            read.document,
            *json!({"total": 10, "items": [{"sku": "a"}, {"sku": "b"}]})
                .as_object()
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_reopen_preserves_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_path(&dir);

        let store = FileStore::open(&path, RuntimeMode::Test).unwrap();
        for n in 0..4 {
            store
                .write("orders", Some(format!("id-{}", n).as_str()), &envelope(json!({"n": n})), None)
                .await
                .unwrap();
        }

        let reopened = FileStore::open(&path, RuntimeMode::Test).unwrap();
        let order: Vec<String> = reopened
            .read_many("orders")
            .await
            .unwrap()
            .into_iter()
            .filter_map(|e| e.id)
            .collect();
        assert_eq!(order, vec!["id-0", "id-1", "id-2", "id-3"]);
    }

    #[tokio::test]
    async fn test_delete_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_path(&dir);

        let store = FileStore::open(&path, RuntimeMode::Test).unwrap();
        let id = store
            .write("orders", None, &envelope(json!({})), None)
            .await
            .unwrap();
        store.delete("orders", &id).await.unwrap();

        let reopened = FileStore::open(&path, RuntimeMode::Test).unwrap();
        assert!(matches!(
            reopened.read_many("orders").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_path(&dir);
        std::fs::write(&path, "not json at all {").unwrap();

        assert!(matches!(
            FileStore::open(&path, RuntimeMode::Test),
            Err(Error::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_reset_clears_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_path(&dir);

        let store = FileStore::open(&path, RuntimeMode::Development).unwrap();
        store
            .write("orders", None, &envelope(json!({})), None)
            .await
            .unwrap();
        store.reset().await.unwrap();

        let reopened = FileStore::open(&path, RuntimeMode::Development).unwrap();
        assert!(!reopened.exists("orders", "1").await.unwrap());
    }
}
