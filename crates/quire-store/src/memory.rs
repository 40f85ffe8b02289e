//! In-memory storage backend

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use quire_core::{Envelope, Error, Result, StoredEnvelope};

use crate::filter::ReadFilter;
use crate::{random_id, reset_not_permitted, RuntimeMode, Store};

type Collections = IndexMap<String, IndexMap<String, StoredEnvelope>>;

/// In-memory storage backend
///
/// Fast, volatile storage suitable for development and tests. Data is lost
/// when the process exits. Insertion order is the collection's natural
/// order for `read_many`.
pub struct MemoryStore {
    collections: RwLock<Collections>,
    filter: RwLock<Option<Arc<dyn ReadFilter>>>,
    mode: RuntimeMode,
}

impl MemoryStore {
    pub fn new(mode: RuntimeMode) -> Self {
        Self {
            collections: RwLock::new(Collections::new()),
            filter: RwLock::new(None),
            mode,
        }
    }
}

fn collection_not_found(collection: &str) -> Error {
    Error::NotFound(format!("document {} not found", collection))
}

fn entry_not_found(collection: &str, id: &str) -> Error {
    Error::NotFound(format!("document {} id: {} not found", collection, id))
}

#[async_trait]
impl Store for MemoryStore {
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
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        if !self.mode.allows_reset() {
            return Err(reset_not_permitted());
        }
        self.collections.write().clear();
        Ok(())
    }

    fn set_filter(&self, filter: Arc<dyn ReadFilter>) {
        *self.filter.write() = Some(filter);
    }
}
