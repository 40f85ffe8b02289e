//! Document service - the version control protocol over a backend store

use std::sync::Arc;

use dashmap::DashMap;
use quire_core::{apply, diff, validate_operations, Document, Envelope, Error, Patch, Result};
use quire_store::Store;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

/// Collection name reserved by the transport's route grammar.
const RESERVED_COLLECTION: &str = "document";

/// The version control protocol over a backend store.
///
/// Every accepted mutation bumps the document version by exactly 1 and
/// appends a patch tagged with the pre-update version. Mutations are
/// read-check-write sequences made atomic per (collection, id) key: a keyed
/// async mutex spans the read, the diff/apply, and the write, and the store
/// re-checks the expected version under its own write exclusion (the
/// database backend expresses that check as a conditional update).
pub struct DocumentService {
    store: Arc<dyn Store>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl DocumentService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    /// The backend store this service writes through.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    fn key_lock(&self, collection: &str, id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(lock_key(collection, id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Create a new document at version 0 with an empty history.
    /// The store assigns the id; no version check because there is no prior
    /// state.
    pub async fn create(&self, collection: &str, document: Document) -> Result<Envelope> {
        ensure_collection_name(collection)?;

        let mut envelope = Envelope::new(document);
        let id = self.store.write(collection, None, &envelope, None).await?;
        debug!(collection, id = %id, "created document");

        envelope.id = Some(id);
        Ok(envelope)
    }

    /// Read one envelope. `Ok(None)` when the installed filter hides it.
    pub async fn get(&self, collection: &str, id: &str) -> Result<Option<Envelope>> {
        self.store.read(collection, id).await
    }

    /// Read every visible envelope in a collection.
    pub async fn list(&self, collection: &str) -> Result<Vec<Envelope>> {
        self.store.read_many(collection).await
    }

    /// Whole-document update.
    ///
    /// The caller states the version it read; a mismatch with the stored
    /// version is a `VersionConflict` and leaves the envelope untouched. On
    /// success the diff between the stored and the new document is recorded
    /// as a patch tagged with the pre-update version.
    pub async fn replace(
        &self,
        collection: &str,
        id: &str,
        new_document: Document,
        expected_version: u64,
    ) -> Result<Envelope> {
        ensure_collection_name(collection)?;
        let lock = self.key_lock(collection, id);
        let _guard = lock.lock().await;

        let mut envelope = self
            .store
            .read(collection, id)
            .await?
            .ok_or_else(|| not_visible(collection, id))?;

        if expected_version != envelope.version {
            return Err(Error::VersionConflict {
                expected: expected_version,
                stored: envelope.version,
            });
        }

        let operations = diff(&envelope.document, &new_document);
        envelope.append_patch(Patch {
            version: envelope.version,
            operations,
        })?;
        envelope.version += 1;
        envelope.document = new_document;

        self.store
            .write(collection, Some(id), &envelope, Some(expected_version))
            .await?;
        debug!(collection, id, version = envelope.version, "replaced document");
        Ok(envelope)
    }

    /// Patch-document update.
    ///
    /// Operations are validated structurally, applied through the codec, and
    /// recorded verbatim — not re-derived — in the patch history.
    pub async fn apply_patch(
        &self,
        collection: &str,
        id: &str,
        raw_operations: &[Value],
        expected_version: u64,
    ) -> Result<Envelope> {
        ensure_collection_name(collection)?;
        let lock = self.key_lock(collection, id);
        let _guard = lock.lock().await;

        let mut envelope = self
            .store
            .read(collection, id)
            .await?
            .ok_or_else(|| not_visible(collection, id))?;

        if expected_version != envelope.version {
            return Err(Error::VersionConflict {
                expected: expected_version,
                stored: envelope.version,
            });
        }

        let operations = validate_operations(raw_operations)?;
        let new_document = apply(&envelope.document, &operations)?;

        envelope.append_patch(Patch {
            version: envelope.version,
            operations,
        })?;
        envelope.version += 1;
        envelope.document = new_document;

        self.store
            .write(collection, Some(id), &envelope, Some(expected_version))
            .await?;
        debug!(collection, id, version = envelope.version, "patched document");
        Ok(envelope)
    }

    /// The patches recorded from `version` onward.
    pub async fn history_since(
        &self,
        collection: &str,
        id: &str,
        version: u64,
    ) -> Result<Vec<Patch>> {
        let envelope = self
            .store
            .read(collection, id)
            .await?
            .ok_or_else(|| not_visible(collection, id))?;
        envelope.patches_since(version)
    }

    /// Remove a document entirely. There is no terminal version state.
    pub async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let lock = self.key_lock(collection, id);
        let _guard = lock.lock().await;

        self.store.delete(collection, id).await?;
        self.locks.remove(&lock_key(collection, id));
        debug!(collection, id, "deleted document");
        Ok(())
    }

    /// Clear the backing store. Gated to test/development mode by the store.
    pub async fn reset(&self) -> Result<()> {
        self.store.reset().await?;
        self.locks.clear();
        Ok(())
    }
}

fn lock_key(collection: &str, id: &str) -> String {
    format!("{}/{}", collection, id)
}

fn not_visible(collection: &str, id: &str) -> Error {
    Error::NotFound(format!("document {} id: {} not found", collection, id))
}

fn ensure_collection_name(collection: &str) -> Result<()> {
    if collection.eq_ignore_ascii_case(RESERVED_COLLECTION) {
        return Err(Error::Store(format!(
            "Document name \"{}\" not allowed",
            RESERVED_COLLECTION
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_store::{FieldEquals, MemoryStore, RuntimeMode};
    use serde_json::json;

    fn service() -> DocumentService {
        DocumentService::new(Arc::new(MemoryStore::new(RuntimeMode::Test)))
    }

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn test_create_then_patch() {
        let service = service();

        let created = service.create("notes", doc(json!({"a": 1, "b": 2}))).await.unwrap();
        let id = created.id.clone().unwrap();
        assert_eq!(created.version, 0);
        assert_eq!(created.patches.as_deref(), Some(&[][..]));

        let operations = vec![json!({"op": "add", "path": "/c", "value": "x"})];
        let patched = service.apply_patch("notes", &id, &operations, 0).await.unwrap();

        assert_eq!(patched.version, 1);
        assert_eq!(
            patched.document,
            doc(json!({"a": 1, "b": 2, "c": "x"}))
        );

        let history = service.history_since("notes", &id, 0).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, 0);
        assert_eq!(history[0].operations.len(), 1);
        assert_eq!(history[0].operations[0].path, "/c");
    }

    #[tokio::test]
    async fn test_stale_replace_is_rejected() {
        let service = service();

        let created = service.create("notes", doc(json!({"a": 1}))).await.unwrap();
        let id = created.id.clone().unwrap();

        let result = service.replace("notes", &id, doc(json!({"a": 2})), 5).await;
        assert!(matches!(
            result,
            Err(Error::VersionConflict { expected: 5, stored: 0 })
        ));

        let unchanged = service.get("notes", &id).await.unwrap().unwrap();
        assert_eq!(unchanged.version, 0);
        assert_eq!(unchanged.document, doc(json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_replace_records_diff() {
        let service = service();

        let created = service
            .create("notes", doc(json!({"a": 1, "b": 2})))
            .await
            .unwrap();
        let id = created.id.clone().unwrap();

        let replaced = service
            .replace("notes", &id, doc(json!({"a": 1, "c": 3})), 0)
            .await
            .unwrap();
        assert_eq!(replaced.version, 1);

        let history = service.history_since("notes", &id, 0).await.unwrap();
        let reread = service.get("notes", &id).await.unwrap().unwrap();
        assert_eq!(
            quire_core::apply(&doc(json!({"a": 1, "b": 2})), &history[0].operations).unwrap(),
            reread.document
        );
    }

    #[tokio::test]
    async fn test_version_and_history_advance_in_lockstep() {
        let service = service();

        let created = service.create("counters", doc(json!({"n": 0}))).await.unwrap();
        let id = created.id.clone().unwrap();

        for n in 0..6u64 {
            if n % 2 == 0 {
                service
                    .replace("counters", &id, doc(json!({"n": n + 1})), n)
                    .await
                    .unwrap();
            } else {
                let operations = vec![json!({"op": "replace", "path": "/n", "value": n + 1})];
                service
                    .apply_patch("counters", &id, &operations, n)
                    .await
                    .unwrap();
            }
        }

        let envelope = service.get("counters", &id).await.unwrap().unwrap();
        assert_eq!(envelope.version, 6);
        let patches = envelope.patches.as_ref().unwrap();
        assert_eq!(patches.len(), 6);
        for (i, patch) in patches.iter().enumerate() {
            assert_eq!(patch.version, i as u64);
        }
    }

    #[tokio::test]
    async fn test_fifty_documents_get_distinct_histories() {
        let service = service();

        let mut ids = std::collections::HashSet::new();
        for n in 0..50 {
            let created = service
                .create("bulk", doc(json!({"n": n})))
                .await
                .unwrap();
            assert_eq!(created.version, 0);
            assert!(ids.insert(created.id.unwrap()));
        }

        let envelopes = service.list("bulk").await.unwrap();
        assert_eq!(envelopes.len(), 50);
        for envelope in &envelopes {
            assert_eq!(envelope.version, 0);
            let n = envelope.document.get("n").and_then(|v| v.as_i64()).unwrap();
            assert!((0..50i64).contains(&n));
        }
    }

    #[tokio::test]
    async fn test_patch_failures_leave_document_untouched() {
        let service = service();

        let created = service.create("notes", doc(json!({"a": 1}))).await.unwrap();
        let id = created.id.clone().unwrap();

        let malformed = vec![json!({"op": "add", "path": "/c"})];
        assert!(matches!(
            service.apply_patch("notes", &id, &malformed, 0).await,
            Err(Error::Validation(_))
        ));

        let missing_path = vec![json!({"op": "remove", "path": "/zzz", "value": null})];
        assert!(matches!(
            service.apply_patch("notes", &id, &missing_path, 0).await,
            Err(Error::PatchApply(_))
        ));

        let envelope = service.get("notes", &id).await.unwrap().unwrap();
        assert_eq!(envelope.version, 0);
        assert_eq!(envelope.document, doc(json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_patch_on_missing_document_is_not_found() {
        let service = service();
        service.create("notes", doc(json!({}))).await.unwrap();

        let operations = vec![json!({"op": "add", "path": "/c", "value": 1})];
        assert!(matches!(
            service.apply_patch("notes", "no-such-id", &operations, 0).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_history_for_unrecorded_version_is_not_found() {
        let service = service();

        let created = service.create("notes", doc(json!({"a": 1}))).await.unwrap();
        let id = created.id.clone().unwrap();

        assert!(service.history_since("notes", &id, 0).await.unwrap().is_empty());
        assert!(matches!(
            service.history_since("notes", &id, 3).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reserved_collection_name_is_rejected() {
        let service = service();

        assert!(matches!(
            service.create("document", doc(json!({}))).await,
            Err(Error::Store(_))
        ));
        assert!(matches!(
            service.create("Document", doc(json!({}))).await,
            Err(Error::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_document_and_collection() {
        let service = service();

        let created = service.create("notes", doc(json!({}))).await.unwrap();
        let id = created.id.clone().unwrap();

        service.delete("notes", &id).await.unwrap();
        assert!(matches!(
            service.delete("notes", &id).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(service.list("notes").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_filtered_document_cannot_be_mutated() {
        let service = service();

        let created = service
            .create("notes", doc(json!({"owner": "bob"})))
            .await
            .unwrap();
        let id = created.id.clone().unwrap();

        service
            .store()
            .set_filter(Arc::new(FieldEquals::new("owner", json!("alice"))));

        assert!(matches!(
            service.replace("notes", &id, doc(json!({"owner": "bob", "n": 1})), 0).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_updates_admit_exactly_one_writer() {
        let service = Arc::new(service());

        let created = service.create("race", doc(json!({"n": 0}))).await.unwrap();
        let id = created.id.clone().unwrap();

        let mut handles = Vec::new();
        for n in 0..2 {
            let service = service.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                service
                    .replace("race", &id, doc(json!({"n": n + 1})), 0)
                    .await
            }));
        }

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }

        let accepted = outcomes.iter().filter(|r| r.is_ok()).count();
        let conflicted = outcomes
            .iter()
            .filter(|r| matches!(r, Err(Error::VersionConflict { .. })))
            .count();
        assert_eq!(accepted, 1);
        assert_eq!(conflicted, 1);

        let envelope = service.get("race", &id).await.unwrap().unwrap();
        assert_eq!(envelope.version, 1);
    }
}
