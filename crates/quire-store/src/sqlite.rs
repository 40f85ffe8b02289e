//! SQLite storage backend

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use quire_core::{Envelope, Error, Result, StoredEnvelope};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::Value;
use uuid::Uuid;

use crate::filter::ReadFilter;
use crate::{reset_not_permitted, RuntimeMode, Store};

/// SQLite storage backend
///
/// Embedded persistence. Each collection maps to its own table, created
/// lazily on first write. Ids are backend-generated UUIDs; an update with a
/// malformed id is a `Store` error. The optimistic-concurrency check is a
/// conditional `UPDATE ... WHERE id = ? AND version = ?`, so the database
/// itself provides the write atomicity; zero rows affected surfaces as a
/// `VersionConflict` (or `NotFound` when the row is gone).
///
/// The read filter must expose a native query clause
/// ([`ReadFilter::sql_clause`]); it is pushed into every SELECT rather than
/// applied post-fetch.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    filter: RwLock<Option<Arc<dyn ReadFilter>>>,
    mode: RuntimeMode,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn new(path: impl AsRef<Path>, mode: RuntimeMode) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::Store(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
            filter: RwLock::new(None),
            mode,
        })
    }

    /// In-memory database (for testing).
    pub fn in_memory(mode: RuntimeMode) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Store(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
            filter: RwLock::new(None),
            mode,
        })
    }

    fn active_clause(&self) -> Result<Option<crate::filter::SqlClause>> {
        match self.filter.read().as_ref() {
            Some(filter) => filter
                .sql_clause()
                .map(Some)
                .ok_or_else(|| {
                    Error::Store("installed filter cannot produce a query clause".into())
                }),
            None => Ok(None),
        }
    }
}

/// Quoted table name for a collection. Names are restricted to the same
/// character set as document ids so they can be embedded as identifiers.
fn table(collection: &str) -> Result<String> {
    let valid = !collection.is_empty()
        && collection
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == ':' || c == '_' || c == '-');
    if !valid {
        return Err(Error::Store(format!(
            "collection name {} must match pattern [a-zA-Z0-9:_-]+",
            collection
        )));
    }
    Ok(format!("\"doc_{}\"", collection))
}

fn table_exists(conn: &Connection, collection: &str) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![format!("doc_{}", collection)],
            |row| row.get(0),
        )
        .map_err(|e| Error::Store(e.to_string()))?;
    Ok(count > 0)
}

fn ensure_table(conn: &Connection, collection: &str) -> Result<()> {
    conn.execute_batch(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            id TEXT PRIMARY KEY,
            version INTEGER NOT NULL,
            document TEXT NOT NULL,
            patches TEXT NOT NULL,
            extra TEXT NOT NULL
        )
        "#,
        table(collection)?
    ))
    .map_err(|e| Error::Store(e.to_string()))
}

fn collection_not_found(collection: &str) -> Error {
    Error::NotFound(format!("document {} not found", collection))
}

fn entry_not_found(collection: &str, id: &str) -> Error {
    Error::NotFound(format!("document {} id: {} not found", collection, id))
}

fn row_to_stored(version: i64, document: &str, patches: &str, extra: &str) -> Result<StoredEnvelope> {
    Ok(StoredEnvelope {
        version: version as u64,
        document: serde_json::from_str(document).map_err(|e| Error::Store(e.to_string()))?,
        patches: serde_json::from_str(patches).map_err(|e| Error::Store(e.to_string()))?,
        extra: serde_json::from_str(extra).map_err(|e| Error::Store(e.to_string()))?,
    })
}

fn bind_param(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn stored_columns(envelope: &Envelope) -> Result<(i64, String, String, String)> {
    let stored = envelope.to_stored()?;
    let document = serde_json::to_string(&stored.document).map_err(|e| Error::Store(e.to_string()))?;
    let patches = serde_json::to_string(&stored.patches).map_err(|e| Error::Store(e.to_string()))?;
    let extra = serde_json::to_string(&stored.extra).map_err(|e| Error::Store(e.to_string()))?;
    Ok((stored.version as i64, document, patches, extra))
}

#[async_trait]
impl Store for SqliteStore {
    async fn exists(&self, collection: &str, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        if !table_exists(&conn, collection)? {
            return Ok(false);
        }

        let row: Option<i64> = conn
            .query_row(
                &format!("SELECT 1 FROM {} WHERE id = ?1", table(collection)?),
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(row.is_some())
    }

    async fn read(&self, collection: &str, id: &str) -> Result<Option<Envelope>> {
        let clause = self.active_clause()?;
        let conn = self.conn.lock();

        if !table_exists(&conn, collection)? {
            return Err(collection_not_found(collection));
        }

        let mut sql = format!(
            "SELECT version, document, patches, extra FROM {} WHERE id = ?1",
            table(collection)?
        );
        let mut values = vec![SqlValue::Text(id.to_string())];
        let filtered = clause.is_some();
        if let Some(clause) = clause {
            sql.push_str(&format!(" AND ({})", clause.clause));
            values.extend(clause.params.iter().map(bind_param));
        }

        let row = conn
            .query_row(&sql, params_from_iter(values), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .optional()
            .map_err(|e| Error::Store(e.to_string()))?;

        match row {
            Some((version, document, patches, extra)) => {
                let stored = row_to_stored(version, &document, &patches, &extra)?;
                Ok(Some(Envelope::from_stored(id, stored)?))
            }
            None if filtered => {
                // The row may exist and be filtered; only its absence is an error.
                let present: Option<i64> = conn
                    .query_row(
                        &format!("SELECT 1 FROM {} WHERE id = ?1", table(collection)?),
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(|e| Error::Store(e.to_string()))?;
                if present.is_some() {
                    Ok(None)
                } else {
                    Err(entry_not_found(collection, id))
                }
            }
            None => Err(entry_not_found(collection, id)),
        }
    }

    async fn read_many(&self, collection: &str) -> Result<Vec<Envelope>> {
        let clause = self.active_clause()?;
        let conn = self.conn.lock();

        if !table_exists(&conn, collection)? {
            return Err(collection_not_found(collection));
        }

        let mut sql = format!(
            "SELECT id, version, document, patches, extra FROM {}",
            table(collection)?
        );
        let mut values = Vec::new();
        if let Some(clause) = clause {
            sql.push_str(&format!(" WHERE ({})", clause.clause));
            values.extend(clause.params.iter().map(bind_param));
        }
        sql.push_str(" ORDER BY rowid");

        let mut stmt = conn.prepare(&sql).map_err(|e| Error::Store(e.to_string()))?;
        let rows = stmt
            .query_map(params_from_iter(values), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(|e| Error::Store(e.to_string()))?;

        let mut envelopes = Vec::new();
        for row in rows {
            let (id, version, document, patches, extra) =
                row.map_err(|e| Error::Store(e.to_string()))?;
            let stored = row_to_stored(version, &document, &patches, &extra)?;
            envelopes.push(Envelope::from_stored(id, stored)?);
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
        let (version, document, patches, extra) = stored_columns(envelope)?;
        let conn = self.conn.lock();
        ensure_table(&conn, collection)?;

        match id {
            Some(id) => {
                if Uuid::parse_str(id).is_err() {
                    return Err(Error::Store(format!("Bad id {}", id)));
                }

                match expected_version {
                    Some(expected) => {
                        let affected = conn
                            .execute(
                                &format!(
                                    "UPDATE {} SET version = ?1, document = ?2, patches = ?3, \
                                     extra = ?4 WHERE id = ?5 AND version = ?6",
                                    table(collection)?
                                ),
                                params![version, document, patches, extra, id, expected as i64],
                            )
                            .map_err(|e| Error::Store(e.to_string()))?;

                        if affected == 0 {
                            let current: Option<i64> = conn
                                .query_row(
                                    &format!(
                                        "SELECT version FROM {} WHERE id = ?1",
                                        table(collection)?
                                    ),
                                    params![id],
                                    |row| row.get(0),
                                )
                                .optional()
                                .map_err(|e| Error::Store(e.to_string()))?;
                            return match current {
                                Some(stored) => Err(Error::VersionConflict {
                                    expected,
                                    stored: stored as u64,
                                }),
                                None => Err(entry_not_found(collection, id)),
                            };
                        }
                    }
                    None => {
                        conn.execute(
                            &format!(
                                "INSERT INTO {} (id, version, document, patches, extra) \
                                 VALUES (?1, ?2, ?3, ?4, ?5) \
                                 ON CONFLICT(id) DO UPDATE SET \
                                     version = excluded.version, \
                                     document = excluded.document, \
                                     patches = excluded.patches, \
                                     extra = excluded.extra",
                                table(collection)?
                            ),
                            params![id, version, document, patches, extra],
                        )
                        .map_err(|e| Error::Store(e.to_string()))?;
                    }
                }
                Ok(id.to_string())
            }
            None => {
                let id = Uuid::new_v4().simple().to_string();
                conn.execute(
                    &format!(
                        "INSERT INTO {} (id, version, document, patches, extra) \
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        table(collection)?
                    ),
                    params![id, version, document, patches, extra],
                )
                .map_err(|e| Error::Store(e.to_string()))?;
                Ok(id)
            }
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        if !table_exists(&conn, collection)? {
            return Err(collection_not_found(collection));
        }

        let affected = conn
            .execute(
                &format!("DELETE FROM {} WHERE id = ?1", table(collection)?),
                params![id],
            )
            .map_err(|e| Error::Store(e.to_string()))?;
        if affected == 0 {
            return Err(entry_not_found(collection, id));
        }

        let remaining: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", table(collection)?),
                [],
                |row| row.get(0),
            )
            .map_err(|e| Error::Store(e.to_string()))?;
        if remaining == 0 {
            conn.execute_batch(&format!("DROP TABLE {}", table(collection)?))
                .map_err(|e| Error::Store(e.to_string()))?;
        }
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        if !self.mode.allows_reset() {
            return Err(reset_not_permitted());
        }

        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table' \
                 AND name LIKE 'doc\\_%' ESCAPE '\\'",
            )
            .map_err(|e| Error::Store(e.to_string()))?;
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| Error::Store(e.to_string()))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);

        for name in names {
            conn.execute_batch(&format!("DROP TABLE \"{}\"", name))
                .map_err(|e| Error::Store(e.to_string()))?;
        }
        Ok(())
    }

    fn set_filter(&self, filter: Arc<dyn ReadFilter>) {
        *self.filter.write() = Some(filter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FieldEquals;
    use quire_core::{OpKind, Operation, Patch};
    use serde_json::json;

    fn envelope(document: serde_json::Value) -> Envelope {
        Envelope::new(document.as_object().unwrap().clone())
    }

    fn envelope_at(document: serde_json::Value, version: u64) -> Envelope {
        let patches = (0..version)
            .map(|v| Patch {
                version: v,
                operations: vec![Operation {
                    op: OpKind::Add,
                    path: "/x".into(),
                    value: json!(v),
                }],
            })
            .collect();
        Envelope::with_history(document.as_object().unwrap().clone(), version, patches).unwrap()
    }

    #[tokio::test]
    async fn test_sqlite_crud() {
        let store = SqliteStore::in_memory(RuntimeMode::Test).unwrap();

        let id = store
            .write("orders", None, &envelope(json!({"total": 10})), None)
            .await
            .unwrap();
        assert!(Uuid::parse_str(&id).is_ok());

        let read = store.read("orders", &id).await.unwrap().unwrap();
        assert_eq!(read.version, 0);
        assert_eq!(read.document, *json!({"total": 10}).as_object().unwrap());

        assert!(store.exists("orders", &id).await.unwrap());
        store.delete("orders", &id).await.unwrap();
        assert!(!store.exists("orders", &id).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_collection_is_not_found() {
        let store = SqliteStore::in_memory(RuntimeMode::Test).unwrap();

        assert!(matches!(
            store.read("orders", "0000").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            store.read_many("orders").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            store.delete("orders", "0000").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_with_bad_id_is_store_error() {
        let store = SqliteStore::in_memory(RuntimeMode::Test).unwrap();

        let result = store
            .write("orders", Some("not-a-uuid"), &envelope(json!({})), None)
            .await;
        assert!(matches!(result, Err(Error::Store(_))));
    }

    #[tokio::test]
    async fn test_conditional_write_conflicts() {
        let store = SqliteStore::in_memory(RuntimeMode::Test).unwrap();

        let id = store
            .write("orders", None, &envelope(json!({"n": 0})), None)
            .await
            .unwrap();

        // Stored version is 0: guard at 0 passes and moves it to 1.
        store
            .write("orders", Some(id.as_str()), &envelope_at(json!({"n": 1}), 1), Some(0))
            .await
            .unwrap();

        // A second writer still expecting 0 loses the race.
        let result = store
            .write("orders", Some(id.as_str()), &envelope_at(json!({"n": 2}), 1), Some(0))
            .await;
        assert!(matches!(
            result,
            Err(Error::VersionConflict { expected: 0, stored: 1 })
        ));

        let read = store.read("orders", &id).await.unwrap().unwrap();
        assert_eq!(read.version, 1);
        assert_eq!(read.document, *json!({"n": 1}).as_object().unwrap());
    }

    #[tokio::test]
    async fn test_conditional_write_on_missing_row_is_not_found() {
        let store = SqliteStore::in_memory(RuntimeMode::Test).unwrap();
        store
            .write("orders", None, &envelope(json!({})), None)
            .await
            .unwrap();

        let ghost = Uuid::new_v4().simple().to_string();
        let result = store
            .write("orders", Some(ghost.as_str()), &envelope_at(json!({}), 1), Some(0))
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_last_row_drops_collection() {
        let store = SqliteStore::in_memory(RuntimeMode::Test).unwrap();

        let id = store
            .write("orders", None, &envelope(json!({})), None)
            .await
            .unwrap();
        store.delete("orders", &id).await.unwrap();

        assert!(matches!(
            store.read_many("orders").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_filter_is_applied_as_query_clause() {
        let store = SqliteStore::in_memory(RuntimeMode::Test).unwrap();

        let visible = store
            .write("docs", None, &envelope(json!({"owner": "alice"})), None)
            .await
            .unwrap();
        let hidden = store
            .write("docs", None, &envelope(json!({"owner": "bob"})), None)
            .await
            .unwrap();

        store.set_filter(Arc::new(FieldEquals::new("owner", json!("alice"))));

        assert!(store.read("docs", &visible).await.unwrap().is_some());
        assert!(store.read("docs", &hidden).await.unwrap().is_none());

        let envelopes = store.read_many("docs").await.unwrap();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].id.as_deref(), Some(visible.as_str()));
    }

    #[tokio::test]
    async fn test_read_many_preserves_write_order() {
        let store = SqliteStore::in_memory(RuntimeMode::Test).unwrap();

        let mut ids = Vec::new();
        for n in 0..5 {
            ids.push(
                store
                    .write("orders", None, &envelope(json!({"n": n})), None)
                    .await
                    .unwrap(),
            );
        }

        let order: Vec<String> = store
            .read_many("orders")
            .await
            .unwrap()
            .into_iter()
            .filter_map(|e| e.id)
            .collect();
        assert_eq!(order, ids);
    }

    #[tokio::test]
    async fn test_invalid_collection_name_is_store_error() {
        let store = SqliteStore::in_memory(RuntimeMode::Test).unwrap();

        let result = store
            .write("bad name; --", None, &envelope(json!({})), None)
            .await;
        assert!(matches!(result, Err(Error::Store(_))));
    }

    #[tokio::test]
    async fn test_reset_requires_test_or_development_mode() {
        let store = SqliteStore::in_memory(RuntimeMode::Production).unwrap();
        store
            .write("orders", None, &envelope(json!({})), None)
            .await
            .unwrap();

        assert!(matches!(store.reset().await, Err(Error::NotPermitted(_))));
        assert_eq!(store.read_many("orders").await.unwrap().len(), 1);

        let store = SqliteStore::in_memory(RuntimeMode::Test).unwrap();
        store
            .write("orders", None, &envelope(json!({})), None)
            .await
            .unwrap();
        store.reset().await.unwrap();
        assert!(store.read_many("orders").await.is_err());
    }
}
