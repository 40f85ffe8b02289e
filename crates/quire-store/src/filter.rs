//! Read-side filter capability
//!
//! A store instance carries at most one filter, consulted on every read.
//! Filtering happens in different places per backend, so the capability has
//! two shapes: the memory and file stores call [`ReadFilter::accepts`] per
//! envelope in process, while the sqlite store pushes
//! [`ReadFilter::sql_clause`] into its SELECT as a native WHERE fragment and
//! rejects filters that cannot produce one.

use quire_core::Envelope;
use serde_json::Value;

/// Filter over envelopes, installed once per store instance.
pub trait ReadFilter: Send + Sync {
    /// In-process predicate. A rejected envelope reads as absent, not as an
    /// error.
    fn accepts(&self, envelope: &Envelope) -> bool;

    /// Native selection clause for the database store. `None` means this
    /// filter cannot be pushed down into a query.
    fn sql_clause(&self) -> Option<SqlClause> {
        None
    }
}

/// A WHERE fragment over envelope rows. `clause` may reference the
/// `document` JSON column; `?` placeholders bind `params` in order.
#[derive(Debug, Clone)]
pub struct SqlClause {
    pub clause: String,
    pub params: Vec<Value>,
}

/// Adapter matching a top-level document field against a value. Implements
/// both capability shapes, so it works on every backend.
pub struct FieldEquals {
    pub field: String,
    pub value: Value,
}

impl FieldEquals {
    pub fn new(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }
}

impl ReadFilter for FieldEquals {
    fn accepts(&self, envelope: &Envelope) -> bool {
        envelope.document.get(&self.field) == Some(&self.value)
    }

    fn sql_clause(&self) -> Option<SqlClause> {
        Some(SqlClause {
            clause: "json_extract(document, ?) = ?".into(),
            params: vec![
                Value::String(format!("$.{}", self.field)),
                self.value.clone(),
            ],
        })
    }
}
