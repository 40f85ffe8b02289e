//! Quire Storage Backends
//!
//! Pluggable storage for versioned document envelopes:
//! - Memory (default): fast, volatile storage
//! - File: the same structure mirrored to a single JSON file
//! - SQLite: embedded database persistence
//!
//! All variants expose the same contract; the differences (durability,
//! id generation, how the read filter is applied) are noted per backend.

pub mod file;
pub mod filter;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use quire_core::{Envelope, Error, Result};

/// Storage backend trait.
///
/// A store owns the canonical envelope for each (collection, id) pair;
/// reads hand out copies, never live references.
#[async_trait]
pub trait Store: Send + Sync {
    /// Whether the pair exists, ignoring any installed filter.
    async fn exists(&self, collection: &str, id: &str) -> Result<bool>;

    /// Read one envelope.
    ///
    /// `NotFound` when the collection or id is absent. `Ok(None)` when the
    /// envelope exists but the installed filter rejects it — callers cannot
    /// tell "filtered out" from "not visible to me".
    async fn read(&self, collection: &str, id: &str) -> Result<Option<Envelope>>;

    /// Read every envelope in a collection that passes the filter, in the
    /// collection's natural order. `NotFound` when the collection is unknown.
    async fn read_many(&self, collection: &str) -> Result<Vec<Envelope>>;

    /// Write an envelope, returning the effective id.
    ///
    /// Absent id: a fresh id is generated and a new entry created. Present
    /// id: the entry is replaced wholesale. When `expected_version` is set
    /// the write commits only if the stored version still equals it —
    /// `VersionConflict` otherwise, `NotFound` when the entry is gone. The
    /// check runs under the store's own write exclusion, so it is the
    /// compare-and-swap boundary for optimistic concurrency.
    ///
    /// Durable variants flush to their backing medium on every write.
    async fn write(
        &self,
        collection: &str,
        id: Option<&str>,
        envelope: &Envelope,
        expected_version: Option<u64>,
    ) -> Result<String>;

    /// Delete an entry. `NotFound` under the same conditions as `read`.
    /// A collection emptied by the delete is removed entirely.
    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    /// Clear all state. `NotPermitted` unless the runtime mode is test or
    /// development — a hard precondition, not a warning.
    async fn reset(&self) -> Result<()>;

    /// Install (or replace) the read filter for this store instance.
    /// Applies to every subsequent read; not retroactive.
    fn set_filter(&self, filter: Arc<dyn ReadFilter>);
}

/// Runtime mode of the process, gating destructive operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuntimeMode {
    #[default]
    Production,
    Development,
    Test,
}

impl RuntimeMode {
    pub fn allows_reset(self) -> bool {
        matches!(self, RuntimeMode::Development | RuntimeMode::Test)
    }
}

impl std::fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeMode::Production => write!(f, "production"),
            RuntimeMode::Development => write!(f, "development"),
            RuntimeMode::Test => write!(f, "test"),
        }
    }
}

impl FromStr for RuntimeMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Ok(RuntimeMode::Production),
            "development" | "dev" => Ok(RuntimeMode::Development),
            "test" => Ok(RuntimeMode::Test),
            _ => Err(Error::Validation(format!("Unknown runtime mode: {}", s))),
        }
    }
}

pub(crate) fn reset_not_permitted() -> Error {
    Error::NotPermitted("store reset only allowed in test or development mode".into())
}

/// Random id in an expanding numeric-string space: start with one digit and
/// widen on collision, so ids stay short in small collections without ever
/// relying on probabilistic uniqueness alone.
pub(crate) fn random_id<T>(taken: &indexmap::IndexMap<String, T>) -> String {
    use rand::Rng;

    let mut rng = rand::thread_rng();
    let mut digits: u32 = 1;
    loop {
        let candidate = rng.gen_range(0..10u64.pow(digits)).to_string();
        if !taken.contains_key(&candidate) {
            return candidate;
        }
        if digits <= 6 {
            digits += 1;
        }
    }
}

pub use file::FileStore;
pub use filter::{FieldEquals, ReadFilter, SqlClause};
pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
