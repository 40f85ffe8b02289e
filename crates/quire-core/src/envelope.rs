//! Versioned document envelope

use crate::error::{Error, Result};
use crate::patch::{Document, Patch};
use serde::{Deserialize, Serialize};
use serde_json::Map;

/// The versioned container for a document, its version counter, and its
/// patch history.
///
/// `version` starts at 0 and moves by exactly 1 per accepted mutation;
/// `patches[i].version` is the version the document had *before* that patch
/// applied, so patch `i` transforms version `i` into `i + 1`.
///
/// `patches` and `extra` are `Option` because transport responses carry
/// detached copies with both stripped; an envelope built for mutation always
/// has them populated. Appending a patch to a detached envelope is an
/// `InvalidState` error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub version: u64,
    pub document: Document,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patches: Option<Vec<Patch>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Document>,
}

/// Persisted representation of an envelope. The id lives outside this value
/// (map key for the memory/file stores, row id for sqlite).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEnvelope {
    pub version: u64,
    pub document: Document,
    #[serde(default)]
    pub patches: Vec<Patch>,
    #[serde(default)]
    pub extra: Document,
}

impl Envelope {
    /// New envelope at version 0 with an empty history.
    pub fn new(document: Document) -> Self {
        Self {
            id: None,
            version: 0,
            document,
            patches: Some(Vec::new()),
            extra: Some(Map::new()),
        }
    }

    /// Reconstruct an envelope at a given version with its history.
    ///
    /// A non-zero version with no patches is an `InvalidState`: every version
    /// bump must have a recorded patch behind it.
    pub fn with_history(document: Document, version: u64, patches: Vec<Patch>) -> Result<Self> {
        if version > 0 && patches.is_empty() {
            return Err(Error::InvalidState(
                "non-zero version must carry patches".into(),
            ));
        }
        Ok(Self {
            id: None,
            version,
            document,
            patches: Some(patches),
            extra: Some(Map::new()),
        })
    }

    /// Rebuild an envelope from its persisted representation, attaching `id`.
    pub fn from_stored(id: impl Into<String>, stored: StoredEnvelope) -> Result<Self> {
        let mut envelope = Self::with_history(stored.document, stored.version, stored.patches)?;
        envelope.id = Some(id.into());
        envelope.extra = Some(stored.extra);
        Ok(envelope)
    }

    /// Persisted form of this envelope.
    pub fn to_stored(&self) -> Result<StoredEnvelope> {
        let patches = match &self.patches {
            Some(patches) => patches.clone(),
            None if self.version == 0 => Vec::new(),
            None => {
                return Err(Error::InvalidState(
                    "non-zero version without patch history".into(),
                ))
            }
        };
        Ok(StoredEnvelope {
            version: self.version,
            document: self.document.clone(),
            patches,
            extra: self.extra.clone().unwrap_or_default(),
        })
    }

    /// Append a recorded patch. The caller bumps `version` in lockstep; the
    /// envelope does not auto-increment.
    pub fn append_patch(&mut self, patch: Patch) -> Result<()> {
        self.patches
            .as_mut()
            .ok_or_else(|| Error::InvalidState("missing patch list".into()))?
            .push(patch);
        Ok(())
    }

    /// The ordered patches recorded from `version` onward.
    ///
    /// Asking for a strictly positive version that yields nothing is a
    /// `NotFound`: that version was never recorded. Version 0 with no history
    /// is simply an empty answer.
    pub fn patches_since(&self, version: u64) -> Result<Vec<Patch>> {
        let patches = self
            .patches
            .as_ref()
            .ok_or_else(|| Error::InvalidState("missing patch list".into()))?;

        let matched: Vec<Patch> = patches
            .iter()
            .filter(|patch| patch.version >= version)
            .cloned()
            .collect();

        if version > 0 && matched.is_empty() {
            return Err(Error::NotFound(format!("patch version {} not found", version)));
        }
        Ok(matched)
    }

    /// Copy for transport responses: patches and extra stripped.
    pub fn detached(&self) -> Self {
        Self {
            id: self.id.clone(),
            version: self.version,
            document: self.document.clone(),
            patches: None,
            extra: None,
        }
    }
}
