//! Error types for Quire

use thiserror::Error;

/// Failure taxonomy shared across the Quire crates.
///
/// Every variant is reported synchronously to the immediate caller; nothing
/// is retried internally. The transport layer owns the mapping from these
/// kinds onto its own status codes.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Version {expected} differs from stored version {stored}")]
    VersionConflict { expected: u64, stored: u64 },

    #[error("Invalid operations: {0}")]
    Validation(String),

    #[error("Patch failed to apply: {0}")]
    PatchApply(String),

    #[error("Invalid envelope state: {0}")]
    InvalidState(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Not permitted: {0}")]
    NotPermitted(String),
}

/// Result type alias for Quire operations
pub type Result<T> = std::result::Result<T, Error>;
