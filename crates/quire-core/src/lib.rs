//! Quire Core - Envelope Model and Patch Codec
//!
//! This crate provides the core value types for Quire:
//! - Versioned document envelopes with append-only patch history
//! - A pure structural diff/apply codec over JSON documents
//! - The error taxonomy shared by every Quire crate

pub mod envelope;
pub mod error;
pub mod patch;

pub use envelope::{Envelope, StoredEnvelope};
pub use error::{Error, Result};
pub use patch::{diff, apply, validate_operations, Document, OpKind, Operation, Patch};
