//! Quire Version Control Protocol
//!
//! Turns "replace this document" and "apply these operations" requests into
//! a consistent version bump plus an appended patch record, with optimistic
//! concurrency enforced per (collection, id) key. Sits above the storage
//! backends and the patch codec.

pub mod service;

pub use service::DocumentService;
