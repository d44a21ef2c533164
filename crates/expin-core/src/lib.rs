//! Core types and traits for expin storage backends.
//!
//! This crate provides the `RecordStore` and `DocumentStore` traits together
//! with the ledger types they carry, so backends can be implemented outside
//! the service crate.

pub mod models;
pub mod sanitize;
pub mod storage;

// Re-export key types at crate root for convenience
pub use models::{Area, EntryKind, LedgerEntry, LedgerSummary, MoveReport, NamedDocument};
pub use sanitize::{document_name, sanitize_name};
pub use storage::{DocumentStore, RecordStore, StorageError};
