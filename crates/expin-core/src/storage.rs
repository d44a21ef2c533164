use serde_json::Value;
use thiserror::Error;

use crate::models::{Area, LedgerEntry, LedgerSummary, MoveReport, NamedDocument};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{0}")]
    Validation(String),
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("remote error: {0}")]
    Remote(String),
    #[error("{0}")]
    Other(String),
}

/// Persists the live ledger as one ordered collection.
pub trait RecordStore: Send + Sync {
    /// Returns the stored collection, or an empty one when nothing was saved yet.
    fn load(&self) -> Result<Vec<LedgerEntry>, StorageError>;

    /// Replaces the whole collection.
    fn save(&self, entries: &[LedgerEntry]) -> Result<(), StorageError>;

    /// Adds one entry at the end and returns the new length.
    fn append(&self, entry: &LedgerEntry) -> Result<usize, StorageError>;

    fn clear(&self) -> Result<(), StorageError> {
        self.save(&[])
    }

    fn summary(&self) -> Result<LedgerSummary, StorageError> {
        LedgerSummary::from_entries(&self.load()?)
    }
}

/// Persists JSON documents under sanitized names.
///
/// `put`, `get` and `delete` work on the [`Area::Active`] area; documents
/// only reach [`Area::Downloaded`] through [`DocumentStore::relocate`].
pub trait DocumentStore: Send + Sync {
    /// Creates or overwrites a document and returns its backend identifier.
    fn put(&self, raw_name: &str, content: &Value) -> Result<String, StorageError>;
    fn get(&self, name: &str) -> Result<NamedDocument, StorageError>;
    fn list(&self, area: Area) -> Result<Vec<String>, StorageError>;
    fn delete(&self, name: &str) -> Result<(), StorageError>;
    fn relocate(&self, name: &str, from: Area, to: Area) -> Result<(), StorageError>;

    /// Deletes every document in `area` and returns how many were removed.
    fn purge(&self, area: Area) -> Result<usize, StorageError>;

    /// Best-effort bulk relocation. Each name is attempted on its own and
    /// failures do not undo earlier moves.
    fn move_documents(&self, names: &[String], from: Area, to: Area) -> MoveReport {
        let mut report = MoveReport::default();
        for name in names {
            match self.relocate(name, from, to) {
                Ok(()) => report.moved.push(name.clone()),
                Err(e) => report.errors.push(format!("Failed to move {}: {}", name, e)),
            }
        }
        report
    }
}
