use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        PoisonError, RwLock,
    },
};

use serde_json::{Map, Value};

use expin_core::{document_name, Area, LedgerEntry, NamedDocument};

// Re-export core storage types so callers can depend on crate::storage alone
pub use expin_core::storage::{DocumentStore, RecordStore, StorageError};
pub use expin_core::MoveReport;

#[derive(Default)]
pub struct InMemoryRecordStore {
    entries: RwLock<Vec<LedgerEntry>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn load(&self) -> Result<Vec<LedgerEntry>, StorageError> {
        Ok(self.entries.read().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, entries: &[LedgerEntry]) -> Result<(), StorageError> {
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = entries.to_vec();
        tracing::debug!(count = entries.len(), "Ledger replaced");
        Ok(())
    }

    fn append(&self, entry: &LedgerEntry) -> Result<usize, StorageError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.push(entry.clone());
        Ok(entries.len())
    }
}

struct StoredDocument {
    content: Map<String, Value>,
    sequence: u64,
}

/// Document store kept entirely in memory. Listings are ordered most recently
/// written first.
pub struct InMemoryDocumentStore {
    documents: RwLock<BTreeMap<(Area, String), StoredDocument>>,
    sequence_counter: AtomicU64,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
            sequence_counter: AtomicU64::new(1),
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence_counter.fetch_add(1, Ordering::SeqCst)
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn put(&self, raw_name: &str, content: &Value) -> Result<String, StorageError> {
        let doc = NamedDocument::new(raw_name, content)?;
        let stored = StoredDocument {
            content: doc.content,
            sequence: self.next_sequence(),
        };
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((Area::Active, doc.name.clone()), stored);
        Ok(doc.name)
    }

    fn get(&self, name: &str) -> Result<NamedDocument, StorageError> {
        let name = document_name(name)?;
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        let stored = documents
            .get(&(Area::Active, name.clone()))
            .ok_or_else(|| StorageError::NotFound(name.clone()))?;
        Ok(NamedDocument {
            name,
            content: stored.content.clone(),
        })
    }

    fn list(&self, area: Area) -> Result<Vec<String>, StorageError> {
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<(u64, String)> = documents
            .iter()
            .filter(|((a, _), _)| *a == area)
            .map(|((_, name), stored)| (stored.sequence, name.clone()))
            .collect();
        names.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(names.into_iter().map(|(_, name)| name).collect())
    }

    fn delete(&self, name: &str) -> Result<(), StorageError> {
        let name = document_name(name)?;
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(Area::Active, name.clone()))
            .map(|_| ())
            .ok_or(StorageError::NotFound(name))
    }

    fn relocate(&self, name: &str, from: Area, to: Area) -> Result<(), StorageError> {
        let name = document_name(name)?;
        if from == to {
            return Err(StorageError::Validation(format!("{} is already in {}", name, to)));
        }
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        let stored = documents
            .remove(&(from, name.clone()))
            .ok_or_else(|| StorageError::NotFound(name.clone()))?;
        documents.insert((to, name), stored);
        Ok(())
    }

    fn purge(&self, area: Area) -> Result<usize, StorageError> {
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        let before = documents.len();
        documents.retain(|(a, _), _| *a != area);
        Ok(before - documents.len())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use serde_json::json;
    use time::macros::date;

    use expin_core::EntryKind;

    use super::*;

    fn entry(title: &str) -> LedgerEntry {
        LedgerEntry {
            kind: EntryKind::Expense,
            title: title.to_string(),
            amount: dec!(12.40),
            source: "card".to_string(),
            notes: String::new(),
            date: date!(2024 - 02 - 29),
        }
    }

    #[test]
    fn test_record_store_starts_empty() {
        let store = InMemoryRecordStore::new();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_record_store_save_replaces_and_append_extends() {
        let store = InMemoryRecordStore::new();
        store.save(&[entry("a"), entry("b")]).unwrap();
        store.save(&[entry("c")]).unwrap();
        assert_eq!(store.load().unwrap(), vec![entry("c")]);

        assert_eq!(store.append(&entry("d")).unwrap(), 2);
        assert_eq!(store.load().unwrap(), vec![entry("c"), entry("d")]);

        store.clear().unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_document_put_get_overwrite_delete() {
        let store = InMemoryDocumentStore::new();
        assert_eq!(store.put("Q1 Report", &json!({"total": 500})).unwrap(), "Q1_Report");
        assert_eq!(store.get("Q1_Report").unwrap().content["total"], 500);

        store.put("Q1 Report", &json!({"total": 750})).unwrap();
        assert_eq!(store.get("Q1_Report.json").unwrap().content["total"], 750);

        store.delete("Q1_Report").unwrap();
        assert!(matches!(store.get("Q1_Report"), Err(StorageError::NotFound(_))));
        assert!(matches!(store.delete("Q1_Report"), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_document_list_is_most_recent_first() {
        let store = InMemoryDocumentStore::new();
        store.put("first", &json!({})).unwrap();
        store.put("second", &json!({})).unwrap();
        store.put("first", &json!({"rewritten": true})).unwrap();
        assert_eq!(store.list(Area::Active).unwrap(), vec!["first", "second"]);
        assert!(store.list(Area::Downloaded).unwrap().is_empty());
    }

    #[test]
    fn test_move_documents_reports_partial_success() {
        let store = InMemoryDocumentStore::new();
        store.put("jan", &json!({"n": 1})).unwrap();

        let names = vec!["jan.json".to_string(), "feb.json".to_string()];
        let report = store.move_documents(&names, Area::Active, Area::Downloaded);
        assert_eq!(report.moved, vec!["jan.json"]);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("feb.json"));

        assert!(store.list(Area::Active).unwrap().is_empty());
        assert_eq!(store.list(Area::Downloaded).unwrap(), vec!["jan"]);
    }

    #[test]
    fn test_purge_only_touches_one_area() {
        let store = InMemoryDocumentStore::new();
        store.put("a", &json!({})).unwrap();
        store.put("b", &json!({})).unwrap();
        store.relocate("a", Area::Active, Area::Downloaded).unwrap();

        assert_eq!(store.purge(Area::Active).unwrap(), 1);
        assert!(store.list(Area::Active).unwrap().is_empty());
        assert_eq!(store.list(Area::Downloaded).unwrap(), vec!["a"]);
    }
}
