use std::sync::Arc;

use serde_json::Value;
use time::Duration;

use expin_core::{Area, MoveReport, NamedDocument};

use crate::{
    cache::TtlCache,
    clock::Clock,
    storage::{DocumentStore, StorageError},
};

/// Document store with its listings cached per area.
///
/// Every successful mutation clears the whole listing cache, so a listing
/// taken after `put`, `delete`, `purge` or a move reflects it even inside the
/// TTL window. A listing already in flight when a mutation lands may still
/// store a stale result.
pub struct CachedDocuments {
    store: Arc<dyn DocumentStore>,
    listings: TtlCache<Area, Vec<String>>,
}

impl CachedDocuments {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, ttl: Option<Duration>) -> Self {
        Self {
            store,
            listings: TtlCache::new(clock, ttl),
        }
    }

    pub fn put(&self, raw_name: &str, content: &Value) -> Result<String, StorageError> {
        let id = self.store.put(raw_name, content)?;
        self.invalidate();
        metrics::increment_counter!("expin_documents_written_total");
        Ok(id)
    }

    pub fn get(&self, name: &str) -> Result<NamedDocument, StorageError> {
        self.store.get(name)
    }

    pub fn list(&self, area: Area, force: bool) -> Result<Vec<String>, StorageError> {
        self.listings.get_or_fetch(area, force, || {
            tracing::debug!(%area, "Listing documents from backend");
            self.store.list(area)
        })
    }

    pub fn delete(&self, name: &str) -> Result<(), StorageError> {
        self.store.delete(name)?;
        self.invalidate();
        Ok(())
    }

    pub fn move_documents(&self, names: &[String], from: Area, to: Area) -> MoveReport {
        let report = self.store.move_documents(names, from, to);
        if !report.moved.is_empty() {
            self.invalidate();
        }
        report
    }

    pub fn purge(&self, area: Area) -> Result<usize, StorageError> {
        let removed = self.store.purge(area)?;
        self.invalidate();
        Ok(removed)
    }

    fn invalidate(&self) {
        self.listings.clear();
        tracing::debug!("Document listing cache invalidated");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use crate::{clock::ManualClock, storage::InMemoryDocumentStore};

    use super::*;

    /// Counts backend listings.
    #[derive(Default)]
    struct CountingStore {
        inner: InMemoryDocumentStore,
        lists: AtomicUsize,
    }

    impl DocumentStore for CountingStore {
        fn put(&self, raw_name: &str, content: &Value) -> Result<String, StorageError> {
            self.inner.put(raw_name, content)
        }
        fn get(&self, name: &str) -> Result<NamedDocument, StorageError> {
            self.inner.get(name)
        }
        fn list(&self, area: Area) -> Result<Vec<String>, StorageError> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            self.inner.list(area)
        }
        fn delete(&self, name: &str) -> Result<(), StorageError> {
            self.inner.delete(name)
        }
        fn relocate(&self, name: &str, from: Area, to: Area) -> Result<(), StorageError> {
            self.inner.relocate(name, from, to)
        }
        fn purge(&self, area: Area) -> Result<usize, StorageError> {
            self.inner.purge(area)
        }
    }

    fn setup() -> (Arc<CountingStore>, Arc<ManualClock>, CachedDocuments) {
        let store = Arc::new(CountingStore::default());
        let clock = Arc::new(ManualClock::default());
        let docs = CachedDocuments::new(store.clone(), clock.clone(), Some(Duration::milliseconds(5000)));
        (store, clock, docs)
    }

    #[test]
    fn test_listing_is_served_from_cache_within_ttl() {
        let (store, clock, docs) = setup();
        store.inner.put("a", &json!({})).unwrap();

        assert_eq!(docs.list(Area::Active, false).unwrap(), vec!["a"]);
        clock.advance(Duration::milliseconds(1000));
        assert_eq!(docs.list(Area::Active, false).unwrap(), vec!["a"]);
        assert_eq!(store.lists.load(Ordering::SeqCst), 1);

        docs.list(Area::Active, true).unwrap();
        assert_eq!(store.lists.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_areas_are_cached_separately() {
        let (store, _clock, docs) = setup();
        docs.list(Area::Active, false).unwrap();
        docs.list(Area::Downloaded, false).unwrap();
        docs.list(Area::Downloaded, false).unwrap();
        assert_eq!(store.lists.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_put_and_delete_invalidate_within_ttl() {
        let (_store, _clock, docs) = setup();
        assert!(docs.list(Area::Active, false).unwrap().is_empty());

        docs.put("Q1 Report", &json!({"total": 500})).unwrap();
        assert_eq!(docs.list(Area::Active, false).unwrap(), vec!["Q1_Report"]);

        docs.delete("Q1_Report").unwrap();
        assert!(docs.list(Area::Active, false).unwrap().is_empty());
    }

    #[test]
    fn test_failed_mutations_keep_the_cache() {
        let (store, _clock, docs) = setup();
        docs.list(Area::Active, false).unwrap();

        assert!(docs.put("   ", &json!({})).is_err());
        assert!(docs.delete("ghost").is_err());
        let report = docs.move_documents(&["ghost".to_string()], Area::Active, Area::Downloaded);
        assert!(report.moved.is_empty());

        docs.list(Area::Active, false).unwrap();
        assert_eq!(store.lists.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_move_and_purge_invalidate_both_areas() {
        let (_store, _clock, docs) = setup();
        docs.put("jan", &json!({})).unwrap();
        assert_eq!(docs.list(Area::Active, false).unwrap(), vec!["jan"]);
        assert!(docs.list(Area::Downloaded, false).unwrap().is_empty());

        let report = docs.move_documents(&["jan".to_string()], Area::Active, Area::Downloaded);
        assert!(report.is_complete());
        assert!(docs.list(Area::Active, false).unwrap().is_empty());
        assert_eq!(docs.list(Area::Downloaded, false).unwrap(), vec!["jan"]);

        assert_eq!(docs.purge(Area::Downloaded).unwrap(), 1);
        assert!(docs.list(Area::Downloaded, false).unwrap().is_empty());
    }
}
