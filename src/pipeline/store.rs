//! Process-local document store owned by the orchestrator.

use crate::document::WorkItem;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Serializes work on one key; see [`DocumentStore::flight_gate`].
pub type FlightGate = Arc<tokio::sync::Mutex<()>>;

#[derive(Default)]
struct StoreInner {
    items: HashMap<String, WorkItem>,
    order: Vec<String>,
    flights: HashMap<String, FlightGate>,
}

/// Work items in submission order, plus the in-flight gates used for single-flight
/// submission. Every method holds the lock only for a map operation.
#[derive(Default)]
pub struct DocumentStore {
    inner: Mutex<StoreInner>,
}

impl DocumentStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new item. An item with the same id is replaced in place.
    pub fn insert(&self, item: WorkItem) {
        let mut inner = self.lock();
        if !inner.items.contains_key(&item.id) {
            inner.order.push(item.id.clone());
        }
        inner.items.insert(item.id.clone(), item);
    }

    /// Overwrite an existing item. Returns `false`, storing nothing, when the id was
    /// deleted in the meantime.
    pub fn replace_if_present(&self, item: &WorkItem) -> bool {
        let mut inner = self.lock();
        match inner.items.get_mut(&item.id) {
            Some(existing) => {
                *existing = item.clone();
                true
            }
            None => false,
        }
    }

    /// Item with `id`, if present.
    pub fn get(&self, id: &str) -> Option<WorkItem> {
        self.lock().items.get(id).cloned()
    }

    /// Whether `id` is present.
    pub fn contains(&self, id: &str) -> bool {
        self.lock().items.contains_key(id)
    }

    /// Remove and return the item with `id`.
    pub fn remove(&self, id: &str) -> Option<WorkItem> {
        let mut inner = self.lock();
        let removed = inner.items.remove(id)?;
        inner.order.retain(|existing| existing != id);
        Some(removed)
    }

    /// Up to `limit` items after skipping `offset`, in submission order.
    pub fn list(&self, limit: usize, offset: usize) -> Vec<WorkItem> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .skip(offset)
            .take(limit)
            .filter_map(|id| inner.items.get(id).cloned())
            .collect()
    }

    /// Copy of every item, in submission order.
    pub fn snapshot(&self) -> Vec<WorkItem> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.items.get(id).cloned())
            .collect()
    }

    /// Number of stored items.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gate shared by every caller working on `key`. Callers lock it for the duration of
    /// their work and hand it back with [`Self::release_flight_gate`].
    pub fn flight_gate(&self, key: &str) -> FlightGate {
        self.lock()
            .flights
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// Forget the gate for `key` once nobody else holds it. `gate` is consumed so the
    /// caller's own handle does not count as a holder.
    pub fn release_flight_gate(&self, key: &str, gate: FlightGate) {
        drop(gate);
        let mut inner = self.lock();
        if inner
            .flights
            .get(key)
            .is_some_and(|gate| Arc::strong_count(gate) == 1)
        {
            inner.flights.remove(key);
        }
    }

    /// Number of keys with a live gate.
    pub fn in_flight(&self) -> usize {
        self.lock().flights.len()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::SourceDocument;
    use time::OffsetDateTime;

    fn item(id: &str) -> WorkItem {
        let source = SourceDocument::new(format!("{id}.txt"), b"x".to_vec());
        WorkItem::pending(id.into(), &source, None, OffsetDateTime::UNIX_EPOCH)
    }

    #[test]
    fn list_keeps_submission_order_and_pages() {
        let store = DocumentStore::new();
        for id in ["a", "b", "c", "d"] {
            store.insert(item(id));
        }
        store.remove("b");

        let ids: Vec<String> = store.list(2, 1).into_iter().map(|item| item.id).collect();
        assert_eq!(ids, vec!["c".to_string(), "d".to_string()]);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn replace_does_not_resurrect_deleted_items() {
        let store = DocumentStore::new();
        let mut stored = item("a");
        store.insert(stored.clone());
        assert!(store.remove("a").is_some());

        stored.filename = "renamed.txt".into();
        assert!(!store.replace_if_present(&stored));
        assert!(store.get("a").is_none());
        assert!(store.remove("a").is_none());
    }

    #[tokio::test]
    async fn flight_gates_are_shared_then_released() {
        let store = DocumentStore::new();
        let first = store.flight_gate("fp");
        let second = store.flight_gate("fp");
        assert!(Arc::ptr_eq(&first, &second));

        let held = first.lock().await;
        assert!(second.try_lock().is_err());
        drop(held);

        store.release_flight_gate("fp", first);
        assert_eq!(store.in_flight(), 1);
        store.release_flight_gate("fp", second);
        assert_eq!(store.in_flight(), 0);
    }
}
