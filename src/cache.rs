//! Time-bounded memoization keyed by input fingerprints.

use crate::clock::SharedClock;
use crate::document::{Metadata, SourceDocument};
use crate::metrics::PipelineMetrics;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// TTL cache with a bounded number of entries.
///
/// Expired entries are dropped on lookup and before eviction; when the cache is full the
/// oldest-inserted entry makes room for the new one.
pub struct ResultCache<V> {
    name: &'static str,
    ttl: Duration,
    capacity: usize,
    clock: SharedClock,
    metrics: Option<Arc<PipelineMetrics>>,
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
}

impl<V: Clone> ResultCache<V> {
    /// Empty cache. A `capacity` of zero is treated as one.
    pub fn new(name: &'static str, ttl: Duration, capacity: usize, clock: SharedClock) -> Self {
        Self {
            name,
            ttl,
            capacity: capacity.max(1),
            clock,
            metrics: None,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Count hits and misses in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Fresh value stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let value = {
            let mut entries = self.lock();
            match entries.get(key) {
                Some(entry) if now.saturating_duration_since(entry.inserted_at) < self.ttl => {
                    Some(entry.value.clone())
                }
                Some(_) => {
                    entries.remove(key);
                    None
                }
                None => None,
            }
        };

        let hit = value.is_some();
        tracing::debug!(cache = self.name, hit, "Cache lookup");
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_lookup(hit);
        }
        value
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn insert(&self, key: String, value: V) {
        let now = self.clock.now();
        let mut entries = self.lock();
        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            entries.retain(|_, entry| now.saturating_duration_since(entry.inserted_at) < self.ttl);
            if entries.len() >= self.capacity
                && let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.inserted_at)
                    .map(|(key, _)| key.clone())
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
            },
        );
    }

    /// Return the fresh value under `key`, or run `compute`, store its success, and
    /// return it. Failures are not cached.
    pub async fn get_or_compute<E, F, Fut>(&self, key: &str, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = compute().await?;
        self.insert(key.to_string(), value.clone());
        Ok(value)
    }

    /// Drop every entry for which `predicate` holds. Returns how many were removed.
    pub fn invalidate_where<P>(&self, predicate: P) -> usize
    where
        P: Fn(&str, &V) -> bool,
    {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, entry| !predicate(key, &entry.value));
        before - entries.len()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of stored entries, expired ones included until they are next touched.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

/// Fingerprint of a submission: file name, declared type, content digest, and metadata
/// serialized with sorted keys.
pub fn source_fingerprint(source: &SourceDocument, metadata: Option<&Metadata>) -> String {
    let content_digest = Sha256::digest(&source.content);
    let metadata_json = metadata
        .map(|map| serde_json::Value::Object(map.clone()).to_string())
        .unwrap_or_default();

    digest_fields(&[
        b"document",
        source.filename.as_bytes(),
        source.content_type.as_deref().unwrap_or_default().as_bytes(),
        content_digest.as_slice(),
        metadata_json.as_bytes(),
    ])
}

/// Fingerprint of a search request of a given `kind`.
pub fn search_fingerprint(kind: &str, query: &str, limit: usize) -> String {
    digest_fields(&[
        b"search",
        kind.as_bytes(),
        query.as_bytes(),
        &(limit as u64).to_le_bytes(),
    ])
}

fn digest_fields(fields: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        // Length prefixes keep ("ab", "c") and ("a", "bc") apart.
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn cache(clock: Arc<ManualClock>, capacity: usize) -> ResultCache<String> {
        ResultCache::new("test", Duration::from_secs(60), capacity, clock)
    }

    async fn compute(cache: &ResultCache<String>, calls: &AtomicU32) -> String {
        cache
            .get_or_compute("key", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ()>("value".to_string())
            })
            .await
            .expect("compute")
    }

    #[tokio::test]
    async fn computes_once_within_ttl() {
        let clock = Arc::new(ManualClock::default());
        let cache = cache(clock.clone(), 8);
        let calls = AtomicU32::new(0);

        assert_eq!(compute(&cache, &calls).await, "value");
        clock.advance(Duration::from_secs(59));
        assert_eq!(compute(&cache, &calls).await, "value");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recomputes_after_expiry() {
        let clock = Arc::new(ManualClock::default());
        let cache = cache(clock.clone(), 8);
        let calls = AtomicU32::new(0);

        compute(&cache, &calls).await;
        clock.advance(Duration::from_secs(60));
        compute(&cache, &calls).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let clock = Arc::new(ManualClock::default());
        let cache = cache(clock, 8);
        let result: Result<String, &str> = cache.get_or_compute("key", || async { Err("down") }).await;
        assert_eq!(result, Err("down"));
        assert!(cache.is_empty());
    }

    #[test]
    fn full_cache_evicts_oldest_insert() {
        let clock = Arc::new(ManualClock::default());
        let cache = cache(clock.clone(), 2);
        cache.insert("a".into(), "1".into());
        clock.advance(Duration::from_secs(1));
        cache.insert("b".into(), "2".into());
        clock.advance(Duration::from_secs(1));
        cache.insert("c".into(), "3".into());

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("c").as_deref(), Some("3"));
    }

    #[test]
    fn invalidation_by_predicate() {
        let clock = Arc::new(ManualClock::default());
        let cache = cache(clock, 8);
        cache.insert("a".into(), "doc-1".into());
        cache.insert("b".into(), "doc-2".into());

        assert_eq!(cache.invalidate_where(|_, value| value == "doc-1"), 1);
        assert_eq!(cache.get("a"), None);
        assert!(cache.get("b").is_some());
    }

    #[test]
    fn lookups_are_counted() {
        let clock = Arc::new(ManualClock::default());
        let metrics = Arc::new(PipelineMetrics::new());
        let cache = cache(clock, 8).with_metrics(metrics.clone());
        cache.get("missing");
        cache.insert("present".into(), "x".into());
        cache.get("present");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 1);
    }

    #[test]
    fn source_fingerprint_covers_content_and_metadata() {
        let source = SourceDocument::new("note.txt", b"patient note".to_vec());
        let base = source_fingerprint(&source, None);
        assert_eq!(base, source_fingerprint(&source.clone(), None));

        let edited = SourceDocument::new("note.txt", b"patient notes".to_vec());
        assert_ne!(base, source_fingerprint(&edited, None));

        let Some(first) = json!({"a": 1, "b": 2}).as_object().cloned() else {
            panic!("object");
        };
        let Some(second) = json!({"b": 2, "a": 1}).as_object().cloned() else {
            panic!("object");
        };
        assert_eq!(
            source_fingerprint(&source, Some(&first)),
            source_fingerprint(&source, Some(&second))
        );
        assert_ne!(base, source_fingerprint(&source, Some(&first)));
    }

    #[test]
    fn field_boundaries_matter() {
        let left = SourceDocument::new("ab", b"c".to_vec());
        let right = SourceDocument::new("a", b"bc".to_vec());
        assert_ne!(source_fingerprint(&left, None), source_fingerprint(&right, None));
        assert_ne!(search_fingerprint("text", "q", 10), search_fingerprint("entities", "q", 10));
    }
}
