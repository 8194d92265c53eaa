//! In-process vector index.

use crate::collaborators::{IndexError, Indexer};
use crate::document::{SearchHit, WorkItem};
use crate::embedding::{HashingEmbedder, similarity};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

struct IndexedPoint {
    vector: Vec<f32>,
    item: WorkItem,
}

/// Keeps embedded work items in memory and answers similarity queries by brute force.
pub struct MemoryIndexer {
    embedder: HashingEmbedder,
    points: Mutex<HashMap<String, IndexedPoint>>,
}

impl MemoryIndexer {
    /// Empty index embedding with `embedder`.
    pub fn new(embedder: HashingEmbedder) -> Self {
        Self {
            embedder,
            points: Mutex::new(HashMap::new()),
        }
    }

    /// Number of indexed items.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, IndexedPoint>> {
        self.points.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

impl Default for MemoryIndexer {
    fn default() -> Self {
        Self::new(HashingEmbedder::default())
    }
}

#[async_trait]
impl Indexer for MemoryIndexer {
    async fn index(&self, item: &WorkItem) -> Result<String, IndexError> {
        let vector = self.embedder.embed(&item.index_text());
        let index_ref = Uuid::new_v4().to_string();
        self.lock().insert(
            index_ref.clone(),
            IndexedPoint {
                vector,
                item: item.clone(),
            },
        );
        tracing::debug!(document_id = %item.id, %index_ref, "Indexed document in memory");
        Ok(index_ref)
    }

    async fn remove(&self, index_ref: &str) -> Result<bool, IndexError> {
        Ok(self.lock().remove(index_ref).is_some())
    }

    async fn query(&self, text: &str, limit: usize) -> Result<Vec<SearchHit>, IndexError> {
        let query = self.embedder.embed(text);
        let mut hits: Vec<SearchHit> = self
            .lock()
            .values()
            .map(|point| SearchHit {
                document: point.item.clone(),
                score: similarity(&query, &point.vector),
            })
            .filter(|hit| hit.score > 0.0)
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::SourceDocument;
    use time::OffsetDateTime;

    fn item(id: &str, text: &str) -> WorkItem {
        let source = SourceDocument::new(format!("{id}.txt"), text.as_bytes().to_vec());
        let mut item = WorkItem::pending(id.into(), &source, None, OffsetDateTime::UNIX_EPOCH);
        item.record_extraction(text.into(), 1.0, OffsetDateTime::UNIX_EPOCH);
        item
    }

    #[tokio::test]
    async fn query_ranks_closest_first() {
        let indexer = MemoryIndexer::default();
        indexer
            .index(&item("a", "knee fracture treated with surgery"))
            .await
            .expect("index a");
        indexer
            .index(&item("b", "insulin dose adjusted for diabetes"))
            .await
            .expect("index b");

        let hits = indexer.query("diabetes insulin", 10).await.expect("query");
        assert_eq!(hits.first().map(|hit| hit.document.id.as_str()), Some("b"));
        assert!(hits.iter().all(|hit| (0.0..=1.0).contains(&hit.score)));
        assert!(hits.windows(2).all(|pair| pair[0].score >= pair[1].score));
    }

    #[tokio::test]
    async fn remove_reports_unknown_refs() {
        let indexer = MemoryIndexer::default();
        let index_ref = indexer.index(&item("a", "aspirin")).await.expect("index");

        assert!(indexer.remove(&index_ref).await.expect("remove"));
        assert!(!indexer.remove(&index_ref).await.expect("remove again"));
        assert!(indexer.is_empty());
    }

    #[tokio::test]
    async fn limit_truncates_results() {
        let indexer = MemoryIndexer::default();
        for id in ["a", "b", "c"] {
            indexer.index(&item(id, "aspirin")).await.expect("index");
        }
        assert_eq!(indexer.query("aspirin", 2).await.expect("query").len(), 2);
    }
}
