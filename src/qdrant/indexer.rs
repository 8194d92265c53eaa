//! [`Indexer`] backed by a Qdrant collection.

use crate::collaborators::{IndexError, Indexer};
use crate::config::Config;
use crate::document::{SearchHit, WorkItem};
use crate::embedding::HashingEmbedder;
use crate::qdrant::client::QdrantService;
use crate::qdrant::types::QdrantError;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::OnceCell;
use uuid::Uuid;

/// Stores each work item as one point whose payload is the serialized item.
pub struct QdrantIndexer {
    service: QdrantService,
    collection: String,
    embedder: HashingEmbedder,
    collection_ready: OnceCell<()>,
}

impl QdrantIndexer {
    /// Indexer for the collection and vector size named in `config`.
    pub fn from_config(config: &Config) -> Result<Self, QdrantError> {
        Ok(Self::new(
            QdrantService::new(config)?,
            config.qdrant_collection_name.clone(),
            HashingEmbedder::new(config.embedding_dimension),
        ))
    }

    /// Indexer over an existing client.
    pub fn new(service: QdrantService, collection: String, embedder: HashingEmbedder) -> Self {
        Self {
            service,
            collection,
            embedder,
            collection_ready: OnceCell::new(),
        }
    }

    async fn ensure_collection(&self) -> Result<(), QdrantError> {
        self.collection_ready
            .get_or_try_init(|| async {
                self.service
                    .create_collection_if_not_exists(
                        &self.collection,
                        self.embedder.dimension() as u64,
                    )
                    .await
            })
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl Indexer for QdrantIndexer {
    async fn index(&self, item: &WorkItem) -> Result<String, IndexError> {
        self.ensure_collection().await?;

        let payload = match serde_json::to_value(item) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                return Err(QdrantError::MalformedPayload("work item is not an object".into()).into());
            }
            Err(err) => return Err(QdrantError::MalformedPayload(err.to_string()).into()),
        };
        let point_id = Uuid::new_v4().to_string();
        let vector = self.embedder.embed(&item.index_text());
        self.service
            .upsert_point(&self.collection, &point_id, vector, payload)
            .await?;
        Ok(point_id)
    }

    async fn remove(&self, index_ref: &str) -> Result<bool, IndexError> {
        self.ensure_collection().await?;
        if !self.service.point_exists(&self.collection, index_ref).await? {
            return Ok(false);
        }
        self.service.delete_point(&self.collection, index_ref).await?;
        Ok(true)
    }

    async fn query(&self, text: &str, limit: usize) -> Result<Vec<SearchHit>, IndexError> {
        self.ensure_collection().await?;
        let vector = self.embedder.embed(text);
        let points = self
            .service
            .search_points(&self.collection, vector, limit)
            .await?;

        let mut hits = Vec::with_capacity(points.len());
        for point in points {
            let Some(payload) = point.payload else {
                continue;
            };
            match serde_json::from_value::<WorkItem>(Value::Object(payload)) {
                Ok(document) => hits.push(SearchHit {
                    document,
                    score: point.score.clamp(0.0, 1.0),
                }),
                Err(err) => {
                    tracing::warn!(point = %point.id, error = %err, "Skipping undecodable Qdrant payload");
                }
            }
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::SourceDocument;
    use crate::qdrant::client::test_service;
    use httpmock::{
        Method::{GET, POST, PUT},
        MockServer,
    };
    use serde_json::json;
    use time::OffsetDateTime;

    fn item() -> WorkItem {
        let source = SourceDocument::new("note.txt", b"aspirin".to_vec());
        let mut item = WorkItem::pending("doc-1".into(), &source, None, OffsetDateTime::UNIX_EPOCH);
        item.record_extraction("aspirin".into(), 1.0, OffsetDateTime::UNIX_EPOCH);
        item
    }

    fn indexer(server: &MockServer) -> QdrantIndexer {
        QdrantIndexer::new(
            test_service(server.base_url()),
            "documents".into(),
            HashingEmbedder::new(8),
        )
    }

    #[tokio::test]
    async fn index_creates_collection_once_and_upserts() {
        let server = MockServer::start_async().await;
        let exists = server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/documents");
                then.status(404);
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/documents")
                    .json_body_partial(r#"{"vectors": {"size": 8, "distance": "Cosine"}}"#);
                then.status(200).json_body(json!({ "result": true }));
            })
            .await;
        let upsert = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/documents/points")
                    .query_param("wait", "true");
                then.status(200).json_body(json!({ "result": { "status": "completed" } }));
            })
            .await;

        let indexer = indexer(&server);
        let first = indexer.index(&item()).await.expect("first index");
        let second = indexer.index(&item()).await.expect("second index");

        assert_ne!(first, second);
        exists.assert_hits_async(1).await;
        create.assert_hits_async(1).await;
        upsert.assert_hits_async(2).await;
    }

    #[tokio::test]
    async fn query_decodes_payloads_into_hits() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/documents");
                then.status(200).json_body(json!({ "result": {} }));
            })
            .await;
        let payload = serde_json::to_value(item()).expect("serialize");
        server
            .mock_async(move |when, then| {
                when.method(POST).path("/collections/documents/points/query");
                then.status(200).json_body(json!({
                    "result": [
                        { "id": "p-1", "score": 0.9, "payload": payload },
                        { "id": "p-2", "score": 0.5, "payload": { "bogus": true } }
                    ]
                }));
            })
            .await;

        let hits = indexer(&server).query("aspirin", 5).await.expect("query");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.id, "doc-1");
    }

    #[tokio::test]
    async fn remove_reports_missing_points() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/documents");
                then.status(200).json_body(json!({ "result": {} }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/documents/points/gone");
                then.status(404);
            })
            .await;

        let removed = indexer(&server).remove("gone").await.expect("remove");
        assert!(!removed);
    }
}
