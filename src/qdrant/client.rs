//! HTTP client wrapper for interacting with Qdrant.

use crate::config::Config;
use crate::qdrant::types::{QdrantError, QueryResponse, QueryResponseResult, ScoredPoint};
use reqwest::{Client, Method, StatusCode};
use serde_json::{Map, Value, json};

/// Lightweight HTTP client for Qdrant operations.
pub struct QdrantService {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
}

impl QdrantService {
    /// Construct a client for the Qdrant instance named in `config`.
    pub fn new(config: &Config) -> Result<Self, QdrantError> {
        let client = Client::builder().user_agent("rusty-docs/0.1").build()?;

        let base_url = normalize_base_url(&config.qdrant_url).map_err(QdrantError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            has_api_key = %config
                .qdrant_api_key
                .as_deref()
                .map(|value| !value.is_empty())
                .unwrap_or(false),
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key: config.qdrant_api_key.clone(),
        })
    }

    /// Create a collection only when it is missing from Qdrant.
    pub async fn create_collection_if_not_exists(
        &self,
        collection_name: &str,
        vector_size: u64,
    ) -> Result<(), QdrantError> {
        if self.collection_exists(collection_name).await? {
            return Ok(());
        }

        tracing::debug!(
            collection = collection_name,
            vector_size,
            "Creating collection"
        );
        let body = json!({
            "vectors": {
                "size": vector_size,
                "distance": "Cosine"
            }
        });

        let response = self
            .request(Method::PUT, &format!("collections/{collection_name}"))
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::info!(collection = collection_name, "Collection created");
        })
        .await
    }

    /// Insert or replace a single point.
    pub async fn upsert_point(
        &self,
        collection_name: &str,
        id: &str,
        vector: Vec<f32>,
        payload: Map<String, Value>,
    ) -> Result<(), QdrantError> {
        let body = json!({
            "points": [
                {
                    "id": id,
                    "vector": vector,
                    "payload": payload,
                }
            ]
        });

        let response = self
            .request(Method::PUT, &format!("collections/{collection_name}/points"))
            .query(&[("wait", true)])
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = collection_name, point = id, "Point upserted");
        })
        .await
    }

    /// Delete a point by id. Qdrant acknowledges deletes of unknown ids, so callers that
    /// need to know whether the point existed should check with [`Self::point_exists`].
    pub async fn delete_point(&self, collection_name: &str, id: &str) -> Result<(), QdrantError> {
        let response = self
            .request(
                Method::POST,
                &format!("collections/{collection_name}/points/delete"),
            )
            .query(&[("wait", true)])
            .json(&json!({ "points": [id] }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = collection_name, point = id, "Point deleted");
        })
        .await
    }

    /// Whether a point with `id` is stored in the collection.
    pub async fn point_exists(&self, collection_name: &str, id: &str) -> Result<bool, QdrantError> {
        let response = self
            .request(
                Method::GET,
                &format!("collections/{collection_name}/points/{id}"),
            )
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(QdrantError::UnexpectedStatus { status, body })
            }
        }
    }

    /// Perform a similarity search against a collection, returning scored payloads.
    pub async fn search_points(
        &self,
        collection_name: &str,
        vector: Vec<f32>,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, QdrantError> {
        let body = json!({
            "query": vector,
            "limit": limit,
            "with_payload": true,
        });

        let response = self
            .request(
                Method::POST,
                &format!("collections/{collection_name}/points/query"),
            )
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(collection = collection_name, error = %error, "Qdrant search failed");
            return Err(error);
        }

        let payload: QueryResponse = response.json().await?;
        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        };
        let results = points
            .into_iter()
            .map(|point| ScoredPoint {
                id: stringify_point_id(point.id),
                score: point.score,
                payload: point.payload,
            })
            .collect();

        Ok(results)
    }

    async fn collection_exists(&self, collection_name: &str) -> Result<bool, QdrantError> {
        let response = self
            .request(Method::GET, &format!("collections/{collection_name}"))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::error!(collection = collection_name, error = %error, "Collection existence check failed");
                Err(error)
            }
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), QdrantError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Qdrant request failed");
            Err(error)
        }
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

fn stringify_point_id(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
pub(crate) fn test_service(base_url: String) -> QdrantService {
    QdrantService {
        client: Client::builder()
            .user_agent("rusty-docs-test")
            .build()
            .expect("client"),
        base_url,
        api_key: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    #[tokio::test]
    async fn search_points_parses_scored_payloads() {
        let server = MockServer::start_async().await;

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/documents/points/query")
                    .json_body_partial(r#"{"limit": 3, "with_payload": true}"#);
                then.status(200).json_body(json!({
                    "status": "ok",
                    "time": 0.0,
                    "result": {
                        "points": [
                            {
                                "id": "point-1",
                                "score": 0.42,
                                "payload": { "id": "doc-1" }
                            }
                        ]
                    }
                }));
            })
            .await;

        let service = test_service(server.base_url());
        let results = service
            .search_points("documents", vec![0.1, 0.2], 3)
            .await
            .expect("search request");

        mock.assert_async().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "point-1");
        assert!((results[0].score - 0.42).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn failing_status_surfaces_as_unexpected_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/documents/points/delete");
                then.status(503).body("overloaded");
            })
            .await;

        let service = test_service(server.base_url());
        let error = service
            .delete_point("documents", "point-1")
            .await
            .expect_err("delete should fail");

        assert!(matches!(
            error,
            QdrantError::UnexpectedStatus { status, .. } if status == StatusCode::SERVICE_UNAVAILABLE
        ));
        assert!(error.is_transient());
    }

    #[test]
    fn base_url_is_normalized() {
        assert_eq!(
            normalize_base_url("http://localhost:6333/").expect("valid"),
            "http://localhost:6333/"
        );
        assert!(normalize_base_url("not a url").is_err());
        assert_eq!(
            format_endpoint("http://localhost:6333/", "/collections/x"),
            "http://localhost:6333/collections/x"
        );
    }
}
