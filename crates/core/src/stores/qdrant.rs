use crate::traits::VectorStore;
use crate::{StoreError, StoredRecord};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use url::Url;
use uuid::Builder;

const BACKEND: &str = "qdrant";

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    api_key: Option<String>,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    /// Gets or creates `collection` with cosine distance. Any failure here is a
    /// [`StoreError::Init`].
    pub async fn connect(
        endpoint: &str,
        collection: impl Into<String>,
        api_key: Option<String>,
        vector_size: usize,
    ) -> Result<Self, StoreError> {
        let collection = collection.into();
        let parsed = Url::parse(endpoint).map_err(|error| init_error(&collection, error))?;

        let store = Self {
            endpoint: parsed.as_str().trim_end_matches('/').to_string(),
            collection,
            api_key,
            client: Client::new(),
            vector_size,
        };

        store
            .ensure_collection()
            .await
            .map_err(|error| init_error(&store.collection, error))?;
        Ok(store)
    }

    async fn ensure_collection(&self) -> Result<(), StoreError> {
        let response = self
            .request(self.client.get(self.collection_url("")))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                let response = self
                    .request(self.client.put(self.collection_url("")))
                    .json(&json!({
                        "vectors": { "size": self.vector_size, "distance": "Cosine" }
                    }))
                    .send()
                    .await?;
                check_status(response).await?;
                info!(collection = %self.collection, size = self.vector_size, "created qdrant collection");
                Ok(())
            }
            status if status.is_success() => {
                let parsed: Value = response.json().await?;
                let existing = parsed
                    .pointer("/result/config/params/vectors/size")
                    .and_then(Value::as_u64);
                match existing {
                    Some(size) if size as usize != self.vector_size => Err(StoreError::Backend {
                        backend: BACKEND.to_string(),
                        details: format!(
                            "collection vector size {size} does not match embedder size {}",
                            self.vector_size
                        ),
                    }),
                    _ => {
                        debug!(collection = %self.collection, "using existing qdrant collection");
                        Ok(())
                    }
                }
            }
            status => Err(StoreError::Backend {
                backend: BACKEND.to_string(),
                details: status.to_string(),
            }),
        }
    }

    async fn existing_ids(&self, point_ids: &[String]) -> Result<Vec<String>, StoreError> {
        let response = self
            .request(self.client.post(self.collection_url("/points")))
            .json(&json!({
                "ids": point_ids,
                "with_payload": ["record_id"],
                "with_vector": false,
            }))
            .send()
            .await?;
        let parsed = check_status(response).await?.json::<Value>().await?;

        Ok(parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .map(|points| {
                points
                    .iter()
                    .filter_map(|point| point.pointer("/payload/record_id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.endpoint, self.collection, suffix)
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    fn check_dimensions(&self, len: usize) -> Result<(), String> {
        if len != self.vector_size {
            return Err(format!("vector dimension {len} != {}", self.vector_size));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn name(&self) -> &str {
        &self.collection
    }

    async fn add(&self, records: &[StoredRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut point_ids = Vec::with_capacity(records.len());
        for record in records {
            self.check_dimensions(record.embedding.len())
                .map_err(StoreError::Write)?;
            let id = point_id(&record.id);
            if point_ids.contains(&id) {
                return Err(StoreError::DuplicateId(record.id.clone()));
            }
            point_ids.push(id);
        }

        let existing = self.existing_ids(&point_ids).await.map_err(write_error)?;
        if let Some(existing) = existing.into_iter().next() {
            return Err(StoreError::DuplicateId(existing));
        }

        let points = records
            .iter()
            .zip(&point_ids)
            .map(|(record, id)| {
                json!({
                    "id": id,
                    "vector": record.embedding,
                    "payload": {
                        "record_id": record.id,
                        "doc_id": record.metadata.doc_id,
                        "text": record.text,
                    },
                })
            })
            .collect::<Vec<_>>();

        let response = self
            .request(self.client.put(self.collection_url("/points?wait=true")))
            .json(&json!({ "points": points }))
            .send()
            .await
            .map_err(write_error)?;
        check_status(response).await.map_err(write_error)?;

        debug!(collection = %self.collection, added = records.len(), "upserted qdrant points");
        Ok(())
    }

    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<String>, StoreError> {
        self.check_dimensions(embedding.len())
            .map_err(StoreError::Query)?;

        let response = self
            .request(self.client.post(self.collection_url("/points/search")))
            .json(&json!({
                "vector": embedding,
                "limit": top_k,
                "with_payload": ["text"],
            }))
            .send()
            .await
            .map_err(query_error)?;
        let parsed = check_status(response)
            .await
            .map_err(query_error)?
            .json::<Value>()
            .await
            .map_err(query_error)?;

        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(hits
            .iter()
            .map(|hit| {
                hit.pointer("/payload/text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            })
            .collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let response = self
            .request(self.client.post(self.collection_url("/points/count")))
            .json(&json!({ "exact": true }))
            .send()
            .await?;
        let parsed = check_status(response).await?.json::<Value>().await?;

        Ok(parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .unwrap_or_default() as usize)
    }
}

/// Qdrant only accepts integers or UUIDs as point ids, so record ids are hashed into a UUID.
pub fn point_id(record_id: &str) -> String {
    let digest = Sha256::digest(record_id.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Builder::from_random_bytes(bytes)
        .into_uuid()
        .hyphenated()
        .to_string()
}

async fn check_status(response: Response) -> Result<Response, StoreError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Backend {
        backend: BACKEND.to_string(),
        details: format!("{status}: {body}"),
    })
}

fn write_error(error: impl std::fmt::Display) -> StoreError {
    StoreError::Write(error.to_string())
}

fn query_error(error: impl std::fmt::Display) -> StoreError {
    StoreError::Query(error.to_string())
}

fn init_error(collection: &str, error: impl std::fmt::Display) -> StoreError {
    StoreError::Init {
        collection: collection.to_string(),
        details: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::GET, Method::POST, Method::PUT, MockServer};
    use uuid::Uuid;

    async fn existing_collection(server: &MockServer, size: usize) {
        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/docs");
                then.status(200).json_body(json!({
                    "result": { "config": { "params": { "vectors": { "size": size, "distance": "Cosine" } } } }
                }));
            })
            .await;
    }

    #[tokio::test]
    async fn connect_creates_missing_collection() {
        let server = MockServer::start_async().await;
        let lookup = server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/docs");
                then.status(404).json_body(json!({ "status": { "error": "Not found" } }));
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/docs")
                    .json_body(json!({ "vectors": { "size": 4, "distance": "Cosine" } }));
                then.status(200).json_body(json!({ "result": true }));
            })
            .await;

        let store = QdrantStore::connect(&server.base_url(), "docs", None, 4)
            .await
            .expect("collection is created");

        lookup.assert_async().await;
        create.assert_async().await;
        assert_eq!(store.name(), "docs");
    }

    #[tokio::test]
    async fn connect_rejects_mismatched_vector_size() {
        let server = MockServer::start_async().await;
        existing_collection(&server, 768).await;

        let result = QdrantStore::connect(&server.base_url(), "docs", None, 4).await;
        assert!(matches!(result, Err(StoreError::Init { .. })));
    }

    #[tokio::test]
    async fn connect_rejects_invalid_url() {
        let result = QdrantStore::connect("not a url", "docs", None, 4).await;
        assert!(matches!(result, Err(StoreError::Init { .. })));
    }

    #[tokio::test]
    async fn add_refuses_ids_already_stored() {
        let server = MockServer::start_async().await;
        existing_collection(&server, 2).await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/docs/points");
                then.status(200).json_body(json!({
                    "result": [ { "id": point_id("doc_0"), "payload": { "record_id": "doc_0" } } ]
                }));
            })
            .await;
        let upsert = server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/docs/points");
                then.status(200).json_body(json!({ "result": { "status": "completed" } }));
            })
            .await;

        let store = QdrantStore::connect(&server.base_url(), "docs", None, 2)
            .await
            .expect("connects");
        let result = store
            .add(&[StoredRecord::new("doc", 0, "text".to_string(), vec![1.0, 0.0])])
            .await;

        assert!(matches!(result, Err(StoreError::DuplicateId(id)) if id == "doc_0"));
        upsert.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn add_upserts_new_points_with_payload() {
        let server = MockServer::start_async().await;
        existing_collection(&server, 2).await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/docs/points");
                then.status(200).json_body(json!({ "result": [] }));
            })
            .await;
        let upsert = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/docs/points")
                    .query_param("wait", "true")
                    .body_contains("\"record_id\":\"doc_1\"")
                    .body_contains("\"doc_id\":\"doc\"");
                then.status(200).json_body(json!({ "result": { "status": "completed" } }));
            })
            .await;

        let store = QdrantStore::connect(&server.base_url(), "docs", None, 2)
            .await
            .expect("connects");
        store
            .add(&[
                StoredRecord::new("doc", 0, "first".to_string(), vec![1.0, 0.0]),
                StoredRecord::new("doc", 1, "second".to_string(), vec![0.0, 1.0]),
            ])
            .await
            .expect("points written");

        upsert.assert_async().await;
    }

    #[tokio::test]
    async fn query_returns_texts_in_score_order() {
        let server = MockServer::start_async().await;
        existing_collection(&server, 2).await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/docs/points/search")
                    .body_contains("\"limit\":5");
                then.status(200).json_body(json!({
                    "result": [
                        { "id": point_id("doc_1"), "score": 0.9, "payload": { "text": "nearest" } },
                        { "id": point_id("doc_0"), "score": 0.2, "payload": { "text": "farther" } }
                    ]
                }));
            })
            .await;

        let store = QdrantStore::connect(&server.base_url(), "docs", None, 2)
            .await
            .expect("connects");
        let results = store.query(&[1.0, 0.0], 5).await.expect("query succeeds");

        assert_eq!(results, vec!["nearest".to_string(), "farther".to_string()]);
    }

    #[tokio::test]
    async fn add_reports_backend_failures_as_write_errors() {
        let server = MockServer::start_async().await;
        existing_collection(&server, 2).await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/docs/points");
                then.status(503).body("service unavailable");
            })
            .await;
        let upsert = server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/docs/points");
                then.status(200).json_body(json!({ "result": { "status": "completed" } }));
            })
            .await;

        let store = QdrantStore::connect(&server.base_url(), "docs", None, 2)
            .await
            .expect("connects");
        let result = store
            .add(&[StoredRecord::new("doc", 0, "text".to_string(), vec![1.0, 0.0])])
            .await;

        assert!(matches!(result, Err(StoreError::Write(details)) if details.contains("503")));
        upsert.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn query_reports_backend_failures_as_query_errors() {
        let server = MockServer::start_async().await;
        existing_collection(&server, 2).await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/docs/points/search");
                then.status(200).body("not json");
            })
            .await;

        let store = QdrantStore::connect(&server.base_url(), "docs", None, 2)
            .await
            .expect("connects");
        let result = store.query(&[1.0, 0.0], 5).await;

        assert!(matches!(result, Err(StoreError::Query(_))));
    }

    #[test]
    fn point_ids_are_stable_uuids() {
        let first = point_id("doc_0");
        assert_eq!(first, point_id("doc_0"));
        assert_ne!(first, point_id("doc_1"));
        assert!(Uuid::parse_str(&first).is_ok());
    }
}
