use crate::models::{Chunk, DistanceMetric, SearchCandidate};
use crate::traits::VectorIndex;
use crate::SearchError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Vector index backed by a Qdrant collection over its REST API. Each chunk is
/// stored whole in the point payload under `chunk`.
pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
    metric: DistanceMetric,
    next_id: AtomicU64,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
        metric: DistanceMetric,
    ) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
            metric,
            next_id: AtomicU64::new(0),
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    fn distance_name(&self) -> &'static str {
        match self.metric {
            DistanceMetric::Cosine => "Cosine",
            DistanceMetric::Euclidean => "Euclid",
        }
    }

    /// Creates the collection when it does not exist yet.
    pub async fn ensure_collection(&self) -> Result<(), SearchError> {
        let response = self.client.get(self.collection_url()).send().await?;
        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response.status()));
        }

        let response = self
            .client
            .put(self.collection_url())
            .json(&json!({
                "vectors": {
                    "size": self.vector_size,
                    "distance": self.distance_name(),
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }
        debug!(collection = %self.collection, size = self.vector_size, "created qdrant collection");
        Ok(())
    }
}

fn backend_error(status: StatusCode) -> SearchError {
    SearchError::BackendResponse {
        backend: "qdrant".to_string(),
        details: status.to_string(),
    }
}

/// Converts a `points/search` response body into candidates. Euclidean scores
/// come back as distances and are mapped to `1 / (1 + distance)`.
pub fn parse_search_response(
    parsed: &Value,
    metric: DistanceMetric,
) -> Result<Vec<SearchCandidate>, SearchError> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .ok_or_else(|| SearchError::BackendResponse {
            backend: "qdrant".to_string(),
            details: "search response has no result array".to_string(),
        })?;

    hits.iter()
        .map(|hit| {
            let chunk_value = hit
                .pointer("/payload/chunk")
                .cloned()
                .ok_or_else(|| SearchError::BackendResponse {
                    backend: "qdrant".to_string(),
                    details: "point payload has no chunk".to_string(),
                })?;
            let chunk: Chunk = serde_json::from_value(chunk_value)?;
            let raw = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
            let score = match metric {
                DistanceMetric::Cosine => raw,
                DistanceMetric::Euclidean => 1.0 / (1.0 + raw),
            };
            Ok(SearchCandidate { chunk, score })
        })
        .collect()
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn index_vector_chunks(
        &self,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), SearchError> {
        if chunks.len() != embeddings.len() {
            return Err(SearchError::Request(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                chunks.len()
            )));
        }

        let points = chunks
            .iter()
            .zip(embeddings.iter())
            .map(|(chunk, embedding)| {
                if embedding.len() != self.vector_size {
                    return Err(SearchError::Request(format!(
                        "embedding dimension {} != {}",
                        embedding.len(),
                        self.vector_size
                    )));
                }

                Ok(json!({
                    "id": self.next_id.fetch_add(1, Ordering::Relaxed),
                    "vector": embedding,
                    "payload": {
                        "chunk": serde_json::to_value(chunk)?,
                        "source": chunk.source(),
                    },
                }))
            })
            .collect::<Result<Vec<_>, SearchError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        Ok(())
    }

    async fn search_vector(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchCandidate>, SearchError> {
        if query_vector.len() != self.vector_size {
            return Err(SearchError::Request(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                self.vector_size
            )));
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&json!({
                "vector": query_vector,
                "limit": top_k,
                "with_payload": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        parse_search_response(&parsed, self.metric)
    }

    async fn len(&self) -> Result<usize, SearchError> {
        let response = self
            .client
            .post(format!("{}/points/count", self.collection_url()))
            .json(&json!({ "exact": true }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        Ok(parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize)
    }

    async fn clear(&self) -> Result<(), SearchError> {
        let response = self.client.delete(self.collection_url()).send().await?;
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response.status()));
        }
        self.next_id.store(0, Ordering::Relaxed);
        self.ensure_collection().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;
    use axum::extract::State;
    use axum::http::{Method, Uri};
    use axum::Router;
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Mutex};

    fn sample_chunk() -> Chunk {
        Chunk {
            chunk_id: "c-1".to_string(),
            text: "pump pressure".to_string(),
            metadata: Metadata::new(),
            document_index: 0,
            chunk_index: 2,
            start_char: 40,
        }
    }

    /// Records every request and answers like a single-collection Qdrant
    /// named `docs`.
    #[derive(Default)]
    struct QdrantStub {
        requests: Mutex<Vec<(String, String, Value)>>,
        exists: AtomicBool,
    }

    async fn record(
        State(stub): State<Arc<QdrantStub>>,
        method: Method,
        uri: Uri,
        body: String,
    ) -> (axum::http::StatusCode, String) {
        use axum::http::StatusCode as Http;

        let parsed = serde_json::from_str(&body).unwrap_or(Value::Null);
        stub.requests
            .lock()
            .unwrap()
            .push((method.to_string(), uri.path().to_string(), parsed));

        let exists = stub.exists.load(Ordering::SeqCst);
        let (status, reply) = match (method.as_str(), uri.path()) {
            ("GET", "/collections/docs") if exists => (Http::OK, json!({"result": {}})),
            ("GET", "/collections/docs") => (Http::NOT_FOUND, json!({"status": "missing"})),
            ("PUT", "/collections/docs") => {
                stub.exists.store(true, Ordering::SeqCst);
                (Http::OK, json!({"result": true}))
            }
            ("DELETE", "/collections/docs") => {
                stub.exists.store(false, Ordering::SeqCst);
                (Http::OK, json!({"result": true}))
            }
            ("PUT", "/collections/docs/points") => {
                (Http::OK, json!({"result": {"status": "completed"}}))
            }
            ("POST", "/collections/docs/points/search") => (
                Http::OK,
                json!({"result": [{"id": 0, "score": 0.8, "payload": {"chunk": sample_chunk()}}]}),
            ),
            ("POST", "/collections/docs/points/count") => {
                (Http::OK, json!({"result": {"count": 1}}))
            }
            _ => (Http::INTERNAL_SERVER_ERROR, json!({"status": "unexpected"})),
        };
        (status, reply.to_string())
    }

    async fn qdrant_stub() -> (String, Arc<QdrantStub>) {
        let stub = Arc::new(QdrantStub::default());
        let app = Router::new().fallback(record).with_state(Arc::clone(&stub));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub listener");
        let addr = listener.local_addr().expect("stub addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("stub server");
        });
        (format!("http://{addr}/"), stub)
    }

    fn chunk_value() -> Value {
        serde_json::to_value(sample_chunk()).unwrap()
    }

    #[tokio::test]
    async fn rest_calls_use_expected_paths_and_bodies() {
        let (base, stub) = qdrant_stub().await;
        let store = QdrantStore::new(base, "docs", 2, DistanceMetric::Cosine);

        let mut chunk = sample_chunk();
        chunk.metadata.insert("source".to_string(), json!("manual.txt"));

        store.ensure_collection().await.unwrap();
        store
            .index_vector_chunks(&[chunk.clone()], &[vec![0.5, 0.5]])
            .await
            .unwrap();
        let hits = store.search_vector(&[0.5, 0.5], 3).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk, sample_chunk());
        assert_eq!(store.len().await.unwrap(), 1);
        store.clear().await.unwrap();
        store
            .index_vector_chunks(&[chunk], &[vec![0.25, 0.75]])
            .await
            .unwrap();

        let requests = stub.requests.lock().unwrap().clone();
        let calls: Vec<(&str, &str)> = requests
            .iter()
            .map(|(method, path, _)| (method.as_str(), path.as_str()))
            .collect();
        assert_eq!(
            calls,
            vec![
                ("GET", "/collections/docs"),
                ("PUT", "/collections/docs"),
                ("PUT", "/collections/docs/points"),
                ("POST", "/collections/docs/points/search"),
                ("POST", "/collections/docs/points/count"),
                ("DELETE", "/collections/docs"),
                ("GET", "/collections/docs"),
                ("PUT", "/collections/docs"),
                ("PUT", "/collections/docs/points"),
            ]
        );

        assert_eq!(requests[1].2, json!({"vectors": {"size": 2, "distance": "Cosine"}}));
        let point = &requests[2].2["points"][0];
        assert_eq!(point["id"], 0);
        assert_eq!(point["vector"], json!([0.5, 0.5]));
        assert_eq!(point["payload"]["source"], "manual.txt");
        assert_eq!(point["payload"]["chunk"]["chunk_id"], "c-1");
        assert_eq!(
            requests[3].2,
            json!({"vector": [0.5, 0.5], "limit": 3, "with_payload": true})
        );
        assert_eq!(requests[4].2, json!({"exact": true}));
        assert_eq!(requests[8].2["points"][0]["id"], 0);
    }

    #[tokio::test]
    async fn unexpected_status_is_a_backend_error() {
        let (base, stub) = qdrant_stub().await;
        let store = QdrantStore::new(base, "other", 2, DistanceMetric::Euclidean);

        let result = store.ensure_collection().await;
        assert!(matches!(result, Err(SearchError::BackendResponse { .. })));
        assert_eq!(stub.requests.lock().unwrap().len(), 1);
    }

    #[test]
    fn search_response_is_parsed_into_candidates() {
        let body = json!({
            "result": [{"id": 7, "score": 0.91, "payload": {"chunk": chunk_value()}}]
        });

        let hits = parse_search_response(&body, DistanceMetric::Cosine).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk, sample_chunk());
        assert!((hits[0].score - 0.91).abs() < 1e-6);
    }

    #[test]
    fn euclidean_distances_become_similarities() {
        let body = json!({
            "result": [
                {"id": 1, "score": 0.0, "payload": {"chunk": chunk_value()}},
                {"id": 2, "score": 1.0, "payload": {"chunk": chunk_value()}}
            ]
        });

        let hits = parse_search_response(&body, DistanceMetric::Euclidean).unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!((hits[1].score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn payload_without_chunk_is_a_backend_error() {
        let body = json!({"result": [{"id": 1, "score": 0.3, "payload": {}}]});
        let result = parse_search_response(&body, DistanceMetric::Cosine);
        assert!(matches!(result, Err(SearchError::BackendResponse { .. })));
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected_before_any_request() {
        let store = QdrantStore::new("http://127.0.0.1:9", "docs", 4, DistanceMetric::Cosine);
        let result = store.index_vector_chunks(&[sample_chunk()], &[vec![0.0; 3]]).await;
        assert!(matches!(result, Err(SearchError::Request(_))));
        assert!(store.search_vector(&[0.0; 2], 3).await.is_err());
    }
}
