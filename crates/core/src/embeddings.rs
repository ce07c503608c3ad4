use crate::error::EmbedError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl<T: Embedder + ?Sized> Embedder for Arc<T> {
    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        (**self).embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        (**self).embed_batch(texts).await
    }
}

/// Local hashing embedder: character trigrams plus whole words, bucketed with
/// FNV-1a and L2-normalized. Deterministic and model-free.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = std::iter::once(' ')
            .chain(lowered.chars())
            .chain(std::iter::once(' '))
            .collect();

        if lowered.trim().is_empty() {
            return vector;
        }

        let buckets = vector.len();
        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            vector[bucket(&token, buckets)] += 1.0;
        }
        for word in lowered.split_whitespace() {
            vector[bucket(word, buckets)] += 0.5;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

fn bucket(token: &str, buckets: usize) -> usize {
    let mut hash = 1469598103934665603u64;
    for byte in token.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    (hash % buckets as u64) as usize
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        Ok(self.embed_sync(text))
    }
}

/// Memoizes embeddings by the SHA-256 of the text, so a chunk is only
/// embedded again when its text changes.
///
/// With a capacity set, entries not needed by the current call are dropped
/// once the memo would grow past it.
pub struct CachedEmbedder<E> {
    inner: E,
    capacity: Option<usize>,
    cache: Mutex<HashMap<[u8; 32], Vec<f32>>>,
}

impl<E: Embedder> CachedEmbedder<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            capacity: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity.max(1));
        self
    }

    pub async fn cached_len(&self) -> usize {
        self.cache.lock().await.len()
    }
}

fn text_digest(text: &str) -> [u8; 32] {
    Sha256::digest(text.as_bytes()).into()
}

fn make_room(
    cache: &mut HashMap<[u8; 32], Vec<f32>>,
    capacity: Option<usize>,
    incoming: usize,
    keep: &HashSet<[u8; 32]>,
) {
    let Some(capacity) = capacity else {
        return;
    };
    if cache.len() + incoming > capacity {
        let before = cache.len();
        cache.retain(|key, _| keep.contains(key));
        debug!(evicted = before - cache.len(), capacity, "embedding cache trimmed");
    }
}

#[async_trait]
impl<E: Embedder> Embedder for CachedEmbedder<E> {
    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let key = text_digest(text);
        if let Some(hit) = self.cache.lock().await.get(&key) {
            return Ok(hit.clone());
        }

        let vector = self.inner.embed(text).await?;
        let mut cache = self.cache.lock().await;
        make_room(&mut cache, self.capacity, 1, &HashSet::new());
        cache.insert(key, vector.clone());
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let keys: Vec<[u8; 32]> = texts.iter().map(|text| text_digest(text)).collect();

        let missing: Vec<String> = {
            let cache = self.cache.lock().await;
            let mut seen = HashSet::new();
            texts
                .iter()
                .zip(&keys)
                .filter(|(_, key)| !cache.contains_key(*key) && seen.insert(**key))
                .map(|(text, _)| text.clone())
                .collect()
        };

        if !missing.is_empty() {
            debug!(missing = missing.len(), total = texts.len(), "embedding uncached texts");
            let computed = self.inner.embed_batch(&missing).await?;
            let mut cache = self.cache.lock().await;
            let wanted: HashSet<[u8; 32]> = keys.iter().copied().collect();
            make_room(&mut cache, self.capacity, missing.len(), &wanted);
            for (text, vector) in missing.iter().zip(computed) {
                cache.insert(text_digest(text), vector);
            }
        }

        let cache = self.cache.lock().await;
        keys.iter()
            .map(|key| {
                cache.get(key).cloned().ok_or_else(|| {
                    EmbedError::Config(
                        "embedding backend returned fewer vectors than requested".to_string(),
                    )
                })
            })
            .collect()
    }
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
pub struct RemoteEmbedder {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl RemoteEmbedder {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self, EmbedError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(EmbedError::Config("API key must not be empty".to_string()));
        }

        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            api_key,
            model: model.into(),
            dimensions,
        })
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbedError::Config("embedding endpoint returned no vectors".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(model = %self.model, batch_size = texts.len(), "requesting remote embeddings");
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let details = response.text().await.unwrap_or_default();
            return Err(EmbedError::Response { status, details });
        }

        let mut payload: EmbeddingResponse = response.json().await?;
        payload.data.sort_by_key(|item| item.index);

        payload
            .data
            .into_iter()
            .map(|item| {
                if item.embedding.len() == self.dimensions {
                    Ok(item.embedding)
                } else {
                    Err(EmbedError::DimensionMismatch {
                        expected: self.dimensions,
                        actual: item.embedding.len(),
                    })
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{CachedEmbedder, CharacterNgramEmbedder, Embedder, RemoteEmbedder};
    use crate::error::EmbedError;
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn embeddings_stub(status: StatusCode, body: &'static str) -> String {
        let app =
            Router::new().route("/v1/embeddings", post(move || async move { (status, body) }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub listener");
        let addr = listener.local_addr().expect("stub addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("stub server");
        });
        format!("http://{addr}/v1")
    }

    fn remote(base: &str) -> RemoteEmbedder {
        RemoteEmbedder::new(base, "key", "embed-small", 2, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Hydraulic pressure and flow").await.unwrap();
        let second = embedder.embed("Hydraulic pressure and flow").await.unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vector = embedder.embed_sync("abc");
        assert_eq!(vector.len(), 32);
    }

    #[test]
    fn embeddings_are_unit_length_and_text_sensitive() {
        let embedder = CharacterNgramEmbedder { dimensions: 64 };
        let pump = embedder.embed_sync("Pump seals wear out");
        let valve = embedder.embed_sync("Valve springs corrode");

        let norm = pump.iter().map(|value| value * value).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_ne!(pump, valve);
        assert_eq!(pump, embedder.embed_sync("PUMP SEALS WEAR OUT"));
    }

    #[test]
    fn short_and_blank_texts_are_handled() {
        let embedder = CharacterNgramEmbedder::default();
        assert!(embedder.embed_sync("a").iter().any(|value| *value > 0.0));
        assert!(embedder.embed_sync("   ").iter().all(|value| *value == 0.0));
    }

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn dimensions(&self) -> usize {
            8
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CharacterNgramEmbedder { dimensions: 8 }.embed_sync(text))
        }
    }

    #[tokio::test]
    async fn cached_embedder_only_recomputes_changed_text() {
        let cached = CachedEmbedder::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });

        let texts = vec!["alpha".to_string(), "beta".to_string(), "alpha".to_string()];
        let first = cached.embed_batch(&texts).await.unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first[0], first[2]);
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 2);

        let changed = vec!["alpha".to_string(), "gamma".to_string()];
        cached.embed_batch(&changed).await.unwrap();
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 3);
        assert_eq!(cached.cached_len().await, 3);

        cached.embed("beta").await.unwrap();
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn bounded_cache_keeps_only_what_the_current_batch_needs() {
        let cached = CachedEmbedder::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        })
        .with_capacity(3);

        let first: Vec<String> = ["one", "two", "three"].iter().map(|t| t.to_string()).collect();
        cached.embed_batch(&first).await.unwrap();
        assert_eq!(cached.cached_len().await, 3);

        let second: Vec<String> = ["three", "four"].iter().map(|t| t.to_string()).collect();
        let vectors = cached.embed_batch(&second).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(cached.cached_len().await, 2);
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 4);

        let oversized: Vec<String> = ["a1", "b2", "c3", "d4", "e5"]
            .iter()
            .map(|t| t.to_string())
            .collect();
        let vectors = cached.embed_batch(&oversized).await.unwrap();
        assert_eq!(vectors.len(), 5);
        assert_eq!(cached.cached_len().await, 5);

        cached.embed("f6").await.unwrap();
        assert_eq!(cached.cached_len().await, 1);
    }

    #[tokio::test]
    async fn remote_vectors_are_returned_in_input_order() {
        let base = embeddings_stub(
            StatusCode::OK,
            r#"{"data":[{"index":1,"embedding":[0.0,1.0]},{"index":0,"embedding":[1.0,0.0]}]}"#,
        )
        .await;
        let embedder = remote(&base);

        let vectors = embedder
            .embed_batch(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn remote_dimension_and_status_errors_are_typed() {
        let short = r#"{"data":[{"index":0,"embedding":[1.0]}]}"#;
        let base = embeddings_stub(StatusCode::OK, short).await;
        let embedder = remote(&base);
        assert!(matches!(
            embedder.embed("text").await,
            Err(EmbedError::DimensionMismatch { expected: 2, actual: 1 })
        ));

        let base = embeddings_stub(StatusCode::UNAUTHORIZED, "bad key").await;
        let embedder = remote(&base);
        assert!(matches!(
            embedder.embed("text").await,
            Err(EmbedError::Response { status: 401, .. })
        ));

        assert!(RemoteEmbedder::new(&base, " ", "embed-small", 2, Duration::from_secs(5)).is_err());
    }
}
