use crate::models::{Chunk, DistanceMetric, SearchCandidate};
use crate::traits::VectorIndex;
use crate::SearchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    chunk: Chunk,
    vector: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    metric: DistanceMetric,
    entries: Vec<IndexEntry>,
}

/// Brute-force nearest-neighbour index held in memory. Ties keep insertion
/// order.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    metric: DistanceMetric,
    entries: RwLock<Vec<IndexEntry>>,
}

impl InMemoryVectorStore {
    pub fn new(metric: DistanceMetric) -> Self {
        Self {
            metric,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub async fn save(&self, path: &Path) -> Result<(), SearchError> {
        let entries = self.entries.read().await.clone();
        let snapshot = Snapshot {
            metric: self.metric,
            entries,
        };
        tokio::fs::write(path, serde_json::to_vec(&snapshot)?).await?;
        debug!(path = %path.display(), entries = snapshot.entries.len(), "saved vector snapshot");
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self, SearchError> {
        let bytes = tokio::fs::read(path).await?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        Ok(Self {
            metric: snapshot.metric,
            entries: RwLock::new(snapshot.entries),
        })
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// `1 / (1 + distance)`, so identical vectors score 1 and scores fall with distance.
pub fn euclidean_similarity(a: &[f32], b: &[f32]) -> f32 {
    let distance = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt();
    1.0 / (1.0 + distance)
}

#[async_trait]
impl VectorIndex for InMemoryVectorStore {
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

        let mut entries = self.entries.write().await;
        let expected = entries
            .first()
            .map(|entry| entry.vector.len())
            .or_else(|| embeddings.first().map(Vec::len));

        if let Some(expected) = expected {
            if let Some(bad) = embeddings.iter().find(|vector| vector.len() != expected) {
                return Err(SearchError::Request(format!(
                    "embedding dimension {} != {}",
                    bad.len(),
                    expected
                )));
            }
        }

        entries.extend(
            chunks
                .iter()
                .zip(embeddings.iter())
                .map(|(chunk, vector)| IndexEntry {
                    chunk: chunk.clone(),
                    vector: vector.clone(),
                }),
        );
        Ok(())
    }

    async fn search_vector(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchCandidate>, SearchError> {
        let entries = self.entries.read().await;
        if let Some(first) = entries.first() {
            if first.vector.len() != query_vector.len() {
                return Err(SearchError::Request(format!(
                    "query vector dim {} is not {}",
                    query_vector.len(),
                    first.vector.len()
                )));
            }
        }

        let mut scored: Vec<SearchCandidate> = entries
            .iter()
            .map(|entry| SearchCandidate {
                chunk: entry.chunk.clone(),
                score: match self.metric {
                    DistanceMetric::Cosine => cosine_similarity(&entry.vector, query_vector),
                    DistanceMetric::Euclidean => euclidean_similarity(&entry.vector, query_vector),
                },
            })
            .collect();

        scored.sort_by(|left, right| right.score.total_cmp(&left.score));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn len(&self) -> Result<usize, SearchError> {
        Ok(self.entries.read().await.len())
    }

    async fn clear(&self) -> Result<(), SearchError> {
        self.entries.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            text: text.to_string(),
            metadata: Metadata::new(),
            document_index: 0,
            chunk_index: 0,
            start_char: 0,
        }
    }

    async fn seeded(metric: DistanceMetric) -> InMemoryVectorStore {
        let store = InMemoryVectorStore::new(metric);
        store
            .index_vector_chunks(
                &[chunk("a", "east"), chunk("b", "north"), chunk("c", "north-east")],
                &[vec![1.0, 0.0], vec![0.0, 1.0], vec![0.7, 0.7]],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn cosine_search_ranks_by_descending_similarity() {
        let store = seeded(DistanceMetric::Cosine).await;
        let hits = store.search_vector(&[1.0, 0.1], 3).await.unwrap();

        let ids: Vec<_> = hits.iter().map(|hit| hit.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
        assert!(hits.windows(2).all(|pair| pair[0].score >= pair[1].score));
    }

    #[tokio::test]
    async fn euclidean_search_ranks_nearest_first() {
        let store = seeded(DistanceMetric::Euclidean).await;
        let hits = store.search_vector(&[0.0, 0.9], 2).await.unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.chunk_id, "b");
        assert!(hits[0].score <= 1.0 && hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn top_k_never_exceeds_entry_count() {
        let store = seeded(DistanceMetric::Cosine).await;
        assert_eq!(store.search_vector(&[1.0, 0.0], 10).await.unwrap().len(), 3);
        assert_eq!(store.search_vector(&[1.0, 0.0], 0).await.unwrap().len(), 0);

        let empty = InMemoryVectorStore::default();
        assert!(empty.search_vector(&[1.0, 0.0], 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mismatched_inputs_are_rejected() {
        let store = seeded(DistanceMetric::Cosine).await;
        assert!(store.search_vector(&[1.0, 0.0, 0.0], 1).await.is_err());
        assert!(store
            .index_vector_chunks(&[chunk("d", "up")], &[vec![1.0, 0.0, 0.0]])
            .await
            .is_err());
        assert!(store.index_vector_chunks(&[chunk("e", "down")], &[]).await.is_err());
    }

    #[tokio::test]
    async fn clear_empties_the_index() {
        let store = seeded(DistanceMetric::Cosine).await;
        store.clear().await.unwrap();
        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_disk() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("index.json");
        let store = seeded(DistanceMetric::Euclidean).await;
        store.save(&path).await?;

        let restored = InMemoryVectorStore::load(&path).await?;
        assert_eq!(restored.metric(), DistanceMetric::Euclidean);
        assert_eq!(restored.len().await?, 3);
        let hits = restored.search_vector(&[0.0, 1.0], 1).await?;
        assert_eq!(hits[0].chunk.chunk_id, "b");
        Ok(())
    }
}
