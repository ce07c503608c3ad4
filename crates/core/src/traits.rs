use crate::error::{LlmError, SearchError};
use crate::llm::{ChatCompletion, ChatRequest};
use crate::models::{Chunk, SearchCandidate};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn index_vector_chunks(
        &self,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), SearchError>;

    /// At most `top_k` candidates, highest similarity first.
    async fn search_vector(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchCandidate>, SearchError>;

    async fn len(&self) -> Result<usize, SearchError>;

    async fn clear(&self) -> Result<(), SearchError>;
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError>;
}

#[async_trait]
impl<T: ChatModel + ?Sized> ChatModel for Arc<T> {
    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError> {
        (**self).complete(request).await
    }
}
