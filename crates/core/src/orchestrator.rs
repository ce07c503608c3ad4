use crate::embeddings::Embedder;
use crate::error::{QaError, SearchError};
use crate::llm::{ChatMessage, ChatRequest};
use crate::models::{Answer, Chunk, SearchCandidate};
use crate::traits::{ChatModel, VectorIndex};
use tracing::{error, info};

pub const DEFAULT_TOP_K: usize = 4;

const CONTEXT_INSTRUCTION: &str = "Use the following pieces of context to answer the user's question. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.";

/// Retrieval plus generation over one vector index. The same embedder is used
/// for chunks at ingest time and for queries.
pub struct QaCoordinator<E, V, M>
where
    E: Embedder,
    V: VectorIndex,
    M: ChatModel,
{
    embedder: E,
    index: V,
    model: M,
    top_k: usize,
}

impl<E, V, M> QaCoordinator<E, V, M>
where
    E: Embedder,
    V: VectorIndex,
    M: ChatModel,
{
    pub fn new(embedder: E, index: V, model: M) -> Self {
        Self {
            embedder,
            index,
            model,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn index(&self) -> &V {
        &self.index
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Embeds all chunk texts in one batch and adds them to the index.
    pub async fn ingest(&self, chunks: &[Chunk]) -> Result<usize, QaError> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(QaError::Search(SearchError::Request(format!(
                "embedder returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            ))));
        }

        self.index.index_vector_chunks(chunks, &embeddings).await?;
        info!(chunks = chunks.len(), dimensions = self.embedder.dimensions(), "indexed chunks");
        Ok(chunks.len())
    }

    pub async fn retrieve(&self, query: &str) -> Result<Vec<SearchCandidate>, QaError> {
        if query.trim().is_empty() {
            return Err(QaError::EmptyQuery);
        }
        if self.index.len().await? == 0 {
            return Err(QaError::NoDocuments);
        }

        let query_vector = self.embedder.embed(query).await?;
        Ok(self.index.search_vector(&query_vector, self.top_k).await?)
    }

    pub async fn ask(&self, query: &str) -> Result<Answer, QaError> {
        let sources = self.retrieve(query).await?;
        let request = build_request(query, &sources);

        let completion = self.model.complete(&request).await.map_err(|err| {
            error!(error = %err, model = self.model.model_name(), "answer generation failed");
            QaError::Llm(err)
        })?;

        info!(
            sources = sources.len(),
            answer_chars = completion.content.chars().count(),
            "answered question"
        );
        Ok(Answer {
            text: completion.content,
            sources,
            model: completion
                .model
                .unwrap_or_else(|| self.model.model_name().to_string()),
            usage: completion.usage,
        })
    }
}

/// Stuffs every retrieved chunk into the system message; the question goes in
/// the user message unchanged.
pub fn build_request(query: &str, sources: &[SearchCandidate]) -> ChatRequest {
    let context = sources
        .iter()
        .map(|candidate| candidate.chunk.text.trim())
        .collect::<Vec<_>>()
        .join("\n\n");

    ChatRequest::new(vec![
        ChatMessage::system(format!("{CONTEXT_INSTRUCTION}\n----------------\n{context}")),
        ChatMessage::user(query),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::{split_documents, ChunkingConfig};
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::LlmError;
    use crate::llm::ChatCompletion;
    use crate::models::{Document, SplitMethod, Usage};
    use crate::stores::InMemoryVectorStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    enum Reply {
        Text(&'static str),
        Status(u16),
    }

    struct FakeChatModel {
        reply: Reply,
        seen: Mutex<Vec<ChatRequest>>,
    }

    impl FakeChatModel {
        fn new(reply: Reply) -> Self {
            Self {
                reply,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for FakeChatModel {
        fn model_name(&self) -> &str {
            "fake-model"
        }

        async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError> {
            self.seen.lock().unwrap().push(request.clone());
            match self.reply {
                Reply::Text(text) => Ok(ChatCompletion {
                    content: text.to_string(),
                    model: None,
                    usage: Some(Usage {
                        prompt_tokens: Some(10),
                        completion_tokens: Some(3),
                        total_tokens: Some(13),
                    }),
                }),
                Reply::Status(status) => Err(LlmError::Status {
                    status,
                    body: "upstream unavailable".to_string(),
                }),
            }
        }
    }

    fn corpus() -> Vec<Chunk> {
        let text = "Hydraulic pumps convert mechanical power into fluid power.\n\n\
                    Bearings fail when lubrication is insufficient.\n\n\
                    Pressure relief valves protect the circuit from overload.\n\n\
                    Filters keep particles out of the hydraulic fluid.";
        let config = ChunkingConfig {
            chunk_size: 70,
            chunk_overlap: 0,
            method: SplitMethod::Recursive,
        };
        let document = Document::new(text).with_metadata("source", "manual.txt");
        split_documents(&[document], &config).unwrap()
    }

    type TestCoordinator =
        QaCoordinator<CharacterNgramEmbedder, InMemoryVectorStore, FakeChatModel>;

    async fn coordinator(reply: Reply) -> TestCoordinator {
        let coordinator = QaCoordinator::new(
            CharacterNgramEmbedder::default(),
            InMemoryVectorStore::default(),
            FakeChatModel::new(reply),
        )
        .with_top_k(2);
        coordinator.ingest(&corpus()).await.unwrap();
        coordinator
    }

    #[tokio::test]
    async fn answer_text_is_returned_verbatim_with_sources() {
        let coordinator = coordinator(Reply::Text("Relief valves prevent overload.")).await;
        let answer = coordinator.ask("What protects the circuit from overload?").await.unwrap();

        assert_eq!(answer.text, "Relief valves prevent overload.");
        assert_eq!(answer.model, "fake-model");
        assert_eq!(answer.sources.len(), 2);
        assert!(answer.sources[0].chunk.text.contains("relief valves"));
        assert!(answer.sources[0].score >= answer.sources[1].score);
        assert_eq!(answer.usage.and_then(|usage| usage.total_tokens), Some(13));
    }

    #[tokio::test]
    async fn prompt_contains_question_and_retrieved_context() {
        let coordinator = coordinator(Reply::Text("ok")).await;
        coordinator.ask("Why do bearings fail?").await.unwrap();

        let seen = coordinator.model().seen.lock().unwrap();
        let request = &seen[0];
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, "system");
        assert!(request.messages[0].content.contains("Bearings fail when lubrication"));
        assert_eq!(request.messages[1], ChatMessage::user("Why do bearings fail?"));
    }

    #[tokio::test]
    async fn upstream_failure_is_reported_not_raised() {
        let coordinator = coordinator(Reply::Status(503)).await;
        let result = coordinator.ask("What do filters do?").await;

        match result {
            Err(QaError::Llm(LlmError::Status { status, .. })) => assert_eq!(status, 503),
            other => panic!("expected llm status error, got {other:?}"),
        }
        let message = coordinator.ask("What do filters do?").await.unwrap_err().to_string();
        assert!(message.contains("503"));
    }

    #[tokio::test]
    async fn retrieval_is_repeatable() {
        let coordinator = coordinator(Reply::Text("ok")).await;
        let first = coordinator.retrieve("hydraulic fluid filters").await.unwrap();
        let second = coordinator.retrieve("hydraulic fluid filters").await.unwrap();

        let ids = |hits: &[SearchCandidate]| {
            hits.iter()
                .map(|hit| hit.chunk.chunk_id.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), ids(&second));
    }

    #[tokio::test]
    async fn top_k_is_capped_by_chunk_count() {
        let coordinator = coordinator(Reply::Text("ok")).await.with_top_k(50);
        let hits = coordinator.retrieve("pumps").await.unwrap();
        assert_eq!(hits.len(), corpus().len());
    }

    #[tokio::test]
    async fn empty_question_and_empty_index_are_rejected() {
        let coordinator = coordinator(Reply::Text("ok")).await;
        assert!(matches!(coordinator.ask("   ").await, Err(QaError::EmptyQuery)));

        let empty = QaCoordinator::new(
            CharacterNgramEmbedder::default(),
            InMemoryVectorStore::default(),
            FakeChatModel::new(Reply::Text("unused")),
        );
        assert_eq!(empty.ingest(&[]).await.unwrap(), 0);
        assert!(matches!(empty.ask("anything").await, Err(QaError::NoDocuments)));
        assert!(empty.model().seen.lock().unwrap().is_empty());
    }
}
