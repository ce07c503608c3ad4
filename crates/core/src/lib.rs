pub mod chunking;
pub mod config;
pub mod connectivity;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod report;
pub mod session;
pub mod stores;
pub mod traits;

pub use chunking::{
    filter_complex_metadata, normalize_whitespace, reassemble, split_documents, split_text,
    ChunkingConfig,
};
pub use config::LlmConfig;
pub use embeddings::{
    CachedEmbedder, CharacterNgramEmbedder, Embedder, RemoteEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{ConfigError, EmbedError, IngestError, LlmError, QaError, SearchError, SessionError};
pub use extractor::{load_bytes, load_document, DocumentExtractor, PageText};
pub use ingest::{
    discover_documents, ingest_path, load_path_best_effort, IngestionReport, SkippedFile,
};
pub use llm::{ChatCompletion, ChatMessage, ChatRequest, OpenAiCompatClient};
pub use models::{
    Answer, Chunk, DistanceMetric, Document, FileType, IngestionOptions, Metadata,
    SearchCandidate, SplitMethod, Usage,
};
pub use orchestrator::{QaCoordinator, DEFAULT_TOP_K};
pub use session::{
    Session, SessionAnswer, SessionManager, UploadSummary, DEFAULT_MAX_SESSIONS,
    DEFAULT_SESSION_CACHE_ENTRIES,
};
pub use stores::{InMemoryVectorStore, QdrantStore};
pub use traits::{ChatModel, VectorIndex};
