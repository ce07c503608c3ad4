//! Session-scoped state for the web UI. Each session owns its own corpus,
//! vector index and embedding memo; nothing is shared between sessions except
//! the base embedder and the chat model. Idle sessions are reclaimed by
//! `SessionManager::evict_idle`, and the manager never holds more than
//! `max_sessions` at once.

use crate::chunking::{filter_complex_metadata, split_documents, ChunkingConfig};
use crate::embeddings::{CachedEmbedder, Embedder};
use crate::error::{IngestError, QaError, SessionError};
use crate::extractor::load_bytes;
use crate::models::{Answer, Chunk, IngestionOptions};
use crate::orchestrator::{QaCoordinator, DEFAULT_TOP_K};
use crate::report;
use crate::stores::InMemoryVectorStore;
use crate::traits::ChatModel;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_MAX_SESSIONS: usize = 256;
pub const DEFAULT_SESSION_CACHE_ENTRIES: usize = 4096;

type SessionCoordinator =
    QaCoordinator<Arc<dyn Embedder>, InMemoryVectorStore, Arc<dyn ChatModel>>;

struct LoadedCorpus {
    file_name: String,
    chunks: Vec<Chunk>,
    coordinator: SessionCoordinator,
}

#[derive(Debug, Clone)]
pub struct UploadSummary {
    pub file_name: String,
    pub documents: usize,
    pub chunks: usize,
    pub status: String,
    pub preview: String,
}

#[derive(Debug, Clone)]
pub struct SessionAnswer {
    pub answer: Answer,
    pub sources_text: String,
}

pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    last_access_ms: AtomicI64,
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn ChatModel>,
    top_k: usize,
    corpus: RwLock<Option<LoadedCorpus>>,
}

impl Session {
    fn new(
        id: String,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn ChatModel>,
        top_k: usize,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            id,
            created_at,
            last_access_ms: AtomicI64::new(created_at.timestamp_millis()),
            embedder,
            model,
            top_k,
            corpus: RwLock::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_access(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_access_ms.load(Ordering::Relaxed))
            .unwrap_or(self.created_at)
    }

    fn touch(&self) {
        self.last_access_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_access()).to_std().unwrap_or_default()
    }

    pub async fn loaded_file(&self) -> Option<String> {
        self.corpus
            .read()
            .await
            .as_ref()
            .map(|corpus| corpus.file_name.clone())
    }

    /// Loads, splits and indexes an uploaded file, replacing whatever this
    /// session had loaded before. A file without text clears the session and
    /// fails with `IngestError::NoDocuments`.
    pub async fn process_upload(
        &self,
        file_name: &str,
        bytes: &[u8],
        options: IngestionOptions,
    ) -> Result<UploadSummary, SessionError> {
        let config = ChunkingConfig::from(options);
        config.validate()?;

        let mut status = String::from("Loading document...\n");
        let documents = load_bytes(file_name, bytes)?;
        status.push_str(&format!("Loaded {} document sections\n", documents.len()));

        status.push_str("Splitting document...\n");
        let chunks = split_documents(&documents, &config)?;
        status.push_str(&format!("Split into {} chunks\n", chunks.len()));

        let chunks = filter_complex_metadata(chunks);
        status.push_str(&format!(
            "{} chunks kept after metadata filtering\n",
            chunks.len()
        ));

        if chunks.is_empty() {
            warn!(session = %self.id, file_name, "upload produced no chunks");
            *self.corpus.write().await = None;
            return Err(IngestError::NoDocuments(file_name.to_string()).into());
        }

        status.push_str("Building vector index...\n");
        let coordinator = QaCoordinator::new(
            Arc::clone(&self.embedder),
            InMemoryVectorStore::default(),
            Arc::clone(&self.model),
        )
        .with_top_k(self.top_k);
        coordinator.ingest(&chunks).await?;
        status.push_str("Vector index ready\n");
        status.push_str("Question answering ready\n\n");
        status.push_str("Document processed, you can start asking questions.");

        let summary = UploadSummary {
            file_name: file_name.to_string(),
            documents: documents.len(),
            chunks: chunks.len(),
            status,
            preview: report::chunk_preview(&chunks),
        };

        info!(
            session = %self.id,
            file_name,
            documents = summary.documents,
            chunks = summary.chunks,
            chunk_size = config.chunk_size,
            chunk_overlap = config.chunk_overlap,
            "processed upload"
        );

        *self.corpus.write().await = Some(LoadedCorpus {
            file_name: file_name.to_string(),
            chunks,
            coordinator,
        });

        Ok(summary)
    }

    pub async fn view_all_chunks(&self) -> Result<String, SessionError> {
        let corpus = self.corpus.read().await;
        let corpus = corpus.as_ref().ok_or(QaError::NoDocuments)?;
        Ok(report::all_chunks(&corpus.chunks))
    }

    pub async fn answer_question(
        &self,
        question: &str,
        show_full_content: bool,
    ) -> Result<SessionAnswer, SessionError> {
        if question.trim().is_empty() {
            return Err(QaError::EmptyQuery.into());
        }

        let corpus = self.corpus.read().await;
        let corpus = corpus.as_ref().ok_or(QaError::NoDocuments)?;
        let answer = corpus.coordinator.ask(question).await?;
        let sources_text = report::sources_text(&answer.sources, show_full_content);

        Ok(SessionAnswer {
            answer,
            sources_text,
        })
    }
}

/// Owns every live session. Cloning shares the same map.
///
/// `embedder` is the shared base model; each session wraps it in its own
/// bounded `CachedEmbedder`, so the memo is dropped with the session.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn ChatModel>,
    top_k: usize,
    max_sessions: usize,
    cache_entries: usize,
}

impl SessionManager {
    pub fn new(embedder: Arc<dyn Embedder>, model: Arc<dyn ChatModel>) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            embedder,
            model,
            top_k: DEFAULT_TOP_K,
            max_sessions: DEFAULT_MAX_SESSIONS,
            cache_entries: DEFAULT_SESSION_CACHE_ENTRIES,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions.max(1);
        self
    }

    pub fn with_cache_entries(mut self, cache_entries: usize) -> Self {
        self.cache_entries = cache_entries.max(1);
        self
    }

    /// Creates a session. When the manager is full, the least recently used
    /// session is dropped first.
    pub async fn create_session(&self) -> Arc<Session> {
        let session_id = Uuid::new_v4().to_string();
        let embedder: Arc<dyn Embedder> = Arc::new(
            CachedEmbedder::new(Arc::clone(&self.embedder)).with_capacity(self.cache_entries),
        );
        let session = Arc::new(Session::new(
            session_id.clone(),
            embedder,
            Arc::clone(&self.model),
            self.top_k,
        ));

        let mut sessions = self.sessions.write().await;
        while sessions.len() >= self.max_sessions {
            let oldest = sessions
                .values()
                .min_by_key(|session| session.last_access_ms.load(Ordering::Relaxed))
                .map(|session| session.id.clone());
            let Some(oldest) = oldest else {
                break;
            };
            sessions.remove(&oldest);
            info!(
                session = %oldest,
                max_sessions = self.max_sessions,
                "dropped least recently used session"
            );
        }
        sessions.insert(session_id, Arc::clone(&session));
        session
    }

    /// Looks a session up and marks it as used.
    pub async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.read().await.get(session_id).cloned()?;
        session.touch();
        Some(session)
    }

    /// Drops every session idle for longer than `max_idle`. Returns how many
    /// were removed.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|id, session| {
            let idle = session.idle_for(now);
            if idle <= max_idle {
                return true;
            }
            info!(
                session = %id,
                idle_secs = idle.as_secs(),
                age_secs = (now - session.created_at).num_seconds(),
                "evicted idle session"
            );
            false
        });
        before - sessions.len()
    }

    pub async fn remove(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
