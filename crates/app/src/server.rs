use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{delete, get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use docqa_core::{IngestionOptions, SessionManager, SplitMethod};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionManager,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Sessions untouched for this long are dropped.
    pub session_ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7860,
            session_ttl: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionCreateResponse {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub file_name: String,
    pub content_base64: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default)]
    pub split_method: SplitMethod,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub ok: bool,
    pub status: String,
    pub preview: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChunksResponse {
    pub ok: bool,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub show_full_content: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AskResponse {
    pub ok: bool,
    pub answer: String,
    pub sources: String,
}

type NotFound = (StatusCode, Json<Value>);

fn default_chunk_size() -> usize {
    IngestionOptions::default().chunk_size
}

fn default_chunk_overlap() -> usize {
    IngestionOptions::default().chunk_overlap
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{session_id}", delete(delete_session))
        .route("/api/sessions/{session_id}/documents", post(upload_document))
        .route("/api/sessions/{session_id}/chunks", get(view_chunks))
        .route("/api/sessions/{session_id}/ask", post(ask_question))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Periodically drops sessions idle for longer than `ttl`.
pub fn spawn_session_sweeper(
    sessions: SessionManager,
    ttl: Duration,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = sessions.evict_idle(ttl).await;
            if evicted > 0 {
                let remaining = sessions.len().await;
                debug!(evicted, remaining, "session sweep");
            }
        }
    })
}

pub async fn run_server(config: ServerConfig, state: AppState) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| "invalid host/port for docqa server")?;

    let sweeper = spawn_session_sweeper(
        state.sessions.clone(),
        config.session_ttl,
        config.sweep_interval,
    );
    let app = app_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        ttl_secs = config.session_ttl.as_secs(),
        "docqa listening on http://{}", addr
    );
    let served = axum::serve(listener, app).await;
    sweeper.abort();
    served?;
    Ok(())
}

async fn index() -> impl IntoResponse {
    Html(include_str!("../ui/index.html"))
}

async fn health() -> impl IntoResponse {
    Json(json!({"status":"ok","service":"docqa"}))
}

async fn create_session(State(state): State<AppState>) -> impl IntoResponse {
    let session = state.sessions.create_session().await;
    info!(session = session.id(), "session created");
    Json(SessionCreateResponse {
        session_id: session.id().to_string(),
    })
}

async fn delete_session(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Result<StatusCode, NotFound> {
    if !state.sessions.remove(&session_id).await {
        return Err(session_not_found());
    }
    info!(session = %session_id, "session closed");
    Ok(StatusCode::NO_CONTENT)
}

fn session_not_found() -> NotFound {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"ok": false, "error": "session_not_found"})),
    )
}

async fn upload_document(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<UploadRequest>,
) -> Result<Json<UploadResponse>, NotFound> {
    let session = state
        .sessions
        .get(&session_id)
        .await
        .ok_or_else(session_not_found)?;

    let bytes = match STANDARD.decode(request.content_base64.trim()) {
        Ok(bytes) => bytes,
        Err(error) => {
            warn!(session = %session_id, %error, "upload is not valid base64");
            return Ok(Json(UploadResponse {
                ok: false,
                status: format!("Processing failed: upload is not valid base64: {error}"),
                preview: String::new(),
            }));
        }
    };

    let options = IngestionOptions {
        chunk_size: request.chunk_size,
        chunk_overlap: request.chunk_overlap,
        split_method: request.split_method,
    };

    let response = match session
        .process_upload(&request.file_name, &bytes, options)
        .await
    {
        Ok(summary) => UploadResponse {
            ok: true,
            status: summary.status,
            preview: summary.preview,
        },
        Err(error) => {
            warn!(session = %session_id, file_name = %request.file_name, %error, "upload failed");
            UploadResponse {
                ok: false,
                status: format!("Processing failed: {error}"),
                preview: String::new(),
            }
        }
    };

    Ok(Json(response))
}

async fn view_chunks(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ChunksResponse>, NotFound> {
    let session = state
        .sessions
        .get(&session_id)
        .await
        .ok_or_else(session_not_found)?;

    let response = match session.view_all_chunks().await {
        Ok(content) => ChunksResponse { ok: true, content },
        Err(error) => ChunksResponse {
            ok: false,
            content: error.to_string(),
        },
    };
    Ok(Json(response))
}

async fn ask_question(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, NotFound> {
    let session = state
        .sessions
        .get(&session_id)
        .await
        .ok_or_else(session_not_found)?;

    let response = match session
        .answer_question(&request.question, request.show_full_content)
        .await
    {
        Ok(reply) => AskResponse {
            ok: true,
            answer: reply.answer.text,
            sources: reply.sources_text,
        },
        Err(error) => {
            warn!(session = %session_id, %error, "question failed");
            AskResponse {
                ok: false,
                answer: format!("Question failed: {error}"),
                sources: String::new(),
            }
        }
    };
    Ok(Json(response))
}
