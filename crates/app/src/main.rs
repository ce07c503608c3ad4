use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use docqa_cli::{run_server, AppState, ServerConfig};
use docqa_core::config::{DEFAULT_APP_NAME, DEFAULT_APP_URL, DEFAULT_BASE_URL, DEFAULT_MODEL};
use docqa_core::connectivity::{self, ConnectionReport, QUESTION_MAX_TOKENS};
use docqa_core::report::{self, snippet};
use docqa_core::{
    ingest_path, CachedEmbedder, CharacterNgramEmbedder, ChatModel, Chunk, DistanceMetric,
    Embedder, InMemoryVectorStore, IngestionOptions, LlmConfig, QaCoordinator, QdrantStore,
    RemoteEmbedder, SessionManager, SplitMethod, VectorIndex, DEFAULT_MAX_SESSIONS,
    DEFAULT_TOP_K,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_QUESTION: &str = "Summarize what this document is mainly about.";
const FOLLOW_UP_QUESTION: &str = "Please briefly introduce what artificial intelligence is.";
const SOURCE_SNIPPET_CHARS: usize = 200;

#[derive(Parser)]
#[command(name = "docqa", version, about = "Ask questions about local documents")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// API key for the chat-completions endpoint
    #[arg(long, env = "DOCQA_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// OpenAI-compatible API base URL
    #[arg(long, env = "DOCQA_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Chat model identifier
    #[arg(long, env = "DOCQA_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Sampling temperature
    #[arg(long, env = "DOCQA_TEMPERATURE", default_value = "0.3")]
    temperature: f32,

    /// Maximum tokens in a generated answer
    #[arg(long, env = "DOCQA_MAX_TOKENS", default_value = "1500")]
    max_tokens: u32,

    /// Request timeout in seconds
    #[arg(long, env = "DOCQA_TIMEOUT_SECS", default_value = "30")]
    timeout_secs: u64,

    /// Application name sent as X-Title
    #[arg(long, env = "DOCQA_APP_NAME", default_value = DEFAULT_APP_NAME)]
    app_name: String,

    /// Application URL sent as HTTP-Referer
    #[arg(long, env = "DOCQA_APP_URL", default_value = DEFAULT_APP_URL)]
    app_url: String,
}

#[derive(clap::Args)]
struct ChunkArgs {
    /// Document file, or a folder searched recursively.
    #[arg(long)]
    path: PathBuf,
    /// Target chunk size in characters.
    #[arg(long, default_value = "500")]
    chunk_size: usize,
    /// Characters shared between consecutive chunks.
    #[arg(long, default_value = "50")]
    chunk_overlap: usize,
    /// `recursive` or `paragraph`.
    #[arg(long, default_value = "recursive")]
    split_method: SplitMethod,
}

impl ChunkArgs {
    fn options(&self) -> IngestionOptions {
        IngestionOptions {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            split_method: self.split_method,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Load a document, index it and answer one question about it.
    Ask {
        #[command(flatten)]
        chunking: ChunkArgs,
        /// Question to ask.
        #[arg(long, default_value = DEFAULT_QUESTION)]
        question: String,
        /// Number of chunks retrieved as context.
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
        /// Number of source snippets to print.
        #[arg(long, default_value = "2")]
        show_sources: usize,
        /// Index into Qdrant instead of memory.
        #[arg(long)]
        qdrant_url: Option<String>,
        /// Qdrant collection name.
        #[arg(long, default_value = "docqa_chunks")]
        qdrant_collection: String,
        /// Write the in-memory index to a JSON snapshot.
        #[arg(long)]
        save_index: Option<PathBuf>,
        /// Use the API's `/embeddings` endpoint with this model instead of the
        /// local n-gram embedder.
        #[arg(long)]
        embedding_model: Option<String>,
        /// Vector size returned by `--embedding-model`.
        #[arg(long, default_value_t = 1536)]
        embedding_dimensions: usize,
    },
    /// Split a document and print its chunks.
    Chunks {
        #[command(flatten)]
        chunking: ChunkArgs,
        /// Print every chunk in full instead of the preview.
        #[arg(long, default_value_t = false)]
        all: bool,
    },
    /// Detailed connection test followed by a sample question.
    Ping,
    /// Send one question straight to the model.
    Chat {
        #[arg(long)]
        question: String,
        #[arg(long, default_value_t = QUESTION_MAX_TOKENS)]
        max_tokens: u32,
    },
    /// Minimal request that only reports whether the API answers.
    QuickCheck,
    /// Start the web UI.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value = "7860")]
        port: u16,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
        /// Drop sessions idle for this many seconds.
        #[arg(long, default_value_t = 3600)]
        session_ttl_secs: u64,
        #[arg(long, default_value_t = DEFAULT_MAX_SESSIONS)]
        max_sessions: usize,
    },
}

impl Cli {
    fn llm_config(&self) -> LlmConfig {
        LlmConfig {
            api_key: self.api_key.clone().unwrap_or_default(),
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            timeout: Duration::from_secs(self.timeout_secs),
            app_name: self.app_name.clone(),
            app_url: self.app_url.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let llm_config = cli.llm_config();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        model = %llm_config.model,
        "docqa boot"
    );

    match cli.command {
        Command::Ask {
            chunking,
            question,
            top_k,
            show_sources,
            qdrant_url,
            qdrant_collection,
            save_index,
            embedding_model,
            embedding_dimensions,
        } => {
            let Some(chunks) = load_chunks(&chunking.path, chunking.options())? else {
                return Ok(());
            };
            let client = llm_config.build_client()?;
            let embedder: Arc<dyn Embedder> = match embedding_model {
                Some(model) => Arc::new(CachedEmbedder::new(RemoteEmbedder::new(
                    &llm_config.base_url,
                    llm_config.api_key.clone(),
                    model,
                    embedding_dimensions,
                    llm_config.timeout,
                )?)),
                None => Arc::new(CachedEmbedder::new(CharacterNgramEmbedder::default())),
            };

            match qdrant_url {
                Some(url) => {
                    if save_index.is_some() {
                        warn!("--save-index only applies to the in-memory index, ignoring");
                    }
                    let store = QdrantStore::new(
                        url,
                        qdrant_collection,
                        embedder.dimensions(),
                        DistanceMetric::Cosine,
                    );
                    store.ensure_collection().await?;
                    store.clear().await?;
                    let coordinator = QaCoordinator::new(embedder, store, client).with_top_k(top_k);
                    answer_and_print(&coordinator, &chunks, &question, show_sources).await?;
                }
                None => {
                    let coordinator =
                        QaCoordinator::new(embedder, InMemoryVectorStore::default(), client)
                            .with_top_k(top_k);
                    answer_and_print(&coordinator, &chunks, &question, show_sources).await?;
                    if let Some(path) = save_index {
                        coordinator
                            .index()
                            .save(&path)
                            .await
                            .with_context(|| {
                                format!("failed to save index to {}", path.display())
                            })?;
                        println!("Index saved to {}", path.display());
                    }
                }
            }
        }
        Command::Chunks { chunking, all } => {
            let Some(chunks) = load_chunks(&chunking.path, chunking.options())? else {
                return Ok(());
            };
            if all {
                println!("{}", report::all_chunks(&chunks));
            } else {
                println!("{}", report::chunk_preview(&chunks));
            }
        }
        Command::Ping => {
            let client = llm_config.build_client()?;
            println!("Testing API connection...");
            println!("Endpoint: {}", client.endpoint());
            println!("Model: {}", client.config().model);

            let report = connectivity::test_connection(&client)
                .await
                .context("API connection test failed")?;
            println!("\nAPI connection succeeded!");
            print_report(&report);

            println!("\nAsking a sample question...");
            println!("Question: {FOLLOW_UP_QUESTION}");
            let answer =
                connectivity::ask_question(&client, FOLLOW_UP_QUESTION, QUESTION_MAX_TOKENS)
                    .await
                    .context("sample question failed")?;
            print_report(&answer);
        }
        Command::Chat {
            question,
            max_tokens,
        } => {
            let client = llm_config.build_client()?;
            println!("Question: {question}");
            let report = connectivity::ask_question(&client, &question, max_tokens)
                .await
                .context("question failed")?;
            print_report(&report);
        }
        Command::QuickCheck => {
            let client = llm_config.build_client()?;
            match connectivity::quick_check(&client).await {
                Ok(()) => println!("API connection OK ({})", client.model_name()),
                Err(error) => {
                    println!("API connection failed: {error}");
                    return Err(error.into());
                }
            }
        }
        Command::Serve {
            host,
            port,
            top_k,
            session_ttl_secs,
            max_sessions,
        } => {
            let client = llm_config.build_client()?;
            let sessions = SessionManager::new(
                Arc::new(CharacterNgramEmbedder::default()),
                Arc::new(client),
            )
            .with_top_k(top_k)
            .with_max_sessions(max_sessions);
            let config = ServerConfig {
                host,
                port,
                session_ttl: Duration::from_secs(session_ttl_secs),
                ..ServerConfig::default()
            };
            run_server(config, AppState { sessions }).await?;
        }
    }

    Ok(())
}

/// `None` when the path yielded no chunks; the reason has already been printed.
fn load_chunks(path: &Path, options: IngestionOptions) -> anyhow::Result<Option<Vec<Chunk>>> {
    let report = ingest_path(path, options)
        .with_context(|| format!("failed to load {}", path.display()))?;

    for skipped in &report.skipped_files {
        warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped document");
    }
    println!("Loaded {} document sections", report.documents.len());
    println!("Split into {} chunks", report.chunks.len());

    if report.chunks.is_empty() {
        println!("No documents loaded from {}", path.display());
        return Ok(None);
    }
    Ok(Some(report.chunks))
}

async fn answer_and_print<E, V, M>(
    coordinator: &QaCoordinator<E, V, M>,
    chunks: &[Chunk],
    question: &str,
    show_sources: usize,
) -> anyhow::Result<()>
where
    E: Embedder,
    V: VectorIndex,
    M: ChatModel,
{
    coordinator.ingest(chunks).await?;
    println!("Vector index ready");
    println!("\nQuestion: {question}");

    let answer = match coordinator.ask(question).await {
        Ok(answer) => answer,
        Err(err) => {
            error!(error = %err, "question answering failed");
            println!("Error: {err}");
            return Err(err.into());
        }
    };

    println!("\nAnswer:\n{}", answer.text);
    if show_sources > 0 && !answer.sources.is_empty() {
        println!("\nSources:");
        for (index, source) in answer.sources.iter().take(show_sources).enumerate() {
            println!(
                "{}. [{} #{} score={:.4}] {}",
                index + 1,
                source.chunk.source(),
                source.chunk.chunk_index,
                source.score,
                snippet(&source.chunk.text, SOURCE_SNIPPET_CHARS)
            );
        }
    }
    if let Some(usage) = &answer.usage {
        println!("\n{}", connectivity::format_usage(usage));
    }
    Ok(())
}

fn print_report(report: &ConnectionReport) {
    println!("Model: {}", report.model);
    println!("Reply: {}", report.reply);
    println!("Elapsed: {:.2}s", report.elapsed.as_secs_f64());
    match &report.usage {
        Some(usage) => println!("{}", connectivity::format_usage(usage)),
        None => println!("Token usage: N/A"),
    }
}
