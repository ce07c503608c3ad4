use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("docx parse error: {0}")]
    Docx(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no documents loaded from {0}")]
    NoDocuments(String),
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding endpoint returned {status}: {details}")]
    Response { status: u16, details: String },

    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("search request failed: {0}")]
    Request(String),
}

/// Failures of a chat-completion call, one variant per user-visible cause.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request timed out after {0} seconds, check the network connection")]
    Timeout(u64),

    #[error("connection failed, check the network connection or the API base URL: {0}")]
    Connection(String),

    #[error("API request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("response is not valid JSON: {0}")]
    MalformedJson(String),

    #[error("response is missing the expected field `{0}`")]
    MissingField(String),

    #[error("request error: {0}")]
    Request(String),
}

impl LlmError {
    pub fn from_transport(error: reqwest::Error, timeout_secs: u64) -> Self {
        if error.is_timeout() {
            LlmError::Timeout(timeout_secs)
        } else if error.is_connect() {
            LlmError::Connection(error.to_string())
        } else {
            LlmError::Request(error.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing API key, set DOCQA_API_KEY or pass --api-key")]
    MissingApiKey,

    #[error("invalid base url `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid {name}: {details}")]
    InvalidValue { name: &'static str, details: String },

    #[error("failed to build http client: {0}")]
    Client(String),
}

#[derive(Debug, Error)]
pub enum QaError {
    #[error("question is empty")]
    EmptyQuery,

    #[error("no documents loaded, process a document first")]
    NoDocuments,

    #[error("embedding failed: {0}")]
    Embed(#[from] EmbedError),

    #[error("retrieval failed: {0}")]
    Search(#[from] SearchError),

    #[error("language model call failed: {0}")]
    Llm(#[from] LlmError),
}

/// Failures of the per-session UI workflow.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Qa(#[from] QaError),
}
