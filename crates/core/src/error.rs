use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    Pdf(String),

    #[error("pdf had no readable page text: {0}")]
    NoText(String),

    #[error("docx parse error: {0}")]
    Docx(String),

    #[error("text is not valid utf-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Error)]
pub enum ChunkingError {
    #[error("invalid chunking config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("failed to load embedding model: {0}")]
    ModelLoad(String),

    #[error("embedding inference failed: {0}")]
    Inference(String),

    #[error("embedding backend returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to initialize collection {collection}: {details}")]
    Init { collection: String, details: String },

    #[error("failed to write to collection: {0}")]
    Write(String),

    #[error("failed to query collection: {0}")]
    Query(String),

    #[error("record id already exists: {0}")]
    DuplicateId(String),

    #[error("invalid response from {backend}: {details}")]
    Backend { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a single ingestion call. The `Display` form is what callers surface to users.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to stage upload: {0}")]
    Staging(#[source] std::io::Error),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Chunking(#[from] ChunkingError),

    #[error(transparent)]
    Embedding(#[from] EmbedError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("ingestion task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("top_k must be greater than zero")]
    InvalidTopK,

    #[error(transparent)]
    Embedding(#[from] EmbedError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("query task failed: {0}")]
    Task(String),
}
