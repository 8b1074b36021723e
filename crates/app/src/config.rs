use clap::{Args, ValueEnum};
use std::path::PathBuf;

/// Settings shared by every subcommand. Each flag can also be supplied through the
/// environment variable named next to it.
#[derive(Debug, Clone, Args)]
pub struct ServiceConfig {
    /// Interface the HTTP server binds to
    #[arg(long, env = "DOCSEARCH_HOST", default_value = "127.0.0.1", global = true)]
    pub host: String,

    /// Port the HTTP server listens on
    #[arg(long, env = "DOCSEARCH_PORT", default_value_t = 8000, global = true)]
    pub port: u16,

    /// Vector store backend
    #[arg(long, env = "DOCSEARCH_STORE", value_enum, default_value_t = StoreBackend::Memory, global = true)]
    pub store: StoreBackend,

    /// Collection name, created on startup if missing
    #[arg(long, env = "DOCSEARCH_COLLECTION", default_value = "document_collection", global = true)]
    pub collection: String,

    /// Snapshot file for the memory store; without it the collection lives only in memory
    #[arg(long, env = "DOCSEARCH_PERSIST_PATH", global = true)]
    pub persist_path: Option<PathBuf>,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333", global = true)]
    pub qdrant_url: String,

    /// Qdrant API key
    #[arg(long, env = "QDRANT_API_KEY", global = true, hide_env_values = true)]
    pub qdrant_api_key: Option<String>,

    /// Embedding backend
    #[arg(long, env = "DOCSEARCH_EMBEDDER", value_enum, default_value_t = EmbedderBackend::Hashed, global = true)]
    pub embedder: EmbedderBackend,

    /// Vector length of the hashed embedder
    #[arg(long, env = "DOCSEARCH_EMBEDDING_DIMENSIONS", default_value_t = docsearch_core::DEFAULT_EMBEDDING_DIMENSIONS, global = true)]
    pub embedding_dimensions: usize,

    /// Words per chunk
    #[arg(long, env = "DOCSEARCH_CHUNK_SIZE", default_value_t = docsearch_core::DEFAULT_CHUNK_SIZE, global = true)]
    pub chunk_size: usize,

    /// Results returned by a query unless the request overrides it
    #[arg(long, env = "DOCSEARCH_TOP_K", default_value_t = docsearch_core::DEFAULT_TOP_K, global = true)]
    pub top_k: usize,

    /// Directory uploads are staged in while their text is extracted
    #[arg(long, env = "DOCSEARCH_TEMP_DIR", default_value = "temp_files", global = true)]
    pub temp_dir: PathBuf,

    /// Largest accepted upload body, in bytes
    #[arg(long, env = "DOCSEARCH_MAX_UPLOAD_BYTES", default_value_t = 32 * 1024 * 1024, global = true)]
    pub max_upload_bytes: usize,

    /// Origins allowed to call the API from a browser
    #[arg(
        long,
        env = "DOCSEARCH_CORS_ORIGINS",
        value_delimiter = ',',
        default_value = "http://localhost,http://127.0.0.1,http://localhost:8000",
        global = true
    )]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    /// In-process collection, optionally snapshotted to disk
    Memory,
    /// Qdrant over its REST API
    Qdrant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EmbedderBackend {
    /// Hashed character trigrams, no model download
    Hashed,
    /// sentence-transformers/all-MiniLM-L6-v2 (requires the `minilm` feature)
    Minilm,
}

impl ServiceConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: ServiceConfig,
    }

    #[test]
    fn flags_override_defaults() {
        let cli = TestCli::try_parse_from([
            "docsearch",
            "--store",
            "qdrant",
            "--chunk-size",
            "120",
            "--port",
            "9100",
            "--cors-origins",
            "http://a.test,http://b.test",
        ])
        .unwrap();

        assert_eq!(cli.config.store, StoreBackend::Qdrant);
        assert_eq!(cli.config.chunk_size, 120);
        assert_eq!(cli.config.bind_address(), format!("{}:9100", cli.config.host));
        assert_eq!(cli.config.cors_origins, vec!["http://a.test", "http://b.test"]);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(TestCli::try_parse_from(["docsearch", "--embedder", "word2vec"]).is_err());
    }
}
