pub mod config;
pub mod server;

use anyhow::Context;
use config::{EmbedderBackend, ServiceConfig, StoreBackend};
use docsearch_core::{
    CharacterNgramEmbedder, Embedder, IngestionOptions, IngestionService, MemoryStore,
    QdrantStore, QueryOptions, QueryService, VectorStore,
};
use std::sync::Arc;
use tracing::info;

pub use server::{build_router, AppState, HttpSettings};

/// Builds the embedder and vector store named by `config` and wires both services on top.
/// A store that cannot be initialised is fatal.
pub async fn build_state(config: &ServiceConfig) -> anyhow::Result<AppState> {
    anyhow::ensure!(config.chunk_size > 0, "chunk size must be greater than zero");
    anyhow::ensure!(config.top_k > 0, "top_k must be greater than zero");

    let embedder = build_embedder(config)?;
    let store = build_store(config, embedder.dimensions()).await?;

    info!(
        embedder = embedder.model_name(),
        dimensions = embedder.dimensions(),
        store = ?config.store,
        collection = store.name(),
        "services ready"
    );

    tokio::fs::create_dir_all(&config.temp_dir)
        .await
        .with_context(|| format!("creating temp dir {}", config.temp_dir.display()))?;

    let ingestion = IngestionService::new(
        Arc::clone(&embedder),
        Arc::clone(&store),
        IngestionOptions {
            chunk_size: config.chunk_size,
        },
        &config.temp_dir,
    );
    let query = QueryService::new(embedder, store, QueryOptions { top_k: config.top_k });

    Ok(AppState::new(ingestion, query))
}

fn build_embedder(config: &ServiceConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    match config.embedder {
        EmbedderBackend::Hashed => Ok(Arc::new(CharacterNgramEmbedder {
            dimensions: config.embedding_dimensions,
        })),
        EmbedderBackend::Minilm => load_minilm(),
    }
}

#[cfg(feature = "minilm")]
fn load_minilm() -> anyhow::Result<Arc<dyn Embedder>> {
    let embedder = docsearch_core::SentenceEmbedder::load()
        .with_context(|| format!("loading {}", docsearch_core::MINILM_MODEL_ID))?;
    Ok(Arc::new(embedder))
}

#[cfg(not(feature = "minilm"))]
fn load_minilm() -> anyhow::Result<Arc<dyn Embedder>> {
    anyhow::bail!("the minilm embedder is not compiled in; rebuild with `--features minilm`")
}

async fn build_store(
    config: &ServiceConfig,
    dimensions: usize,
) -> anyhow::Result<Arc<dyn VectorStore>> {
    let store: Arc<dyn VectorStore> = match config.store {
        StoreBackend::Memory => match &config.persist_path {
            Some(path) => Arc::new(MemoryStore::open(&config.collection, dimensions, path).await?),
            None => Arc::new(MemoryStore::new(&config.collection, dimensions)),
        },
        StoreBackend::Qdrant => Arc::new(
            QdrantStore::connect(
                &config.qdrant_url,
                &config.collection,
                config.qdrant_api_key.clone(),
                dimensions,
            )
            .await?,
        ),
    };

    Ok(store)
}
