use crate::embeddings::Embedder;
use crate::traits::VectorStore;
use crate::{QueryError, QueryOptions};
use std::sync::Arc;
use tracing::debug;

pub struct QueryService {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    options: QueryOptions,
}

impl QueryService {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        options: QueryOptions,
    ) -> Self {
        Self {
            embedder,
            store,
            options,
        }
    }

    pub fn default_top_k(&self) -> usize {
        self.options.top_k
    }

    /// Nearest chunk texts for `text`, closest first. No matches is `Ok(vec![])`, never an error.
    pub async fn query(&self, text: &str, top_k: usize) -> Result<Vec<String>, QueryError> {
        if top_k == 0 {
            return Err(QueryError::InvalidTopK);
        }

        let embedder = Arc::clone(&self.embedder);
        let owned = text.to_string();
        let embedding = tokio::task::spawn_blocking(move || embedder.embed(&owned))
            .await
            .map_err(|error| QueryError::Task(error.to_string()))??;

        let results = self.store.query(&embedding, top_k).await?;
        debug!(top_k, results = results.len(), collection = self.store.name(), "query answered");
        Ok(results)
    }

    pub async fn query_default(&self, text: &str) -> Result<Vec<String>, QueryError> {
        self.query(text, self.options.top_k).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        CharacterNgramEmbedder, IngestionOptions, IngestionService, MemoryStore, UploadedFile,
    };
    use tempfile::tempdir;

    fn shared() -> (Arc<dyn Embedder>, Arc<dyn VectorStore>) {
        (
            Arc::new(CharacterNgramEmbedder::default()),
            Arc::new(MemoryStore::new("docs", crate::DEFAULT_EMBEDDING_DIMENSIONS)),
        )
    }

    #[tokio::test]
    async fn empty_store_yields_empty_results() {
        let (embedder, store) = shared();
        let service = QueryService::new(embedder, store, QueryOptions::default());

        let results = service.query_default("anything at all").await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn zero_top_k_is_rejected() {
        let (embedder, store) = shared();
        let service = QueryService::new(embedder, store, QueryOptions::default());

        assert!(matches!(service.query("x", 0).await, Err(QueryError::InvalidTopK)));
    }

    #[tokio::test]
    async fn ingested_text_is_found_by_a_substring_query() -> Result<(), Box<dyn std::error::Error>> {
        let temp = tempdir()?;
        let (embedder, store) = shared();
        let ingestion = IngestionService::new(
            embedder.clone(),
            store.clone(),
            IngestionOptions { chunk_size: 12 },
            temp.path(),
        );
        let text = concat!(
            "Centrifugal pumps convert rotational kinetic energy into hydrodynamic energy of the fluid flow. ",
            "Bread dough rises when yeast ferments sugars and releases carbon dioxide gas slowly. ",
            "Orbital mechanics describes how satellites move under the influence of gravity alone."
        );
        ingestion.ingest(UploadedFile::new("mixed.txt", text)).await?;

        let service = QueryService::new(embedder, store, QueryOptions::default());
        let results = service.query_default("yeast ferments sugars").await?;

        assert!(!results.is_empty());
        assert!(results.len() <= 5);
        assert!(results.iter().any(|chunk| chunk.contains("yeast ferments sugars")));
        Ok(())
    }
}
