pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod query;
#[cfg(feature = "minilm")]
pub mod sentence;
pub mod stores;
pub mod traits;

pub use chunking::{chunk_words, ChunkingConfig};
pub use embeddings::{CharacterNgramEmbedder, Embedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{
    ChunkingError, EmbedError, ExtractionError, IngestError, QueryError, StoreError,
};
pub use extractor::{extract_text, DocxExtractor, Extractor, PdfExtractor, PlainTextExtractor};
pub use ingest::{discover_documents, IngestionReport, IngestionService, SkippedDocument};
pub use models::{
    record_id, DocumentFormat, IngestionOptions, IngestionReceipt, QueryOptions, RecordMetadata,
    StoredRecord, UploadedFile, DEFAULT_CHUNK_SIZE, DEFAULT_TOP_K,
};
pub use query::QueryService;
#[cfg(feature = "minilm")]
pub use sentence::{SentenceEmbedder, MINILM_MODEL_ID};
pub use stores::{MemoryStore, QdrantStore};
pub use traits::VectorStore;
