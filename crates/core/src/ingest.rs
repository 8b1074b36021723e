use crate::chunking::{chunk_words, ChunkingConfig};
use crate::embeddings::Embedder;
use crate::error::EmbedError;
use crate::extractor::extract_text;
use crate::traits::VectorStore;
use crate::{IngestError, IngestionOptions, IngestionReceipt, StoredRecord, UploadedFile};
use chrono::Utc;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

const DISCOVERABLE_EXTENSIONS: [&str; 3] = ["pdf", "docx", "txt"];

/// Extract, chunk, embed and store one document per call.
pub struct IngestionService {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    options: IngestionOptions,
    temp_dir: PathBuf,
}

pub struct SkippedDocument {
    pub path: PathBuf,
    pub reason: String,
}

pub struct IngestionReport {
    pub ingested: Vec<IngestionReceipt>,
    pub skipped_files: Vec<SkippedDocument>,
}

impl IngestionService {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        options: IngestionOptions,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            embedder,
            store,
            options,
            temp_dir: temp_dir.into(),
        }
    }

    /// Every call gets a fresh doc id, so ingesting the same bytes twice yields two disjoint
    /// record sets. The staged copy of the upload is removed on every exit path.
    pub async fn ingest(&self, upload: UploadedFile) -> Result<IngestionReceipt, IngestError> {
        ChunkingConfig::from(self.options).validate()?;

        let doc_id = Uuid::new_v4().to_string();
        let filename = upload.filename.clone();
        let format = upload.format();

        let embedder = Arc::clone(&self.embedder);
        let temp_dir = self.temp_dir.clone();
        let options = self.options;
        let task_doc_id = doc_id.clone();
        let (chunks, embeddings) = tokio::task::spawn_blocking(move || {
            prepare_chunks(&temp_dir, &task_doc_id, upload, options, embedder.as_ref())
        })
        .await
        .map_err(|error| IngestError::Task(error.to_string()))??;

        let records = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(index, (text, embedding))| StoredRecord::new(&doc_id, index, text, embedding))
            .collect::<Vec<_>>();

        self.store.add(&records).await?;

        info!(
            doc_id = %doc_id,
            filename = %filename,
            format = ?format,
            chunks = records.len(),
            collection = self.store.name(),
            "document ingested"
        );

        Ok(IngestionReceipt {
            doc_id,
            filename,
            format,
            chunk_count: records.len(),
            ingested_at: Utc::now(),
        })
    }

    /// Ingests a local file through the same staging pipeline as uploads.
    pub async fn ingest_path(&self, path: &Path) -> Result<IngestionReceipt, IngestError> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;
        let bytes = tokio::fs::read(path).await.map_err(IngestError::Staging)?;

        self.ingest(UploadedFile::new(filename, bytes)).await
    }

    pub async fn ingest_folder_best_effort(
        &self,
        folder: &Path,
    ) -> Result<IngestionReport, IngestError> {
        let files = discover_documents(folder);

        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no pdf, docx or txt files found in {}",
                folder.display()
            )));
        }

        let mut ingested = Vec::new();
        let mut skipped_files = Vec::new();
        for path in files {
            match self.ingest_path(&path).await {
                Ok(receipt) => ingested.push(receipt),
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "skipping document");
                    skipped_files.push(SkippedDocument {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }

        Ok(IngestionReport {
            ingested,
            skipped_files,
        })
    }
}

pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_document = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                DISCOVERABLE_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            });

        if is_document {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

fn prepare_chunks(
    temp_dir: &Path,
    doc_id: &str,
    upload: UploadedFile,
    options: IngestionOptions,
    embedder: &dyn Embedder,
) -> Result<(Vec<String>, Vec<Vec<f32>>), IngestError> {
    let format = upload.format();
    let staged = stage_upload(temp_dir, doc_id, &upload)?;
    debug!(doc_id, path = %staged.path().display(), bytes = upload.bytes.len(), "upload staged");

    let text = extract_text(staged.path(), format)?;
    drop(staged);

    let chunks = chunk_words(&text, ChunkingConfig::from(options))?;
    let refs = chunks.iter().map(String::as_str).collect::<Vec<_>>();
    let embeddings = embedder.embed_batch(&refs)?;
    if embeddings.len() != chunks.len() {
        return Err(EmbedError::CountMismatch {
            expected: chunks.len(),
            got: embeddings.len(),
        }
        .into());
    }

    Ok((chunks, embeddings))
}

/// The returned file is deleted when dropped, including on early returns and unwinds.
fn stage_upload(
    temp_dir: &Path,
    doc_id: &str,
    upload: &UploadedFile,
) -> Result<NamedTempFile, IngestError> {
    std::fs::create_dir_all(temp_dir).map_err(IngestError::Staging)?;

    let safe_name = Path::new(&upload.filename)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("upload");
    let mut staged = tempfile::Builder::new()
        .prefix(&format!("{doc_id}_"))
        .suffix(&format!("_{safe_name}"))
        .tempfile_in(temp_dir)
        .map_err(IngestError::Staging)?;

    staged
        .write_all(&upload.bytes)
        .and_then(|_| staged.flush())
        .map_err(IngestError::Staging)?;
    Ok(staged)
}
