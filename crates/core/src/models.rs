use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Text,
}

impl DocumentFormat {
    /// Unknown or missing extensions fall back to plain text.
    pub fn from_filename(filename: &str) -> Self {
        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();

        if extension.eq_ignore_ascii_case("pdf") {
            Self::Pdf
        } else if extension.eq_ignore_ascii_case("docx") {
            Self::Docx
        } else {
            Self::Text
        }
    }
}

/// A file as received from a client, before it touches disk.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }

    pub fn format(&self) -> DocumentFormat {
        DocumentFormat::from_filename(&self.filename)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordMetadata {
    pub doc_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub text: String,
    pub metadata: RecordMetadata,
}

impl StoredRecord {
    pub fn new(doc_id: &str, chunk_index: usize, text: String, embedding: Vec<f32>) -> Self {
        Self {
            id: record_id(doc_id, chunk_index),
            embedding,
            text,
            metadata: RecordMetadata {
                doc_id: doc_id.to_string(),
            },
        }
    }
}

pub fn record_id(doc_id: &str, chunk_index: usize) -> String {
    format!("{doc_id}_{chunk_index}")
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionReceipt {
    pub doc_id: String,
    pub filename: String,
    pub format: DocumentFormat,
    pub chunk_count: usize,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct IngestionOptions {
    pub chunk_size: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueryOptions {
    pub top_k: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_follows_extension_case_insensitively() {
        assert_eq!(DocumentFormat::from_filename("report.PDF"), DocumentFormat::Pdf);
        assert_eq!(DocumentFormat::from_filename("notes.docx"), DocumentFormat::Docx);
        assert_eq!(DocumentFormat::from_filename("notes.txt"), DocumentFormat::Text);
        assert_eq!(DocumentFormat::from_filename("table.csv"), DocumentFormat::Text);
        assert_eq!(DocumentFormat::from_filename("README"), DocumentFormat::Text);
    }

    #[test]
    fn record_ids_combine_document_and_chunk_index() {
        let record = StoredRecord::new("doc-1", 2, "text".to_string(), vec![0.0]);
        assert_eq!(record.id, "doc-1_2");
        assert_eq!(record.metadata.doc_id, "doc-1");
    }
}
