//! In-process collection with brute-force cosine ranking.
//!
//! Optionally backed by a JSON snapshot file: the snapshot is loaded when the store is opened and
//! rewritten (write to a sibling temp file, then rename) before every successful `add` commits.

use crate::traits::VectorStore;
use crate::{StoreError, StoredRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

pub struct MemoryStore {
    name: String,
    dimensions: usize,
    snapshot_path: Option<PathBuf>,
    collection: RwLock<Collection>,
}

#[derive(Default)]
struct Collection {
    records: Vec<StoredRecord>,
    ids: HashSet<String>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot<R> {
    name: String,
    dimensions: usize,
    records: R,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>, dimensions: usize) -> Self {
        Self {
            name: name.into(),
            dimensions,
            snapshot_path: None,
            collection: RwLock::new(Collection::default()),
        }
    }

    /// Opens the collection stored at `path`, or starts an empty one there if the file does
    /// not exist yet.
    pub async fn open(
        name: impl Into<String>,
        dimensions: usize,
        path: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let name = name.into();
        let path = path.into();

        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: Snapshot<Vec<StoredRecord>> = serde_json::from_slice(&bytes)
                    .map_err(|error| init_error(&name, format!("{}: {error}", path.display())))?;
                if snapshot.name != name || snapshot.dimensions != dimensions {
                    return Err(init_error(
                        &name,
                        format!(
                            "snapshot {} holds collection {} with {} dimensions, expected {name} with {dimensions}",
                            path.display(),
                            snapshot.name,
                            snapshot.dimensions
                        ),
                    ));
                }
                snapshot.records
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(error) => {
                return Err(init_error(&name, format!("{}: {error}", path.display())));
            }
        };

        let ids = records.iter().map(|record| record.id.clone()).collect();
        info!(collection = %name, records = records.len(), path = %path.display(), "opened collection snapshot");

        Ok(Self {
            name,
            dimensions,
            snapshot_path: Some(path),
            collection: RwLock::new(Collection { records, ids }),
        })
    }

    async fn write_snapshot(&self, path: &Path, records: &[&StoredRecord]) -> Result<(), StoreError> {
        let snapshot = Snapshot {
            name: self.name.clone(),
            dimensions: self.dimensions,
            records,
        };
        let bytes = serde_json::to_vec(&snapshot)?;

        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = path.with_extension("tmp");
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, path).await?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn add(&self, records: &[StoredRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut collection = self.collection.write().await;
        let mut incoming = HashSet::with_capacity(records.len());
        for record in records {
            if record.embedding.len() != self.dimensions {
                return Err(StoreError::Write(format!(
                    "record {} has {} dimensions, collection expects {}",
                    record.id,
                    record.embedding.len(),
                    self.dimensions
                )));
            }
            if collection.ids.contains(&record.id) || !incoming.insert(record.id.as_str()) {
                return Err(StoreError::DuplicateId(record.id.clone()));
            }
        }

        if let Some(path) = &self.snapshot_path {
            let all = collection.records.iter().chain(records).collect::<Vec<_>>();
            self.write_snapshot(path, &all)
                .await
                .map_err(|error| StoreError::Write(error.to_string()))?;
        }

        for record in records {
            collection.ids.insert(record.id.clone());
            collection.records.push(record.clone());
        }

        debug!(collection = %self.name, added = records.len(), total = collection.records.len(), "records added");
        Ok(())
    }

    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<String>, StoreError> {
        if embedding.len() != self.dimensions {
            return Err(StoreError::Query(format!(
                "query vector has {} dimensions, collection expects {}",
                embedding.len(),
                self.dimensions
            )));
        }

        let collection = self.collection.read().await;
        let mut scored = collection
            .records
            .iter()
            .map(|record| (cosine_similarity(embedding, &record.embedding), record))
            .collect::<Vec<_>>();

        // stable sort keeps insertion order among equal scores
        scored.sort_by(|left, right| right.0.total_cmp(&left.0));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(_, record)| record.text.clone())
            .collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.collection.read().await.records.len())
    }
}

fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    let norm_left = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let norm_right = right.iter().map(|value| value * value).sum::<f32>().sqrt();

    if norm_left == 0.0 || norm_right == 0.0 {
        return 0.0;
    }

    dot / (norm_left * norm_right)
}

fn init_error(collection: &str, details: String) -> StoreError {
    StoreError::Init {
        collection: collection.to_string(),
        details,
    }
}
