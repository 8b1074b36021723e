use crate::{StoreError, StoredRecord};
use async_trait::async_trait;

/// A single named collection of embedded chunks.
///
/// Construction is the get-or-create step: a store value only exists once its collection does.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn name(&self) -> &str;

    /// Writes every record or none of them. Ids already present in the collection, or repeated
    /// within the batch, reject the batch with [`StoreError::DuplicateId`].
    async fn add(&self, records: &[StoredRecord]) -> Result<(), StoreError>;

    /// Up to `top_k` chunk texts, nearest first. An empty collection yields an empty list.
    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<String>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}
