use crate::error::ChunkingError;
use crate::models::IngestionOptions;

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
}

impl From<IngestionOptions> for ChunkingConfig {
    fn from(value: IngestionOptions) -> Self {
        Self {
            chunk_size: value.chunk_size,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), ChunkingError> {
        if self.chunk_size == 0 {
            return Err(ChunkingError::InvalidConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Splits `text` into consecutive, non-overlapping groups of `chunk_size` words.
///
/// Words are runs of non-whitespace; each chunk rejoins its words with single spaces.
/// Only the last chunk may hold fewer than `chunk_size` words.
pub fn chunk_words(text: &str, config: ChunkingConfig) -> Result<Vec<String>, ChunkingError> {
    config.validate()?;

    let words = text.split_whitespace().collect::<Vec<_>>();
    Ok(words
        .chunks(config.chunk_size)
        .map(|group| group.join(" "))
        .collect())
}
