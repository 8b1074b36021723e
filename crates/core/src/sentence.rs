//! Pretrained sentence-transformer embedder running on Candle.
//!
//! Loads `sentence-transformers/all-MiniLM-L6-v2` (BERT, 384 dimensions) from the Hugging Face
//! hub once, at construction. Embeddings are mean-pooled over the attention mask and
//! L2-normalized, matching the sentence-transformers pipeline for this model.

use crate::embeddings::Embedder;
use crate::error::EmbedError;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config};
use hf_hub::api::sync::Api;
use std::fmt::Display;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{debug, info};

pub const MINILM_MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";

const EMBEDDING_DIM: usize = 384;

/// Longest input the model was trained on; longer chunks are truncated.
const MAX_TOKENS: usize = 256;

const BATCH_SIZE: usize = 32;

pub struct SentenceEmbedder {
    device: Device,
    model: BertModel,
    tokenizer: Tokenizer,
}

impl SentenceEmbedder {
    /// Downloads (or reuses the hub cache for) tokenizer, config and weights, then loads the
    /// model onto CUDA when available, CPU otherwise.
    pub fn load() -> Result<Self, EmbedError> {
        let device = Device::cuda_if_available(0).unwrap_or(Device::Cpu);
        info!(model = MINILM_MODEL_ID, device = ?device, "loading sentence embedder");

        let api = Api::new().map_err(load_error("create hub client"))?;
        let repo = api.model(MINILM_MODEL_ID.to_string());
        let tokenizer_path = repo.get("tokenizer.json").map_err(load_error("tokenizer"))?;
        let config_path = repo.get("config.json").map_err(load_error("config"))?;
        let weights_path = repo.get("model.safetensors").map_err(load_error("weights"))?;

        let mut tokenizer =
            Tokenizer::from_file(&tokenizer_path).map_err(load_error("tokenizer"))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_TOKENS,
                ..Default::default()
            }))
            .map_err(load_error("tokenizer truncation"))?;
        let config_str = std::fs::read_to_string(&config_path).map_err(load_error("config"))?;
        let config: Config = serde_json::from_str(&config_str).map_err(load_error("config"))?;

        // SAFETY: the safetensors file comes from the hub cache and is only mapped for reading.
        #[allow(unsafe_code)]
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, &device)
                .map_err(load_error("weights"))?
        };
        let model = BertModel::load(vb, &config).map_err(load_error("bert model"))?;

        info!(model = MINILM_MODEL_ID, "sentence embedder ready");
        Ok(Self {
            device,
            model,
            tokenizer,
        })
    }

    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(inference_error)?;

        let max_len = encodings
            .iter()
            .map(|encoding| encoding.len())
            .max()
            .unwrap_or(0);

        let mut input_ids = Vec::with_capacity(texts.len() * max_len);
        let mut attention_mask = Vec::with_capacity(texts.len() * max_len);
        for encoding in &encodings {
            let len = encoding.len();
            input_ids.extend_from_slice(encoding.get_ids());
            input_ids.extend(std::iter::repeat(0u32).take(max_len - len));
            attention_mask.extend_from_slice(encoding.get_attention_mask());
            attention_mask.extend(std::iter::repeat(0u32).take(max_len - len));
        }

        let shape = (texts.len(), max_len);
        let input_ids = Tensor::from_vec(input_ids, shape, &self.device).map_err(inference_error)?;
        let attention_mask =
            Tensor::from_vec(attention_mask, shape, &self.device).map_err(inference_error)?;
        let token_type_ids = input_ids.zeros_like().map_err(inference_error)?;

        let hidden = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))
            .map_err(inference_error)?;

        let pooled = mean_pool(&hidden, &attention_mask).map_err(inference_error)?;
        let normalized = l2_normalize(&pooled).map_err(inference_error)?;
        normalized.to_vec2::<f32>().map_err(inference_error)
    }
}

impl Embedder for SentenceEmbedder {
    fn model_name(&self) -> &str {
        MINILM_MODEL_ID
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let [vector]: [Vec<f32>; 1] =
            self.encode_batch(&[text])?
                .try_into()
                .map_err(|vectors: Vec<Vec<f32>>| EmbedError::CountMismatch {
                    expected: 1,
                    got: vectors.len(),
                })?;
        Ok(vector)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(BATCH_SIZE) {
            debug!(batch = batch.len(), "encoding batch");
            vectors.extend(self.encode_batch(batch)?);
        }

        if vectors.len() != texts.len() {
            return Err(EmbedError::CountMismatch {
                expected: texts.len(),
                got: vectors.len(),
            });
        }
        Ok(vectors)
    }
}

fn mean_pool(hidden: &Tensor, attention_mask: &Tensor) -> candle_core::Result<Tensor> {
    let mask = attention_mask
        .to_dtype(DType::F32)?
        .unsqueeze(2)?
        .broadcast_as(hidden.shape())?;
    let summed = hidden.mul(&mask)?.sum(1)?;
    let counts = mask.sum(1)?.clamp(1e-9, f64::MAX)?;
    summed.div(&counts)
}

fn l2_normalize(embeddings: &Tensor) -> candle_core::Result<Tensor> {
    let norm = embeddings
        .sqr()?
        .sum_keepdim(1)?
        .sqrt()?
        .clamp(1e-12, f64::MAX)?;
    embeddings.broadcast_div(&norm)
}

fn load_error<E: Display>(stage: &'static str) -> impl Fn(E) -> EmbedError {
    move |error| EmbedError::ModelLoad(format!("{stage}: {error}"))
}

fn inference_error<E: Display>(error: E) -> EmbedError {
    EmbedError::Inference(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore] // downloads the model from the hub
    fn minilm_embeddings_are_normalized_and_ordered() {
        let embedder = SentenceEmbedder::load().expect("model loads");
        let batch = embedder
            .embed_batch(&["pumps move fluid", "the weather is sunny"])
            .expect("batch embeds");

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].len(), EMBEDDING_DIM);
        let norm = batch[0].iter().map(|value| value * value).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
        let single = embedder.embed("pumps move fluid").expect("single embeds");
        let drift = single
            .iter()
            .zip(&batch[0])
            .map(|(left, right)| (left - right).abs())
            .fold(0f32, f32::max);
        assert!(drift < 1e-4);
    }

    #[test]
    #[ignore] // downloads the model from the hub
    fn long_chunks_are_truncated_with_a_closing_separator() {
        let embedder = SentenceEmbedder::load().expect("model loads");
        let long = vec!["hydraulic"; 600].join(" ");
        let sep = embedder.tokenizer.token_to_id("[SEP]").expect("sep token");

        let encoding = embedder
            .tokenizer
            .encode(long.as_str(), true)
            .expect("encodes");
        assert_eq!(encoding.len(), MAX_TOKENS);
        assert_eq!(encoding.get_ids().last(), Some(&sep));

        let vector = embedder.embed(&long).expect("embeds");
        assert_eq!(vector.len(), EMBEDDING_DIM);
    }
}
