//! Embedder (C6, spec §4.6): a small fixed-dimension sentence encoder.
//!
//! Uses a BERT-family model (mean-pooled, L2-normalized final hidden state)
//! downloaded into the same `models/` tree as the LLM runtime, via the same
//! `hf-hub` client — matching the reference engine's own dependency on
//! Candle/`ndarray` for its AI surface.

use crate::error::{EngineError, EngineResult};
use candle_core::{DType, Device, Tensor};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use ndarray::Array1;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tokenizers::Tokenizer;

const EMBEDDING_DIM: usize = 384;
const DEFAULT_MODEL_ID: &str = "bge-small-en-v1.5";
const DEFAULT_REPO: &str = "BAAI/bge-small-en-v1.5";

struct LoadedEncoder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

/// Small fixed-dimension encoder. `encode`/`dim` are the only operations
/// spec §4.6 names; loading happens lazily from the model cache.
pub struct Embedder {
    cache_dir: PathBuf,
    model_id: String,
    encoder: RwLock<Option<LoadedEncoder>>,
}

impl Embedder {
    pub fn new(models_dir: PathBuf) -> Self {
        Self {
            cache_dir: models_dir,
            model_id: DEFAULT_MODEL_ID.to_string(),
            encoder: RwLock::new(None),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn dim(&self) -> usize {
        EMBEDDING_DIM
    }

    fn weights_path(&self) -> PathBuf {
        self.cache_dir.join(DEFAULT_REPO).join("model.safetensors")
    }

    fn tokenizer_path(&self) -> PathBuf {
        self.cache_dir.join(DEFAULT_REPO).join("tokenizer.json")
    }

    fn config_path(&self) -> PathBuf {
        self.cache_dir.join(DEFAULT_REPO).join("config.json")
    }

    pub fn is_ready(&self) -> bool {
        self.weights_path().exists() && self.tokenizer_path().exists() && self.config_path().exists()
    }

    async fn ensure_loaded(&self) -> EngineResult<()> {
        if self.encoder.read().await.is_some() {
            return Ok(());
        }
        let mut guard = self.encoder.write().await;
        if guard.is_some() {
            return Ok(());
        }
        *guard = Some(self.load().await?);
        Ok(())
    }

    async fn load(&self) -> EngineResult<LoadedEncoder> {
        if !self.is_ready() {
            return Err(EngineError::model_unavailable(
                "embedder weights are not downloaded",
            ));
        }
        let device = Device::Cpu;
        let config_path = self.config_path();
        let weights_path = self.weights_path();
        let tokenizer_path = self.tokenizer_path();

        tokio::task::spawn_blocking(move || -> EngineResult<LoadedEncoder> {
            let config_bytes = std::fs::read(&config_path)?;
            let config: BertConfig = serde_json::from_slice(&config_bytes)?;

            let tokenizer = Tokenizer::from_file(&tokenizer_path)
                .map_err(|e| EngineError::other(format!("failed to load tokenizer: {e}")))?;

            let vb = unsafe {
                candle_nn_varbuilder_from_safetensors(&weights_path, DType::F32, &device)?
            };
            let model = BertModel::load(vb, &config)
                .map_err(|e| EngineError::other(format!("failed to load bert weights: {e}")))?;

            Ok(LoadedEncoder {
                model,
                tokenizer,
                device,
            })
        })
        .await
        .map_err(|e| EngineError::other(format!("embedder load task panicked: {e}")))?
    }

    /// Encode `subject \n from \n body(truncated)` composed text into a
    /// fixed-dimension dense vector (spec §4.6).
    pub async fn encode(&self, text: &str) -> EngineResult<Array1<f32>> {
        self.ensure_loaded().await?;
        let guard = self.encoder.read().await;
        let encoder = guard.as_ref().expect("ensure_loaded just populated this");

        let encoding = encoder
            .tokenizer
            .encode(text, true)
            .map_err(|e| EngineError::other(format!("tokenize error: {e}")))?;
        let ids = encoding.get_ids();
        let token_ids = Tensor::new(ids, &encoder.device)
            .map_err(|e| EngineError::other(e.to_string()))?
            .unsqueeze(0)
            .map_err(|e| EngineError::other(e.to_string()))?;
        let token_type_ids = token_ids
            .zeros_like()
            .map_err(|e| EngineError::other(e.to_string()))?;

        let hidden = encoder
            .model
            .forward(&token_ids, &token_type_ids, None)
            .map_err(|e| EngineError::other(format!("bert forward error: {e}")))?;

        // Mean pool over the sequence dimension, then L2-normalize.
        let pooled = hidden
            .mean(1)
            .map_err(|e| EngineError::other(e.to_string()))?
            .squeeze(0)
            .map_err(|e| EngineError::other(e.to_string()))?;
        let values: Vec<f32> = pooled
            .to_vec1()
            .map_err(|e| EngineError::other(e.to_string()))?;

        Ok(l2_normalize(values))
    }
}

fn l2_normalize(values: Vec<f32>) -> Array1<f32> {
    let arr = Array1::from_vec(values);
    let norm = arr.dot(&arr).sqrt();
    if norm == 0.0 {
        arr
    } else {
        arr / norm
    }
}

/// Thin indirection around Candle's safetensors-backed `VarBuilder`
/// construction, kept as a free function so the unsafe mmap boundary (the
/// weights file must outlive the model) is documented in one place.
unsafe fn candle_nn_varbuilder_from_safetensors(
    path: &Path,
    dtype: DType,
    device: &Device,
) -> EngineResult<candle_nn::VarBuilder<'static>> {
    candle_nn::VarBuilder::from_mmaped_safetensors(&[path.to_path_buf()], dtype, device)
        .map_err(|e| EngineError::other(format!("failed to map safetensors: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dim_is_fixed() {
        let embedder = Embedder::new(PathBuf::from("/tmp/does-not-exist"));
        assert_eq!(embedder.dim(), 384);
    }

    #[test]
    fn not_ready_without_downloaded_weights() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Embedder::new(dir.path().to_path_buf());
        assert!(!embedder.is_ready());
    }

    #[test]
    fn l2_normalize_produces_unit_vector() {
        let v = l2_normalize(vec![3.0, 4.0]);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn l2_normalize_zero_vector_stays_zero() {
        let v = l2_normalize(vec![0.0, 0.0]);
        assert_eq!(v.to_vec(), vec![0.0, 0.0]);
    }
}
