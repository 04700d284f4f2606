//! LLM Runtime (C5, spec §4.5). Consumed as a single-threaded cooperative
//! generator: one model loaded at a time, guarded by an activation lock, the
//! actual forward pass delegated to Candle's quantized model kernels.
//!
//! Mirrors the shape of `ai::providers::local::LocalProvider` in the
//! reference engine, which wraps its model/tokenizer fields around the same
//! idea — this module fills in the wrapper with real Candle/tokenizers
//! calls instead of placeholder structs.

pub mod prompt;

use crate::error::{EngineError, EngineResult};
use crate::events::{Event, EventBus};
use candle_core::Device;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::quantized_llama::ModelWeights;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_stream::wrappers::ReceiverStream;

pub use prompt::ModelFamily;

/// Relative speed/quality tier, used only for the curated catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeedClass {
    Fast,
    Balanced,
    Quality,
}

/// Static description of a downloadable model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub repo: String,
    pub filename: String,
    pub size_bytes: u64,
    pub ram_req_mb: u64,
    pub speed_class: SpeedClass,
}

impl ModelDescriptor {
    pub fn family(&self) -> ModelFamily {
        ModelFamily::detect(&self.repo)
    }
}

/// Curated set of models the engine knows how to fetch and run.
fn catalog() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor {
            id: "tinyllama-1.1b-chat-q4".to_string(),
            repo: "TheBloke/TinyLlama-1.1B-Chat-v1.0-GGUF".to_string(),
            filename: "tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf".to_string(),
            size_bytes: 669_000_000,
            ram_req_mb: 1200,
            speed_class: SpeedClass::Fast,
        },
        ModelDescriptor {
            id: "mistral-7b-instruct-q4".to_string(),
            repo: "TheBloke/Mistral-7B-Instruct-v0.2-GGUF".to_string(),
            filename: "mistral-7b-instruct-v0.2.Q4_K_M.gguf".to_string(),
            size_bytes: 4_370_000_000,
            ram_req_mb: 6500,
            speed_class: SpeedClass::Balanced,
        },
        ModelDescriptor {
            id: "phi-3-mini-4k-q4".to_string(),
            repo: "microsoft/Phi-3-mini-4k-instruct-gguf".to_string(),
            filename: "Phi-3-mini-4k-instruct-q4.gguf".to_string(),
            size_bytes: 2_390_000_000,
            ram_req_mb: 4000,
            speed_class: SpeedClass::Quality,
        },
    ]
}

/// Generation parameters for a single `generate` call.
#[derive(Debug, Clone)]
pub struct GenerateParams {
    pub max_tokens: usize,
    pub temperature: f64,
    pub top_p: f64,
    pub stop_sequences: Vec<String>,
    /// Wall-clock ceiling (spec §5); exceeding it ends the stream cleanly.
    pub wall_clock_ceiling: std::time::Duration,
}

impl Default for GenerateParams {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            temperature: 0.7,
            top_p: 0.95,
            stop_sequences: vec![],
            wall_clock_ceiling: std::time::Duration::from_secs(60),
        }
    }
}

pub type TokenStream = Pin<Box<dyn Stream<Item = String> + Send>>;

struct LoadedModel {
    descriptor: ModelDescriptor,
    weights: ModelWeights,
    tokenizer: tokenizers::Tokenizer,
    device: Device,
}

/// The LLM runtime: download manager + single active-model slot + streaming
/// generator.
pub struct LlmRuntime {
    cache_dir: PathBuf,
    active: Arc<RwLock<Option<LoadedModel>>>,
    activation_lock: Arc<Mutex<()>>,
    generation_lock: Arc<Mutex<()>>,
    events: EventBus,
    http: reqwest::Client,
}

impl LlmRuntime {
    pub fn new(cache_dir: PathBuf, events: EventBus) -> Self {
        Self {
            cache_dir,
            active: Arc::new(RwLock::new(None)),
            activation_lock: Arc::new(Mutex::new(())),
            generation_lock: Arc::new(Mutex::new(())),
            events,
            http: reqwest::Client::new(),
        }
    }

    pub fn list_available(&self) -> Vec<ModelDescriptor> {
        catalog()
    }

    fn model_path(&self, descriptor: &ModelDescriptor) -> PathBuf {
        self.cache_dir.join(&descriptor.repo).join(&descriptor.filename)
    }

    /// Stream model bytes into the cache directory, emitting
    /// `model:progress`/`model:complete`/`model:error`.
    pub async fn download(&self, model_id: &str) -> EngineResult<()> {
        let descriptor = catalog()
            .into_iter()
            .find(|m| m.id == model_id)
            .ok_or_else(|| EngineError::not_found("model", model_id))?;

        let dest = self.model_path(&descriptor);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let url = format!(
            "https://huggingface.co/{}/resolve/main/{}",
            descriptor.repo, descriptor.filename
        );

        let result = self.download_to_file(&url, &dest, &descriptor).await;
        match &result {
            Ok(()) => self.events.publish(Event::ModelComplete {
                model_id: model_id.to_string(),
            }),
            Err(e) => self.events.publish(Event::ModelError {
                model_id: model_id.to_string(),
                message: e.to_string(),
            }),
        }
        result
    }

    async fn download_to_file(
        &self,
        url: &str,
        dest: &Path,
        descriptor: &ModelDescriptor,
    ) -> EngineResult<()> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        let total = response.content_length().unwrap_or(descriptor.size_bytes);

        let tmp_path = dest.with_extension("part");
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;
        let mut last_reported_pct: u8 = 0;

        use futures::StreamExt;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            let pct = ((downloaded as f64 / total.max(1) as f64) * 100.0).min(100.0) as u8;
            if pct != last_reported_pct {
                last_reported_pct = pct;
                self.events.publish(Event::ModelProgress {
                    model_id: descriptor.id.clone(),
                    percent: pct,
                });
            }
        }
        file.flush().await?;
        tokio::fs::rename(&tmp_path, dest).await?;
        Ok(())
    }

    pub async fn list_downloaded(&self) -> EngineResult<Vec<ModelDescriptor>> {
        let mut found = vec![];
        for descriptor in catalog() {
            if self.model_path(&descriptor).exists() {
                found.push(descriptor);
            }
        }
        Ok(found)
    }

    /// Fails if the model is currently active.
    pub async fn delete(&self, model_id: &str) -> EngineResult<()> {
        let active = self.active.read().await;
        if let Some(loaded) = active.as_ref() {
            if loaded.descriptor.id == model_id {
                return Err(EngineError::other(format!(
                    "cannot delete active model {model_id}"
                )));
            }
        }
        drop(active);

        let descriptor = catalog()
            .into_iter()
            .find(|m| m.id == model_id)
            .ok_or_else(|| EngineError::not_found("model", model_id))?;
        let path = self.model_path(&descriptor);
        if path.exists() {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    /// Unload the prior model (if any) and load the requested one.
    pub async fn activate(&self, model_id: &str) -> EngineResult<()> {
        let _guard = self.activation_lock.lock().await;

        let descriptor = catalog()
            .into_iter()
            .find(|m| m.id == model_id)
            .ok_or_else(|| EngineError::not_found("model", model_id))?;
        let path = self.model_path(&descriptor);
        if !path.exists() {
            return Err(EngineError::other(format!(
                "model {model_id} is not downloaded"
            )));
        }

        let device = Device::Cpu;
        let tokenizer_path = path.with_file_name("tokenizer.json");
        let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| EngineError::other(format!("failed to load tokenizer: {e}")))?;

        let mut file = std::fs::File::open(&path)?;
        let gguf = candle_core::quantized::gguf_file::Content::read(&mut file)
            .map_err(|e| EngineError::other(format!("failed to read gguf: {e}")))?;
        let weights = ModelWeights::from_gguf(gguf, &mut file, &device)
            .map_err(|e| EngineError::other(format!("failed to load model weights: {e}")))?;

        *self.active.write().await = Some(LoadedModel {
            descriptor,
            weights,
            tokenizer,
            device,
        });
        tracing::info!(model_id, "activated model");
        Ok(())
    }

    pub async fn is_active(&self) -> bool {
        self.active.read().await.is_some()
    }

    pub async fn active_model_id(&self) -> Option<String> {
        self.active
            .read()
            .await
            .as_ref()
            .map(|m| m.descriptor.id.clone())
    }

    pub async fn active_family(&self) -> Option<ModelFamily> {
        self.active.read().await.as_ref().map(|m| m.descriptor.family())
    }

    /// Stream tokens until a stop sequence or `max_tokens`. Only one
    /// `generate` may be in flight; additional callers receive `Busy`.
    /// Tokens are also published on `ai:token`.
    pub async fn generate(&self, prompt: String, params: GenerateParams) -> EngineResult<TokenStream> {
        // Acquired here and moved into the blocking task below so the
        // permit is held for the whole generation, not just this async fn's
        // (instantly-returning) body — otherwise a second caller could slip
        // in between this function returning and the spawned thread
        // re-acquiring the lock.
        let Ok(permit) = Arc::clone(&self.generation_lock).try_lock_owned() else {
            return Err(EngineError::busy("generation already in progress"));
        };

        if !self.is_active().await {
            return Err(EngineError::model_unavailable("no model activated"));
        }

        let (tx, rx) = mpsc::channel::<String>(64);
        let active = Arc::clone(&self.active);
        let events = self.events.clone();

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let result = generate_blocking(&active, &prompt, &params, &tx, &events);
            if let Err(e) = result {
                tracing::warn!(error = %e, "generation ended early");
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

fn generate_blocking(
    active: &Arc<RwLock<Option<LoadedModel>>>,
    prompt: &str,
    params: &GenerateParams,
    tx: &mpsc::Sender<String>,
    events: &EventBus,
) -> EngineResult<()> {
    let mut guard = active.blocking_write();
    let model = guard
        .as_mut()
        .ok_or_else(|| EngineError::model_unavailable("no model activated"))?;

    let encoding = model
        .tokenizer
        .encode(prompt, true)
        .map_err(|e| EngineError::other(format!("tokenize error: {e}")))?;
    let mut tokens: Vec<u32> = encoding.get_ids().to_vec();

    let mut logits_processor =
        LogitsProcessor::new(rand::random(), Some(params.temperature), Some(params.top_p));
    let started = std::time::Instant::now();
    let mut generated = String::new();

    for index in 0..params.max_tokens {
        if started.elapsed() > params.wall_clock_ceiling {
            break;
        }
        let context_size = if index == 0 { tokens.len() } else { 1 };
        let start = tokens.len().saturating_sub(context_size);
        let input = candle_core::Tensor::new(&tokens[start..], &model.device)
            .map_err(|e| EngineError::other(e.to_string()))?
            .unsqueeze(0)
            .map_err(|e| EngineError::other(e.to_string()))?;

        let logits = model
            .weights
            .forward(&input, start)
            .map_err(|e| EngineError::other(e.to_string()))?;
        let logits = logits
            .squeeze(0)
            .map_err(|e| EngineError::other(e.to_string()))?;

        let next_token = logits_processor
            .sample(&logits)
            .map_err(|e| EngineError::other(e.to_string()))?;
        tokens.push(next_token);

        let piece = model
            .tokenizer
            .decode(&[next_token], true)
            .map_err(|e| EngineError::other(format!("decode error: {e}")))?;
        generated.push_str(&piece);

        events.publish(Event::AiToken { token: piece.clone() });
        if tx.blocking_send(piece).is_err() {
            break; // receiver dropped; non-restartable stream ends here
        }

        if params
            .stop_sequences
            .iter()
            .any(|stop| generated.ends_with(stop.as_str()))
        {
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_non_empty_and_ids_unique() {
        let models = catalog();
        assert!(!models.is_empty());
        let mut ids: Vec<_> = models.iter().map(|m| m.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), models.len());
    }

    #[tokio::test]
    async fn generate_without_active_model_is_model_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = LlmRuntime::new(dir.path().to_path_buf(), EventBus::new());
        let err = runtime
            .generate("hi".to_string(), GenerateParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ModelUnavailable { .. }));
    }

    #[tokio::test]
    async fn generate_is_busy_while_another_generation_holds_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = LlmRuntime::new(dir.path().to_path_buf(), EventBus::new());
        // Simulates a generation already in flight: the permit is held for
        // the whole call, not just until the async fn returns.
        let _permit = Arc::clone(&runtime.generation_lock).try_lock_owned().unwrap();
        let err = runtime
            .generate("hi".to_string(), GenerateParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Busy { .. }));
    }

    #[tokio::test]
    async fn delete_nonexistent_model_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = LlmRuntime::new(dir.path().to_path_buf(), EventBus::new());
        let err = runtime.delete("does-not-exist").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_downloaded_is_empty_in_fresh_cache() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = LlmRuntime::new(dir.path().to_path_buf(), EventBus::new());
        assert!(runtime.list_downloaded().await.unwrap().is_empty());
    }
}
