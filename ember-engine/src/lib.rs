//! Local GGUF inference engine for emberchat.
//!
//! Implements the `ember-core` engine traits on top of Candle: model
//! files come from the HuggingFace Hub cache (or local paths), weights
//! load as quantized Qwen3-family GGUF, and generation is a prefill +
//! decode loop driven by `LogitsProcessor`. Loading and generation are
//! blocking work and run on `spawn_blocking` threads.

use std::io::BufReader;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use async_trait::async_trait;
use candle_core::quantized::gguf_file;
use candle_core::{DType, Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::quantized_qwen3::ModelWeights;
use tokenizers::Tokenizer;

use ember_core::{Engine, EngineFactory, GenerateError, LoadError, ProgressSink};

pub mod fetch;
pub mod presets;

pub use presets::{default_candidates, ModelPreset, PRESETS};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Select the best available compute device for the current platform.
pub fn default_device() -> Result<Device> {
    #[cfg(feature = "metal")]
    {
        tracing::info!("using Metal backend");
        return Ok(Device::new_metal(0)?);
    }

    #[cfg(feature = "cuda")]
    {
        tracing::info!("using CUDA backend");
        return Ok(Device::new_cuda(0)?);
    }

    #[allow(unreachable_code)]
    {
        tracing::info!("using CPU backend");
        Ok(Device::Cpu)
    }
}

/// Select the compute device, honoring an explicit CPU override.
pub fn select_device(force_cpu: bool) -> Result<Device> {
    if force_cpu {
        tracing::info!("forcing CPU backend");
        return Ok(Device::Cpu);
    }
    default_device()
}

/// Generation settings applied to every engine a factory creates.
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    /// Sampling temperature. 0.0 = greedy.
    pub temperature: f64,
    /// Nucleus sampling threshold.
    pub top_p: f64,
    /// Maximum tokens per reply.
    pub max_tokens: usize,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 512,
        }
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Builds [`LocalEngine`]s for candidate ids.
pub struct LocalEngineFactory {
    device: Device,
    options: GenerationOptions,
}

impl LocalEngineFactory {
    pub fn new(device: Device, options: GenerationOptions) -> Self {
        Self { device, options }
    }
}

#[async_trait]
impl EngineFactory for LocalEngineFactory {
    async fn create(
        &self,
        model_id: &str,
        progress: ProgressSink,
    ) -> Result<Arc<dyn Engine>, LoadError> {
        let id = model_id.to_string();
        let device = self.device.clone();

        let core = tokio::task::spawn_blocking(move || load_sync(&id, &device, &progress))
            .await
            .map_err(|e| LoadError::new(format!("loader task failed: {e}")))?
            .map_err(|e| LoadError::new(format!("{e:#}")))?;

        Ok(Arc::new(LocalEngine {
            model_id: model_id.to_string(),
            options: self.options.clone(),
            core: Arc::new(Mutex::new(core)),
        }))
    }
}

/// Everything generation needs once a model is loaded.
struct ModelCore {
    weights: ModelWeights,
    tokenizer: Tokenizer,
    device: Device,
    eos_tokens: Vec<u32>,
    max_seq_len: usize,
}

fn load_sync(model_id: &str, device: &Device, progress: &ProgressSink) -> Result<ModelCore> {
    let files = fetch::resolve(model_id, progress)?;

    fetch::report(progress, 0.65, "parsing GGUF metadata");
    let mut file = BufReader::new(
        std::fs::File::open(&files.gguf)
            .with_context(|| format!("cannot open {}", files.gguf.display()))?,
    );
    let content = gguf_file::Content::read(&mut file).context("failed to parse GGUF file")?;

    let arch = content
        .metadata
        .get("general.architecture")
        .and_then(|v| v.to_string().ok())
        .cloned()
        .unwrap_or_else(|| "qwen3".to_string());
    let max_seq_len = content
        .metadata
        .get(&format!("{arch}.context_length"))
        .and_then(|v| v.to_u32().ok())
        .map(|v| v as usize)
        .unwrap_or(4096);

    fetch::report(progress, 0.7, "loading model weights");
    let weights = ModelWeights::from_gguf(content, &mut file, device)
        .map_err(|e| anyhow::anyhow!("failed to load model weights: {e}"))?;

    fetch::report(progress, 0.95, "loading tokenizer");
    let tokenizer = Tokenizer::from_file(&files.tokenizer)
        .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;
    let eos_tokens = eos_token_ids(&tokenizer);

    tracing::info!(model = model_id, max_seq_len, "model loaded");
    Ok(ModelCore {
        weights,
        tokenizer,
        device: device.clone(),
        eos_tokens,
        max_seq_len,
    })
}

/// Resolve end-of-sequence token ids from the vocabulary.
fn eos_token_ids(tokenizer: &Tokenizer) -> Vec<u32> {
    let vocab = tokenizer.get_vocab(true);
    ["<|im_end|>", "<|endoftext|>", "</s>"]
        .iter()
        .filter_map(|t| vocab.get(*t).copied())
        .collect()
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// An engine bound to one loaded model.
pub struct LocalEngine {
    model_id: String,
    options: GenerationOptions,
    core: Arc<Mutex<ModelCore>>,
}

#[async_trait]
impl Engine for LocalEngine {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        let core = Arc::clone(&self.core);
        let options = self.options.clone();
        let prompt = format_prompt(prompt);

        tokio::task::spawn_blocking(move || {
            let mut core = lock(&core);
            core.generate(&prompt, &options)
        })
        .await
        .map_err(|e| GenerateError::new(format!("generation task failed: {e}")))?
        .map_err(|e| GenerateError::new(format!("{e:#}")))
    }
}

/// Wrap the new user text in a single-turn ChatML prompt.
fn format_prompt(user_text: &str) -> String {
    format!(
        "<|im_start|>system\nYou are a helpful assistant. Keep replies concise.<|im_end|>\n\
         <|im_start|>user\n{user_text}<|im_end|>\n\
         <|im_start|>assistant\n"
    )
}

impl ModelCore {
    /// Prefill + decode loop. The KV cache is cleared per call because
    /// every request is single-turn.
    fn generate(&mut self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        self.weights.clear_kv_cache();

        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| anyhow::anyhow!("encode: {e}"))?;
        let prompt_ids: Vec<u32> = encoding.get_ids().to_vec();
        if prompt_ids.is_empty() {
            anyhow::bail!("prompt produced zero tokens");
        }

        let temperature = if options.temperature < 1e-7 {
            None
        } else {
            Some(options.temperature)
        };
        let mut sampler = LogitsProcessor::new(rand::random(), temperature, Some(options.top_p));

        // Prefill: the whole prompt in one forward pass.
        let input = Tensor::new(prompt_ids.as_slice(), &self.device)?.unsqueeze(0)?;
        let logits = self.weights.forward(&input, 0)?;
        let logits = logits.squeeze(0)?.to_dtype(DType::F32)?;
        let mut next = sampler.sample(&logits)?;

        let mut generated = Vec::new();
        if !self.is_eos(next) {
            generated.push(next);
        }

        // Decode loop, one token at a time, bounded by the context.
        let budget = options
            .max_tokens
            .min(self.max_seq_len.saturating_sub(prompt_ids.len()));
        for i in 1..budget {
            if self.is_eos(next) {
                break;
            }
            let pos = prompt_ids.len() + i - 1;
            let input = Tensor::new(&[next], &self.device)?.unsqueeze(0)?;
            let logits = self.weights.forward(&input, pos)?;
            let logits = logits.squeeze(0)?.to_dtype(DType::F32)?;
            next = sampler.sample(&logits)?;
            if self.is_eos(next) {
                break;
            }
            generated.push(next);
        }

        let text = self
            .tokenizer
            .decode(&generated, true)
            .map_err(|e| anyhow::anyhow!("decode: {e}"))?;
        Ok(text.trim().to_string())
    }

    fn is_eos(&self, token: u32) -> bool {
        self.eos_tokens.contains(&token)
    }
}

fn lock(core: &Mutex<ModelCore>) -> MutexGuard<'_, ModelCore> {
    core.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_options_default_is_sane() {
        let options = GenerationOptions::default();
        assert!(options.temperature > 0.0);
        assert!(options.top_p > 0.0 && options.top_p <= 1.0);
        assert!(options.max_tokens > 0);
    }

    #[test]
    fn prompt_is_single_turn_chatml() {
        let prompt = format_prompt("why is the sky blue?");
        assert!(prompt.contains("<|im_start|>user\nwhy is the sky blue?<|im_end|>"));
        assert!(prompt.ends_with("<|im_start|>assistant\n"));
        // Exactly one user turn: nothing from earlier transcript leaks in.
        assert_eq!(prompt.matches("<|im_start|>user").count(), 1);
    }
}
