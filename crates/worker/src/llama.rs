//! Candle-based causal language model
//!
//! Loads a Llama-architecture checkpoint (HuggingFace layout: `tokenizer.json`,
//! `config.json`, safetensors weights) onto the CPU in full F32 precision.

use crate::model::{CausalLm, ModelHandle, ModelLoader, SamplingParams, TextTokenizer};
use anyhow::{Context, Result as AnyResult};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::llama::{Cache, Config, Llama, LlamaConfig};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use swefix_common::{GenerationConfig, Result, SwefixError};
use tokenizers::{PaddingParams, Tokenizer};
use tracing::{debug, info};

/// Fallback end-of-sequence tokens, tried in order
const EOS_CANDIDATES: &[&str] = &["</s>", "<|endoftext|>", "<|eot_id|>"];

/// Loader for local candle checkpoints
#[derive(Debug, Clone, Default)]
pub struct CandleLoader;

impl ModelLoader for CandleLoader {
    fn load(&self, config: &GenerationConfig) -> Result<ModelHandle> {
        let dir = Path::new(&config.model_location);

        let tokenizer = HfTokenizer::from_dir(dir)
            .map_err(|e| SwefixError::model(format!("{:#}", e)))?;
        let model = LlamaModel::from_dir(dir)
            .map_err(|e| SwefixError::model(format!("{:#}", e)))?;

        Ok(ModelHandle {
            location: config.model_location.clone(),
            tokenizer: Box::new(tokenizer),
            model: Box::new(model),
        })
    }
}

/// HuggingFace tokenizer with a guaranteed padding token
pub struct HfTokenizer {
    tokenizer: Tokenizer,
    eos_token_id: u32,
    pad_token_id: u32,
}

impl HfTokenizer {
    /// Load `tokenizer.json` from a model directory
    pub fn from_dir(dir: &Path) -> AnyResult<Self> {
        let path = dir.join("tokenizer.json");
        let mut tokenizer = Tokenizer::from_file(&path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer {}: {}", path.display(), e))?;

        let (eos_token, eos_token_id) = resolve_eos_token(dir, &tokenizer)?;

        if tokenizer.get_padding().is_none() {
            debug!("Tokenizer has no padding token, defaulting to {}", eos_token);
            tokenizer.with_padding(Some(PaddingParams {
                pad_id: eos_token_id,
                pad_token: eos_token,
                ..Default::default()
            }));
        }

        let pad_token_id = tokenizer
            .get_padding()
            .map(|padding| padding.pad_id)
            .unwrap_or(eos_token_id);

        Ok(Self {
            tokenizer,
            eos_token_id,
            pad_token_id,
        })
    }
}

/// Find the end-of-sequence token and its id
fn resolve_eos_token(dir: &Path, tokenizer: &Tokenizer) -> AnyResult<(String, u32)> {
    let configured = std::fs::read_to_string(dir.join("tokenizer_config.json"))
        .ok()
        .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok())
        .and_then(|value| match &value["eos_token"] {
            serde_json::Value::String(token) => Some(token.clone()),
            serde_json::Value::Object(token) => token
                .get("content")
                .and_then(|content| content.as_str())
                .map(str::to_string),
            _ => None,
        });

    configured
        .into_iter()
        .chain(EOS_CANDIDATES.iter().map(|token| token.to_string()))
        .find_map(|token| tokenizer.token_to_id(&token).map(|id| (token, id)))
        .ok_or_else(|| anyhow::anyhow!("No end-of-sequence token found in {}", dir.display()))
}

impl TextTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| SwefixError::tokenizer(format!("Tokenization failed: {}", e)))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String> {
        self.tokenizer
            .decode(ids, skip_special_tokens)
            .map_err(|e| SwefixError::tokenizer(format!("Decoding failed: {}", e)))
    }

    fn eos_token_id(&self) -> u32 {
        self.eos_token_id
    }

    fn pad_token_id(&self) -> u32 {
        self.pad_token_id
    }
}

/// Llama model pinned to the CPU
///
/// Candle has no dropout or autograd tape on plain tensors, so the loaded
/// model is inference-only and each call runs with its own KV cache.
pub struct LlamaModel {
    model: Llama,
    config: Config,
    device: Device,
}

impl LlamaModel {
    /// Load `config.json` and the safetensors weights of a model directory
    pub fn from_dir(dir: &Path) -> AnyResult<Self> {
        let config_path = dir.join("config.json");
        let raw = std::fs::read(&config_path)
            .with_context(|| format!("Failed to read model config {}", config_path.display()))?;
        let llama_config: LlamaConfig =
            serde_json::from_slice(&raw).context("Failed to parse Llama config")?;
        let config = llama_config.into_config(false);

        let weights = safetensors_files(dir)?;
        info!(
            "Loading Llama: hidden={}, layers={}, vocab={}, {} weight file(s)",
            config.hidden_size,
            config.num_hidden_layers,
            config.vocab_size,
            weights.len()
        );

        let device = Device::Cpu;
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&weights, DType::F32, &device)
                .context("Failed to load model weights")?
        };
        let model = Llama::load(vb, &config).context("Failed to build Llama model")?;

        Ok(Self {
            model,
            config,
            device,
        })
    }

    /// Sample one continuation of `input_ids`
    ///
    /// Runs with a batch of one, so `params.pad_token_id` is never needed.
    fn sample_sequence(&self, input_ids: &[u32], params: &SamplingParams, seed: u64) -> AnyResult<Vec<u32>> {
        let temperature = (params.temperature > 0.0).then_some(params.temperature);
        let top_p = (params.top_p < 1.0).then_some(params.top_p);
        let mut logits_processor = LogitsProcessor::new(seed, temperature, top_p);
        let mut cache = Cache::new(true, DType::F32, &self.config, &self.device)?;

        let mut tokens = input_ids.to_vec();
        let mut index_pos = 0;

        for step in 0..params.max_new_tokens {
            // Full prompt on the first step, then only the newest token
            let context = if step == 0 {
                &tokens[..]
            } else {
                &tokens[tokens.len() - 1..]
            };
            let context_len = context.len();

            let input = Tensor::new(context, &self.device)?.unsqueeze(0)?;
            let logits = self.model.forward(&input, index_pos, &mut cache)?;
            let logits = logits.squeeze(0)?;
            index_pos += context_len;

            let next_token = logits_processor.sample(&logits)?;
            tokens.push(next_token);

            if next_token == params.eos_token_id {
                break;
            }
        }

        Ok(tokens)
    }
}

impl CausalLm for LlamaModel {
    fn generate(&self, input_ids: &[u32], params: &SamplingParams) -> Result<Vec<Vec<u32>>> {
        if input_ids.is_empty() {
            return Err(SwefixError::generation("Empty prompt after tokenization"));
        }

        (0..params.num_return_sequences)
            .map(|i| {
                self.sample_sequence(input_ids, params, params.seed.wrapping_add(i as u64))
                    .map_err(|e| SwefixError::generation(format!("{:#}", e)))
            })
            .collect()
    }
}

/// Weight files of a model directory
///
/// Sharded checkpoints are resolved through `model.safetensors.index.json`,
/// otherwise every `*.safetensors` file is used.
fn safetensors_files(dir: &Path) -> AnyResult<Vec<PathBuf>> {
    let index_path = dir.join("model.safetensors.index.json");
    if index_path.exists() {
        let raw = std::fs::read_to_string(&index_path)
            .with_context(|| format!("Failed to read {}", index_path.display()))?;
        let index: serde_json::Value =
            serde_json::from_str(&raw).context("Failed to parse safetensors index")?;
        let weight_map = index["weight_map"]
            .as_object()
            .context("Safetensors index has no weight_map")?;

        let shards: BTreeSet<&str> = weight_map.values().filter_map(|v| v.as_str()).collect();
        return Ok(shards.into_iter().map(|shard| dir.join(shard)).collect());
    }

    let pattern = dir.join("*.safetensors");
    let pattern = pattern
        .to_str()
        .context("Model location is not valid UTF-8")?;
    let mut files: Vec<PathBuf> = glob::glob(pattern)
        .context("Invalid weights pattern")?
        .filter_map(|entry| entry.ok())
        .collect();
    files.sort();

    if files.is_empty() {
        anyhow::bail!("No safetensors weights found in {}", dir.display());
    }
    Ok(files)
}
