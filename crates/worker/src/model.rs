//! Model resource lifecycle
//!
//! A worker process loads its tokenizer and causal language model once and
//! reuses the handle for every row of every partition it executes.
//! [`ModelResource::acquire`] is the only way to obtain the handle; the
//! first caller constructs it under a lock, concurrent first callers wait and
//! observe the same handle.

use crate::llama::CandleLoader;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use swefix_common::{GenerationConfig, Result, SwefixError, METRICS};
use tracing::{error, info, warn};

/// Tokenizer bound to a model location
pub trait TextTokenizer: Send + Sync {
    /// Encode text into a single sequence of token ids
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Decode token ids back into text
    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String>;

    /// End-of-sequence token id
    fn eos_token_id(&self) -> u32;

    /// Padding token id (defaults to the end-of-sequence token)
    fn pad_token_id(&self) -> u32 {
        self.eos_token_id()
    }
}

/// Per-call sampling parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    pub max_new_tokens: usize,
    pub temperature: f64,
    pub top_p: f64,
    pub num_return_sequences: usize,
    pub seed: u64,

    /// Generation stops after emitting this token
    pub eos_token_id: u32,

    /// Padding token, as configured on the tokenizer
    ///
    /// Prompts are generated one sequence at a time, so no padding is ever
    /// inserted. Batched backends use it to right-pad shorter prompts.
    pub pad_token_id: u32,
}

impl SamplingParams {
    pub fn from_config(config: &GenerationConfig, tokenizer: &dyn TextTokenizer) -> Self {
        Self {
            max_new_tokens: config.max_new_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            num_return_sequences: config.num_return_sequences,
            seed: config.seed,
            eos_token_id: tokenizer.eos_token_id(),
            pad_token_id: tokenizer.pad_token_id(),
        }
    }
}

/// Autoregressive language model in inference mode
pub trait CausalLm: Send + Sync {
    /// Generate continuations of `input_ids`
    ///
    /// Returns `num_return_sequences` sequences, each starting with the
    /// input tokens followed by the generated ones. No state is retained
    /// between calls.
    fn generate(&self, input_ids: &[u32], params: &SamplingParams) -> Result<Vec<Vec<u32>>>;
}

/// Loaded tokenizer + model pair
pub struct ModelHandle {
    /// Location the handle was loaded from
    pub location: String,

    pub tokenizer: Box<dyn TextTokenizer>,

    pub model: Box<dyn CausalLm>,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

/// Strategy constructing a [`ModelHandle`] from configuration
pub trait ModelLoader: Send + Sync {
    fn load(&self, config: &GenerationConfig) -> Result<ModelHandle>;
}

/// Lazily-initialized, memoized model handle
pub struct ModelResource {
    loader: Box<dyn ModelLoader>,

    /// Outcome of the one load attempt; the lock also serializes it
    slot: Mutex<Option<std::result::Result<Arc<ModelHandle>, String>>>,

    /// Number of successful constructions
    loads: AtomicUsize,
}

impl ModelResource {
    /// Create an empty resource; nothing is loaded until [`acquire`](Self::acquire)
    pub fn new(loader: Box<dyn ModelLoader>) -> Self {
        Self {
            loader,
            slot: Mutex::new(None),
            loads: AtomicUsize::new(0),
        }
    }

    /// Get the handle, constructing it on first use
    ///
    /// The loader runs at most once. A load failure is fatal for the worker:
    /// it is returned to the first caller and every later caller gets a
    /// [`SwefixError::Model`] carrying the same cause without reloading.
    pub fn acquire(&self, config: &GenerationConfig) -> Result<Arc<ModelHandle>> {
        let mut slot = self.slot.lock();

        match slot.as_ref() {
            Some(Ok(handle)) => {
                if handle.location != config.model_location {
                    warn!(
                        "Model already loaded from {}, ignoring requested location {}",
                        handle.location, config.model_location
                    );
                }
                return Ok(Arc::clone(handle));
            }
            Some(Err(cause)) => {
                return Err(SwefixError::model(format!("earlier load failed: {}", cause)));
            }
            None => {}
        }

        info!("Loading model from {}", config.model_location);
        let start = Instant::now();

        let handle = match self.loader.load(config) {
            Ok(handle) => Arc::new(handle),
            Err(e) => {
                error!("Failed to load model from {}: {}", config.model_location, e);
                let cause = match &e {
                    SwefixError::Model(msg) => msg.clone(),
                    other => other.to_string(),
                };
                *slot = Some(Err(cause));
                return Err(e);
            }
        };

        let elapsed = start.elapsed();
        METRICS.worker.model_loads_total.inc();
        METRICS.worker.model_load_duration.observe(elapsed.as_secs_f64());
        self.loads.fetch_add(1, Ordering::SeqCst);

        info!("Model loaded from {} in {:?}", handle.location, elapsed);

        *slot = Some(Ok(Arc::clone(&handle)));
        Ok(handle)
    }

    /// Whether the handle has been constructed
    pub fn is_loaded(&self) -> bool {
        matches!(*self.slot.lock(), Some(Ok(_)))
    }

    /// Number of successful constructions (0 or 1)
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

lazy_static! {
    /// Process-wide model resource backed by candle
    static ref WORKER_MODEL: ModelResource = ModelResource::new(Box::new(CandleLoader::default()));
}

/// The model resource of this worker process
pub fn worker_model() -> &'static ModelResource {
    &WORKER_MODEL
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_acquire_is_idempotent() {
        let loader = CountingLoader::new();
        let loads = Arc::clone(&loader.loads);
        let resource = ModelResource::new(Box::new(loader));
        let config = GenerationConfig::new("/models/fake");

        assert!(!resource.is_loaded());

        let first = resource.acquire(&config).unwrap();
        let second = resource.acquire(&config).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(resource.load_count(), 1);
        assert!(resource.is_loaded());
    }

    #[test]
    fn test_concurrent_first_acquire_loads_once() {
        let loader = CountingLoader::new();
        let loads = Arc::clone(&loader.loads);
        let resource = Arc::new(ModelResource::new(Box::new(loader)));
        let config = GenerationConfig::new("/models/fake");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let resource = Arc::clone(&resource);
                let config = config.clone();
                std::thread::spawn(move || resource.acquire(&config).unwrap())
            })
            .collect();

        let acquired: Vec<Arc<ModelHandle>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(acquired.iter().all(|h| Arc::ptr_eq(h, &acquired[0])));
    }

    #[test]
    fn test_failed_load_is_remembered() {
        let mut loader = CountingLoader::new();
        loader.fail = true;
        let loads = Arc::clone(&loader.loads);
        let resource = ModelResource::new(Box::new(loader));
        let config = GenerationConfig::new("/missing/model");

        let err = resource.acquire(&config).unwrap_err();

        assert!(err.to_string().contains("/missing/model"));
        assert_eq!(err.scope(), swefix_common::ErrorScope::Process);
        assert!(!resource.is_loaded());

        let again = resource.acquire(&config).unwrap_err();
        assert!(matches!(again, SwefixError::Model(_)));
        assert!(again.to_string().contains("no weights at /missing/model"));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(resource.load_count(), 0);
    }

    #[test]
    fn test_concurrent_callers_share_one_failed_load() {
        let mut loader = CountingLoader::new();
        loader.fail = true;
        let loads = Arc::clone(&loader.loads);
        let resource = Arc::new(ModelResource::new(Box::new(loader)));
        let config = GenerationConfig::new("/corrupt/model");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let resource = Arc::clone(&resource);
                let config = config.clone();
                std::thread::spawn(move || resource.acquire(&config).is_err())
            })
            .collect();

        assert!(handles.into_iter().all(|h| h.join().unwrap()));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sampling_params_use_eos_as_pad() {
        let config = GenerationConfig::default();
        let params = SamplingParams::from_config(&config, &ByteTokenizer);

        assert_eq!(params.pad_token_id, EOS);
        assert_eq!(params.eos_token_id, EOS);
        assert_eq!(params.max_new_tokens, 512);
    }

    struct PaddedTokenizer;

    impl TextTokenizer for PaddedTokenizer {
        fn encode(&self, text: &str) -> Result<Vec<u32>> {
            ByteTokenizer.encode(text)
        }

        fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String> {
            ByteTokenizer.decode(ids, skip_special_tokens)
        }

        fn eos_token_id(&self) -> u32 {
            EOS
        }

        fn pad_token_id(&self) -> u32 {
            7
        }
    }

    #[test]
    fn test_sampling_params_keep_tokenizer_pad() {
        let params = SamplingParams::from_config(&GenerationConfig::default(), &PaddedTokenizer);

        assert_eq!(params.pad_token_id, 7);
        assert_eq!(params.eos_token_id, EOS);
    }
}
