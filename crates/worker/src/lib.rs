//! SweFix Worker
//!
//! Partition-local batched inference: prompt formatting, the per-process
//! model resource, row-isolated generation and the partition executor.

pub mod executor;
pub mod generation;
pub mod llama;
pub mod model;
pub mod prompt;

pub use executor::PartitionExecutor;
pub use generation::GenerationEngine;
pub use llama::CandleLoader;
pub use model::{
    worker_model, CausalLm, ModelHandle, ModelLoader, ModelResource, SamplingParams, TextTokenizer,
};
pub use prompt::{format_prompt, normalize_completion, prompt_for};
