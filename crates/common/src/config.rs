//! Configuration structures for SweFix
//!
//! This module defines the job configuration consumed by the driver and the
//! read-only generation configuration distributed to every worker.
//! Configurations are loaded from YAML files and can be overridden by
//! environment variables of the form `SWEFIX__<SECTION>__<KEY>`.

use crate::error::{Result, SwefixError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment prefix for configuration overrides
pub const ENV_PREFIX: &str = "SWEFIX";

/// Default model location on worker nodes
pub const DEFAULT_MODEL_LOCATION: &str = "/opt/models/swe-llama-7b";

/// Top-level configuration for a SweFix job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Input dataset configuration
    pub dataset: DatasetConfig,

    /// Model and sampling configuration
    pub generation: GenerationConfig,

    /// Result destination configuration
    pub output: OutputConfig,

    /// Parallel execution configuration
    pub execution: ExecutionConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

/// Input dataset configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Dataset repository root directory
    pub path: PathBuf,

    /// Which split to process
    pub split: DatasetSplit,

    /// File pattern relative to `path`; `{split}` is substituted
    pub file_pattern: String,
}

/// Dataset split label
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DatasetSplit {
    Train,
    Dev,
    Test,
}

impl Default for DatasetSplit {
    fn default() -> Self {
        DatasetSplit::Test
    }
}

impl DatasetSplit {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetSplit::Train => "train",
            DatasetSplit::Dev => "dev",
            DatasetSplit::Test => "test",
        }
    }
}

impl fmt::Display for DatasetSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetSplit {
    type Err = SwefixError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "train" => Ok(DatasetSplit::Train),
            "dev" => Ok(DatasetSplit::Dev),
            "test" => Ok(DatasetSplit::Test),
            other => Err(SwefixError::config(format!(
                "Invalid dataset split '{}': expected one of train, dev, test",
                other
            ))),
        }
    }
}

/// Generation configuration
///
/// Constructed once by the driver before any inference and shared read-only
/// by every partition. Never mutated after validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Model directory (tokenizer, config and safetensors weights)
    pub model_location: String,

    /// Maximum number of tokens generated per prompt
    pub max_new_tokens: usize,

    /// Sampling temperature, 0 means greedy decoding
    pub temperature: f64,

    /// Nucleus sampling threshold
    pub top_p: f64,

    /// Sequences generated per prompt; only the first one is used
    pub num_return_sequences: usize,

    /// Sampling seed
    pub seed: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model_location: DEFAULT_MODEL_LOCATION.to_string(),
            max_new_tokens: default_max_new_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            num_return_sequences: 1,
            seed: default_seed(),
        }
    }
}

impl GenerationConfig {
    /// Create a generation config for a model location with default sampling
    pub fn new(model_location: impl Into<String>) -> Self {
        Self {
            model_location: model_location.into(),
            ..Default::default()
        }
    }

    /// Validate hyperparameter ranges
    pub fn validate(&self) -> Result<()> {
        if self.model_location.trim().is_empty() {
            return Err(SwefixError::config("generation.model_location must not be empty"));
        }
        if self.max_new_tokens == 0 {
            return Err(SwefixError::config("generation.max_new_tokens must be greater than 0"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(SwefixError::config(format!(
                "generation.temperature must be within [0, 2], got {}",
                self.temperature
            )));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(SwefixError::config(format!(
                "generation.top_p must be within (0, 1], got {}",
                self.top_p
            )));
        }
        if self.num_return_sequences == 0 {
            return Err(SwefixError::config(
                "generation.num_return_sequences must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Result destination configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Root of the durable store (bucket mount or directory)
    pub root: PathBuf,

    /// Prefix of the destination directory name
    pub prefix: String,

    /// Maximum records per part file
    pub rows_per_file: usize,
}

impl OutputConfig {
    /// Destination for a split: `{root}/{prefix}_{split}`
    pub fn destination(&self, split: DatasetSplit) -> PathBuf {
        self.root.join(format!("{}_{}", self.prefix, split))
    }
}

/// Parallel execution configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Number of worker threads (0 = CPU count)
    pub workers: usize,

    /// Number of partitions (0 = one per worker)
    pub partitions: usize,
}

impl ExecutionConfig {
    /// Effective worker count
    pub fn resolved_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Effective partition count for a given number of rows
    pub fn resolved_partitions(&self, rows: usize) -> usize {
        let wanted = if self.partitions > 0 {
            self.partitions
        } else {
            self.resolved_workers()
        };
        wanted.min(rows).max(1)
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// File receiving the Prometheus text dump at job end
    pub metrics_path: Option<PathBuf>,
}

/// Default value functions
fn default_max_new_tokens() -> usize {
    512
}

fn default_temperature() -> f64 {
    0.2
}

fn default_top_p() -> f64 {
    0.95
}

fn default_seed() -> u64 {
    42
}

fn default_file_pattern() -> String {
    "data/{split}*.jsonl".to_string()
}

fn default_output_prefix() -> String {
    "swe_llama_results".to_string()
}

fn default_rows_per_file() -> usize {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            split: DatasetSplit::default(),
            file_pattern: default_file_pattern(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            prefix: default_output_prefix(),
            rows_per_file: default_rows_per_file(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            metrics_path: None,
        }
    }
}

impl JobConfig {
    /// Load configuration from an optional YAML file layered under
    /// `SWEFIX__*` environment overrides
    ///
    /// The result is not validated; callers apply CLI overrides first.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(SwefixError::config(format!(
                    "Config file {} does not exist",
                    path.display()
                )));
            }
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Yaml),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let layered = builder
            .build()
            .map_err(|e| SwefixError::config(format!("Failed to load configuration: {}", e)))?;

        layered
            .try_deserialize()
            .map_err(|e| SwefixError::config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load and validate configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Self::load(Some(path.as_ref()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| SwefixError::config(format!("Failed to render configuration: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.dataset.path.as_os_str().is_empty() {
            return Err(SwefixError::config("dataset.path is required"));
        }
        if self.dataset.file_pattern.trim().is_empty() {
            return Err(SwefixError::config("dataset.file_pattern must not be empty"));
        }

        self.generation.validate()?;

        if self.output.root.as_os_str().is_empty() {
            return Err(SwefixError::config("output.root is required"));
        }
        if self.output.prefix.trim().is_empty() {
            return Err(SwefixError::config("output.prefix must not be empty"));
        }
        if self.output.rows_per_file == 0 {
            return Err(SwefixError::config("output.rows_per_file must be greater than 0"));
        }

        Ok(())
    }

    /// Output destination for the configured split
    pub fn destination(&self) -> PathBuf {
        self.output.destination(self.dataset.split)
    }
}
