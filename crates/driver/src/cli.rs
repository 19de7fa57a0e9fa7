//! Command line interface

use clap::Parser;
use std::path::PathBuf;
use swefix_common::{DatasetSplit, JobConfig, Result};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "swefix-driver",
    version,
    about = "Generate candidate bug fixes for a SWE-bench style dataset split"
)]
pub struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "SWEFIX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Root directory of the task dataset
    #[arg(long)]
    pub dataset_path: Option<PathBuf>,

    /// Dataset split to process (train, dev or test)
    #[arg(long)]
    pub dataset_split: Option<DatasetSplit>,

    /// Model location, replacing the configured one
    #[arg(long)]
    pub model_path_override: Option<String>,

    /// Root of the durable output store
    #[arg(long)]
    pub output_root: Option<PathBuf>,

    /// Prefix of the output directory name
    #[arg(long)]
    pub output_path_prefix: Option<String>,

    /// Worker threads (0 = CPU count)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Partitions (0 = one per worker)
    #[arg(long)]
    pub partitions: Option<usize>,

    /// Print the effective configuration and exit
    #[arg(long)]
    pub print_config: bool,
}

impl Cli {
    /// Apply command line overrides on top of file and env configuration
    pub fn apply(&self, config: &mut JobConfig) {
        if let Some(path) = &self.dataset_path {
            config.dataset.path = path.clone();
        }
        if let Some(split) = self.dataset_split {
            config.dataset.split = split;
        }
        if let Some(model) = &self.model_path_override {
            config.generation.model_location = model.clone();
        }
        if let Some(root) = &self.output_root {
            config.output.root = root.clone();
        }
        if let Some(prefix) = &self.output_path_prefix {
            config.output.prefix = prefix.clone();
        }
        if let Some(workers) = self.workers {
            config.execution.workers = workers;
        }
        if let Some(partitions) = self.partitions {
            config.execution.partitions = partitions;
        }
    }

    /// Load, override and validate the job configuration
    pub fn resolve_config(&self) -> Result<JobConfig> {
        let mut config = JobConfig::load(self.config.as_deref())?;
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }
}
