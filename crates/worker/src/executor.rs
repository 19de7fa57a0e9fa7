//! Partition executor
//!
//! Invoked once per partition by the parallel-map substrate. Acquires the
//! worker's model (loading it on first use) and runs the generation engine
//! over the partition's prompt column.

use crate::generation::GenerationEngine;
use crate::model::ModelResource;
use std::sync::Arc;
use std::time::Instant;
use swefix_common::{Completion, GenerationConfig, LatencyTimer, Result, METRICS};
use tracing::debug;

/// Drives generation for one partition at a time
#[derive(Clone)]
pub struct PartitionExecutor<'a> {
    resource: &'a ModelResource,
    config: Arc<GenerationConfig>,
}

impl<'a> PartitionExecutor<'a> {
    pub fn new(resource: &'a ModelResource, config: Arc<GenerationConfig>) -> Self {
        Self { resource, config }
    }

    /// Produce the completion column for one partition
    ///
    /// Returns one completion per prompt, in order. Fails only if the model
    /// cannot be loaded; row failures are carried inside the column.
    pub fn execute(&self, partition: usize, prompts: &[Option<&str>]) -> Result<Vec<Completion>> {
        if prompts.is_empty() {
            debug!("Partition {} is empty, nothing to generate", partition);
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let handle = self.resource.acquire(&self.config)?;

        debug!("Partition {}: generating {} rows", partition, prompts.len());

        let engine = GenerationEngine::new(&handle, &self.config);
        let completions = METRICS
            .worker
            .partition_duration
            .time(|| engine.generate_many(prompts));

        METRICS.worker.partitions_total.inc();
        METRICS.worker.partition_size.observe(prompts.len() as f64);

        debug!(
            "Partition {}: {} rows done in {:?}",
            partition,
            completions.len(),
            start.elapsed()
        );

        Ok(completions)
    }
}
