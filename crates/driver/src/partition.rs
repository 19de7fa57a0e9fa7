//! Parallel map over partitions
//!
//! Splits prompt rows into contiguous partitions and runs the partition
//! executor on a dedicated rayon pool. Output order always matches input
//! order. A partition failure aborts the whole map.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::ops::Range;
use swefix_common::{Completion, PromptRow, Result, SwefixError};
use swefix_worker::PartitionExecutor;
use tracing::{debug, info};

/// Contiguous, balanced partition bounds
///
/// Sizes differ by at most one row. Returns no ranges for zero rows.
pub fn partition_bounds(rows: usize, partitions: usize) -> Vec<Range<usize>> {
    if rows == 0 {
        return Vec::new();
    }
    let partitions = partitions.clamp(1, rows);
    let base = rows / partitions;
    let extra = rows % partitions;

    let mut bounds = Vec::with_capacity(partitions);
    let mut start = 0;
    for index in 0..partitions {
        let len = base + usize::from(index < extra);
        bounds.push(start..start + len);
        start += len;
    }
    bounds
}

/// Fixed-size worker pool executing partitions
pub struct ParallelMap {
    pool: ThreadPool,
    workers: usize,
}

impl ParallelMap {
    pub fn new(workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("swefix-worker-{}", index))
            .build()
            .map_err(|e| SwefixError::internal(format!("Failed to build worker pool: {}", e)))?;

        debug!("Worker pool ready with {} threads", workers);
        Ok(Self { pool, workers })
    }

    /// Run the executor over `rows` split into `partitions` partitions
    ///
    /// Returns every row paired with its completion, in input order.
    pub fn run(
        &self,
        executor: &PartitionExecutor<'_>,
        rows: Vec<PromptRow>,
        partitions: usize,
    ) -> Result<Vec<(PromptRow, Completion)>> {
        let bounds = partition_bounds(rows.len(), partitions);
        info!(
            "Mapping {} rows over {} partitions on {} workers",
            rows.len(),
            bounds.len(),
            self.workers
        );

        let columns: Vec<Vec<Completion>> = self.pool.install(|| {
            bounds
                .par_iter()
                .enumerate()
                .map(|(partition, range)| {
                    let prompts: Vec<Option<&str>> = rows[range.clone()]
                        .iter()
                        .map(|row| Some(row.prompt.as_str()))
                        .collect();
                    let completions = executor.execute(partition, &prompts)?;
                    if completions.len() != prompts.len() {
                        return Err(SwefixError::internal(format!(
                            "Partition {} returned {} completions for {} rows",
                            partition,
                            completions.len(),
                            prompts.len()
                        )));
                    }
                    Ok(completions)
                })
                .collect::<Result<Vec<_>>>()
        })?;

        Ok(rows.into_iter().zip(columns.into_iter().flatten()).collect())
    }
}
