//! Metrics collection for SweFix
//!
//! This module provides Prometheus metrics for observability.
//! Row-level metrics are updated once per prompt, never per token.

use crate::error::{Result, SwefixError};
use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};
use std::sync::Arc;

/// Metrics registry for SweFix
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub inference: InferenceMetrics,
    pub worker: WorkerMetrics,
    pub job: JobMetrics,
}

/// Per-row inference metrics
#[derive(Debug, Clone)]
pub struct InferenceMetrics {
    /// Rows handed to the generation engine
    pub rows_total: IntCounter,

    /// Rows that produced a cleaned completion
    pub rows_succeeded: IntCounter,

    /// Rows that produced an error marker
    pub rows_failed: IntCounter,

    /// Rows with an absent prompt
    pub rows_skipped: IntCounter,

    /// Per-row generation duration
    pub generation_duration: Histogram,

    /// Tokens generated total
    pub tokens_generated_total: IntCounter,
}

/// Worker-specific metrics
#[derive(Debug, Clone)]
pub struct WorkerMetrics {
    /// Model constructions (expected: one per process)
    pub model_loads_total: IntCounter,

    /// Model construction duration
    pub model_load_duration: Histogram,

    /// Partitions executed
    pub partitions_total: IntCounter,

    /// Partition execution duration
    pub partition_duration: Histogram,

    /// Partition size distribution
    pub partition_size: Histogram,
}

/// Job-level metrics
#[derive(Debug, Clone)]
pub struct JobMetrics {
    /// Tasks read from the dataset
    pub tasks_loaded_total: IntCounter,

    /// Tasks dropped for lack of a problem statement
    pub tasks_dropped_total: IntCounter,

    /// Records persisted by the result sink
    pub records_written_total: IntCounter,

    /// Failed result writes
    pub write_failures_total: IntCounter,
}

lazy_static! {
    /// Global metrics registry instance
    pub static ref METRICS: MetricsRegistry = MetricsRegistry::new();
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("valid counter definition");
    registry
        .register(Box::new(counter.clone()))
        .expect("counter registered once");
    counter
}

fn histogram(registry: &Registry, name: &str, help: &str, buckets: Vec<f64>) -> Histogram {
    let histogram = Histogram::with_opts(HistogramOpts::new(name, help).buckets(buckets))
        .expect("valid histogram definition");
    registry
        .register(Box::new(histogram.clone()))
        .expect("histogram registered once");
    histogram
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        let registry = Arc::new(Registry::new());

        let inference = InferenceMetrics {
            rows_total: counter(
                &registry,
                "inference_rows_total",
                "Total number of rows handed to the generation engine",
            ),
            rows_succeeded: counter(
                &registry,
                "inference_rows_succeeded_total",
                "Total number of rows with a cleaned completion",
            ),
            rows_failed: counter(
                &registry,
                "inference_rows_failed_total",
                "Total number of rows that produced an error marker",
            ),
            rows_skipped: counter(
                &registry,
                "inference_rows_skipped_total",
                "Total number of rows with an absent prompt",
            ),
            generation_duration: histogram(
                &registry,
                "inference_generation_duration_seconds",
                "Per-row generation duration in seconds",
                vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0],
            ),
            tokens_generated_total: counter(
                &registry,
                "inference_tokens_generated_total",
                "Total number of tokens generated",
            ),
        };

        let worker = WorkerMetrics {
            model_loads_total: counter(
                &registry,
                "worker_model_loads_total",
                "Total number of model constructions",
            ),
            model_load_duration: histogram(
                &registry,
                "worker_model_load_duration_seconds",
                "Model construction duration in seconds",
                vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0],
            ),
            partitions_total: counter(
                &registry,
                "worker_partitions_total",
                "Total number of partitions executed",
            ),
            partition_duration: histogram(
                &registry,
                "worker_partition_duration_seconds",
                "Partition execution duration in seconds",
                vec![1.0, 10.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 7200.0],
            ),
            partition_size: histogram(
                &registry,
                "worker_partition_size",
                "Partition size distribution",
                vec![1.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0],
            ),
        };

        let job = JobMetrics {
            tasks_loaded_total: counter(
                &registry,
                "job_tasks_loaded_total",
                "Total number of tasks read from the dataset",
            ),
            tasks_dropped_total: counter(
                &registry,
                "job_tasks_dropped_total",
                "Total number of tasks dropped before generation",
            ),
            records_written_total: counter(
                &registry,
                "job_records_written_total",
                "Total number of records persisted",
            ),
            write_failures_total: counter(
                &registry,
                "job_write_failures_total",
                "Total number of failed result writes",
            ),
        };

        MetricsRegistry {
            registry,
            inference,
            worker,
            job,
        }
    }

    /// Gather all metrics as text
    pub fn gather(&self) -> Result<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| SwefixError::internal(format!("Failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer)
            .map_err(|e| SwefixError::internal(format!("Metrics are not UTF-8: {}", e)))
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper trait for measuring latency
pub trait LatencyTimer {
    /// Run a closure and record its duration
    fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R;
}

impl LatencyTimer for Histogram {
    fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = std::time::Instant::now();
        let result = f();
        self.observe(start.elapsed().as_secs_f64());
        result
    }
}
