//! Job driver
//!
//! Loads the configured split, drops tasks without a problem statement,
//! maps the partition executor over the remaining rows and persists the
//! results.

use crate::dataset::{build_prompts, load_tasks};
use crate::partition::ParallelMap;
use crate::sink::{ResultSink, WriteMode};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use swefix_common::{JobConfig, ResultRecord, Result, SwefixError, METRICS};
use swefix_worker::{ModelResource, PartitionExecutor};
use tracing::{error, info};

/// What a finished job did
#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    /// Tasks read from the dataset
    pub tasks_loaded: usize,

    /// Tasks dropped for lacking a problem statement
    pub tasks_dropped: usize,

    /// Rows sent through generation
    pub rows_processed: usize,

    /// Rows whose generation failed
    pub rows_failed: usize,

    /// Where results were written; `None` when there was nothing to write
    pub destination: Option<PathBuf>,

    pub elapsed: Duration,
}

/// Run one generation job end to end
pub fn run_job(config: &JobConfig, resource: &ModelResource, sink: &dyn ResultSink) -> Result<JobSummary> {
    config.validate()?;
    let start = Instant::now();

    info!(
        "Starting job: split={} dataset={} model={}",
        config.dataset.split,
        config.dataset.path.display(),
        config.generation.model_location
    );

    let dataset = load_tasks(&config.dataset)?;
    let tasks_loaded = dataset.tasks.len();
    METRICS.job.tasks_loaded_total.inc_by(tasks_loaded as u64);

    let (rows, tasks_dropped) = build_prompts(dataset.tasks);
    METRICS.job.tasks_dropped_total.inc_by(tasks_dropped as u64);
    info!(
        "{} tasks loaded, {} dropped without a problem statement",
        tasks_loaded, tasks_dropped
    );

    if rows.is_empty() {
        info!("No instances to process after filtering, skipping write");
        return Ok(JobSummary {
            tasks_loaded,
            tasks_dropped,
            rows_processed: 0,
            rows_failed: 0,
            destination: None,
            elapsed: start.elapsed(),
        });
    }

    let rows_processed = rows.len();
    let executor = PartitionExecutor::new(resource, Arc::new(config.generation.clone()));
    let map = ParallelMap::new(config.execution.resolved_workers())?;
    let partitions = config.execution.resolved_partitions(rows_processed);

    let generation_start = Instant::now();
    let output = map.run(&executor, rows, partitions)?;
    info!(
        "Generated {} completions in {:.2}s",
        output.len(),
        generation_start.elapsed().as_secs_f64()
    );

    let rows_failed = output.iter().filter(|(_, c)| c.is_failed()).count();
    let records: Vec<ResultRecord> = output
        .into_iter()
        .map(|(row, completion)| ResultRecord::new(row, completion))
        .collect();

    let destination = config.destination();
    match sink.write(&records, &destination, WriteMode::Overwrite) {
        Ok(written) => {
            METRICS.job.records_written_total.inc_by(written.records as u64);
        }
        Err(e) => {
            METRICS.job.write_failures_total.inc();
            error!(
                "Failed to save results to {}: {} ({} records not persisted)",
                destination.display(),
                e,
                records.len()
            );
            return Err(e);
        }
    }

    let elapsed = start.elapsed();
    info!(
        "Job finished in {:.2}s: {} rows ({} failed) saved to {}",
        elapsed.as_secs_f64(),
        rows_processed,
        rows_failed,
        destination.display()
    );

    Ok(JobSummary {
        tasks_loaded,
        tasks_dropped,
        rows_processed,
        rows_failed,
        destination: Some(destination),
        elapsed,
    })
}

/// Write the Prometheus text exposition of all metrics to `path`
pub fn dump_metrics(path: &Path) -> Result<()> {
    let text = METRICS.gather()?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, text)
        .map_err(|e| SwefixError::internal(format!("Failed to write metrics to {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{read_results, JsonLinesSink, WriteSummary};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use swefix_common::{DatasetSplit, GenerationConfig};
    use swefix_worker::{CausalLm, ModelHandle, ModelLoader, SamplingParams, TextTokenizer};

    struct WordTokenizer;

    impl TextTokenizer for WordTokenizer {
        fn encode(&self, text: &str) -> Result<Vec<u32>> {
            Ok(text.bytes().map(u32::from).collect())
        }

        fn decode(&self, ids: &[u32], _skip_special_tokens: bool) -> Result<String> {
            Ok(ids.iter().map(|id| *id as u8 as char).collect())
        }

        fn eos_token_id(&self) -> u32 {
            0
        }
    }

    struct ReturnModel;

    impl CausalLm for ReturnModel {
        fn generate(&self, input_ids: &[u32], _params: &SamplingParams) -> Result<Vec<Vec<u32>>> {
            let mut sequence = input_ids.to_vec();
            sequence.extend("```python\nreturn None\n```".bytes().map(u32::from));
            Ok(vec![sequence])
        }
    }

    struct FakeLoader {
        loads: Arc<AtomicUsize>,
    }

    impl ModelLoader for FakeLoader {
        fn load(&self, config: &GenerationConfig) -> Result<ModelHandle> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(ModelHandle {
                location: config.model_location.clone(),
                tokenizer: Box::new(WordTokenizer),
                model: Box::new(ReturnModel),
            })
        }
    }

    struct BrokenSink;

    impl ResultSink for BrokenSink {
        fn write(&self, _records: &[ResultRecord], destination: &Path, _mode: WriteMode) -> Result<WriteSummary> {
            Err(SwefixError::storage(destination, "bucket unavailable"))
        }
    }

    fn job_config(root: &Path) -> JobConfig {
        let mut config = JobConfig::default();
        config.dataset.path = root.join("dataset");
        config.dataset.split = DatasetSplit::Test;
        config.generation = GenerationConfig::new("/models/fake");
        config.output.root = root.join("out");
        config.output.prefix = "results".to_string();
        config.execution.workers = 2;
        config
    }

    fn write_dataset(root: &Path, lines: &[&str]) {
        let data = root.join("dataset").join("data");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("test-00000.jsonl"), lines.join("\n")).unwrap();
    }

    fn fake_resource() -> (ModelResource, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let resource = ModelResource::new(Box::new(FakeLoader {
            loads: Arc::clone(&loads),
        }));
        (resource, loads)
    }

    #[test]
    fn test_run_job_writes_cleaned_results() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(
            dir.path(),
            &[
                r#"{"instance_id": "a", "problem_statement": "crash on empty input"}"#,
                r#"{"instance_id": "b", "problem_statement": "  "}"#,
                r#"{"instance_id": "c", "problem_statement": "wrong sort order"}"#,
            ],
        );
        let config = job_config(dir.path());
        let (resource, loads) = fake_resource();

        let summary = run_job(&config, &resource, &JsonLinesSink::new(10)).unwrap();

        assert_eq!(summary.tasks_loaded, 3);
        assert_eq!(summary.tasks_dropped, 1);
        assert_eq!(summary.rows_processed, 2);
        assert_eq!(summary.rows_failed, 0);
        assert_eq!(summary.destination, Some(dir.path().join("out").join("results_test")));
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        let records = read_results(&config.destination()).unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.instance_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(records
            .iter()
            .all(|r| r.generated_fix.as_deref() == Some("return None")));
    }

    #[test]
    fn test_zero_rows_skips_write_and_model() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(
            dir.path(),
            &[r#"{"instance_id": "a", "problem_statement": null}"#],
        );
        let config = job_config(dir.path());
        let (resource, loads) = fake_resource();

        let summary = run_job(&config, &resource, &JsonLinesSink::new(10)).unwrap();

        assert_eq!(summary.rows_processed, 0);
        assert_eq!(summary.destination, None);
        assert!(!config.destination().exists());
        assert_eq!(loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_sink_failure_is_output_error() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(
            dir.path(),
            &[r#"{"instance_id": "a", "problem_statement": "bug"}"#],
        );
        let config = job_config(dir.path());
        let (resource, _) = fake_resource();
        let failures_before = METRICS.job.write_failures_total.get();

        let err = run_job(&config, &resource, &BrokenSink).unwrap_err();

        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("bucket unavailable"));
        assert!(METRICS.job.write_failures_total.get() > failures_before);
    }

    #[test]
    fn test_dump_metrics_writes_exposition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics").join("job.prom");
        METRICS.job.tasks_loaded_total.inc_by(0);

        dump_metrics(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("job_tasks_loaded_total"));
    }
}
