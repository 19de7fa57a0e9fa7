//! SweFix Driver
//!
//! Job orchestration: dataset loading, partitioning, parallel execution of
//! the worker's partition executor and durable persistence of results.

pub mod cli;
pub mod dataset;
pub mod job;
pub mod partition;
pub mod sink;

pub use cli::Cli;
pub use dataset::{build_prompts, load_tasks, Dataset, REQUIRED_COLUMNS};
pub use job::{dump_metrics, run_job, JobSummary};
pub use partition::{partition_bounds, ParallelMap};
pub use sink::{read_results, JsonLinesSink, ResultSink, WriteMode, WriteSummary, SUCCESS_MARKER};
