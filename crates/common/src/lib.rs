//! SweFix common library
//!
//! This crate contains shared code used across SweFix components.

pub mod config;
pub mod error;
pub mod metrics;
pub mod record;

// Re-export commonly used types
pub use config::{DatasetSplit, GenerationConfig, JobConfig};
pub use error::{ErrorScope, Result, SwefixError};
pub use metrics::{LatencyTimer, MetricsRegistry, METRICS};
pub use record::{Completion, PromptRow, ResultRecord, Task};
