//! Row types flowing through the pipeline
//!
//! `Task` rows come from the dataset, `PromptRow`s reach the generation
//! engine, `Completion`s come back aligned with them, and `ResultRecord`s
//! are persisted.

use serde::{Deserialize, Serialize};

/// Prefix of the error marker written in place of a failed completion
pub const ERROR_MARKER_PREFIX: &str = "Error: ";

/// One input record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task key
    pub instance_id: String,

    /// Issue description; absent when the source value is null or missing
    pub problem_statement: Option<String>,
}

impl Task {
    pub fn new(instance_id: impl Into<String>, problem_statement: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            problem_statement: Some(problem_statement.into()),
        }
    }
}

/// A task with its model-ready prompt
///
/// Only built for tasks with a non-blank problem statement, so every row
/// reaching generation carries a non-empty prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptRow {
    pub instance_id: String,
    pub prompt: String,
}

/// Generation outcome for one prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Cleaned model output
    Fix(String),

    /// Generation failed for this row; carries the failure description
    Failed(String),

    /// The input prompt was absent, the model was not invoked
    Skipped,
}

impl Completion {
    pub fn is_failed(&self) -> bool {
        matches!(self, Completion::Failed(_))
    }

    /// Column value as persisted in `generated_fix`
    pub fn into_column(self) -> Option<String> {
        match self {
            Completion::Fix(text) => Some(text),
            Completion::Failed(reason) => Some(format!("{}{}", ERROR_MARKER_PREFIX, reason)),
            Completion::Skipped => None,
        }
    }
}

/// The unit persisted by the result sink
///
/// Field order is the output schema: `instance_id`, `prompt`, `generated_fix`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub instance_id: String,
    pub prompt: String,
    pub generated_fix: Option<String>,
}

impl ResultRecord {
    pub fn new(row: PromptRow, completion: Completion) -> Self {
        Self {
            instance_id: row.instance_id,
            prompt: row.prompt,
            generated_fix: completion.into_column(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_columns() {
        assert_eq!(
            Completion::Fix("x = 1".to_string()).into_column(),
            Some("x = 1".to_string())
        );
        assert_eq!(
            Completion::Failed("shape mismatch".to_string()).into_column(),
            Some("Error: shape mismatch".to_string())
        );
        assert_eq!(Completion::Skipped.into_column(), None);
    }

    #[test]
    fn test_result_record_serializes_null_fix() {
        let record = ResultRecord::new(
            PromptRow {
                instance_id: "django__django-1".to_string(),
                prompt: "p".to_string(),
            },
            Completion::Skipped,
        );

        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"instance_id":"django__django-1","prompt":"p","generated_fix":null}"#
        );
    }
}
