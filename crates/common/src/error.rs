//! Common error types for SweFix
//!
//! This module defines all error types used across the SweFix system.
//! Every error knows the granularity at which it must be handled (see
//! [`ErrorScope`]), so callers can decide whether to contain or escalate it.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for SweFix
#[derive(Error, Debug)]
pub enum SwefixError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Model or tokenizer loading errors
    #[error("Model error: {0}")]
    Model(String),

    /// Tokenization / decoding errors for a single prompt
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// Generation errors for a single prompt
    #[error("Generation error: {0}")]
    Generation(String),

    /// Input dataset could not be read or is malformed
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Input dataset lacks required columns
    #[error("Dataset is missing required columns: {missing:?}. Found columns: {found:?}")]
    MissingColumns {
        missing: Vec<String>,
        found: Vec<String>,
    },

    /// Result destination could not be written
    #[error("Failed to write results to {}: {cause}", destination.display())]
    Storage {
        destination: PathBuf,
        cause: String,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Granularity at which an error must be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Worker cannot process any row (model/tokenizer failed to load)
    Process,

    /// Whole job must abort before generation starts
    Job,

    /// Only the current row is affected; processing continues
    Row,

    /// Results were produced but could not be persisted
    Output,
}

impl SwefixError {
    /// Granularity this error escalates to
    pub fn scope(&self) -> ErrorScope {
        match self {
            SwefixError::Model(_) => ErrorScope::Process,
            SwefixError::Tokenizer(_) | SwefixError::Generation(_) => ErrorScope::Row,
            SwefixError::Storage { .. } => ErrorScope::Output,
            SwefixError::Config(_)
            | SwefixError::Dataset(_)
            | SwefixError::MissingColumns { .. }
            | SwefixError::Io(_)
            | SwefixError::Serialization(_)
            | SwefixError::InvalidInput(_)
            | SwefixError::Internal(_) => ErrorScope::Job,
        }
    }

    /// Process exit code for a job that failed with this error
    pub fn exit_code(&self) -> i32 {
        match self.scope() {
            ErrorScope::Output => 2,
            _ => 1,
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        SwefixError::Config(msg.into())
    }

    /// Create a model error
    pub fn model(msg: impl Into<String>) -> Self {
        SwefixError::Model(msg.into())
    }

    /// Create a tokenizer error
    pub fn tokenizer(msg: impl Into<String>) -> Self {
        SwefixError::Tokenizer(msg.into())
    }

    /// Create a generation error
    pub fn generation(msg: impl Into<String>) -> Self {
        SwefixError::Generation(msg.into())
    }

    /// Create a dataset error
    pub fn dataset(msg: impl Into<String>) -> Self {
        SwefixError::Dataset(msg.into())
    }

    /// Create a storage error for a destination
    pub fn storage(destination: impl Into<PathBuf>, cause: impl ToString) -> Self {
        SwefixError::Storage {
            destination: destination.into(),
            cause: cause.to_string(),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        SwefixError::InvalidInput(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        SwefixError::Internal(msg.into())
    }
}

/// Result type alias for SweFix operations
pub type Result<T> = std::result::Result<T, SwefixError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_scopes() {
        assert_eq!(SwefixError::model("bad weights").scope(), ErrorScope::Process);
        assert_eq!(SwefixError::generation("oom").scope(), ErrorScope::Row);
        assert_eq!(SwefixError::tokenizer("bad utf8").scope(), ErrorScope::Row);
        assert_eq!(SwefixError::storage("/out", "disk full").scope(), ErrorScope::Output);
        assert_eq!(SwefixError::dataset("no files").scope(), ErrorScope::Job);
    }

    #[test]
    fn test_storage_error_mentions_destination_and_cause() {
        let err = SwefixError::storage("/bucket/results_test", "permission denied");
        let msg = err.to_string();

        assert!(msg.contains("/bucket/results_test"));
        assert!(msg.contains("permission denied"));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_missing_columns_message() {
        let err = SwefixError::MissingColumns {
            missing: vec!["problem_statement".to_string()],
            found: vec!["instance_id".to_string(), "repo".to_string()],
        };

        assert!(err.to_string().contains("problem_statement"));
        assert_eq!(err.exit_code(), 1);
    }
}
