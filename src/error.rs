//! Error types for the Criteo preprocessing pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Main error type for the pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("Cluster startup failed: {0}")]
    ClusterStartup(String),

    #[error("Input file not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Partition {index} of {} failed: {reason}", file.display())]
    PartitionFailed {
        index: usize,
        file: PathBuf,
        reason: String,
    },

    #[error("Workflow not fitted")]
    NotFitted,

    #[error("Statistics store error: {0}")]
    StatsError(String),

    #[error("Trainer exited with status {code:?}")]
    TrainerFailed { code: Option<i32> },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<polars::error::PolarsError> for PipelineError {
    fn from(err: polars::error::PolarsError) -> Self {
        PipelineError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::DataError("test error".to_string());
        assert_eq!(err.to_string(), "Data error: test error");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PipelineError = io_err.into();
        assert!(matches!(err, PipelineError::IoError(_)));
    }

    #[test]
    fn test_trainer_failure_display() {
        let err = PipelineError::TrainerFailed { code: Some(3) };
        assert_eq!(err.to_string(), "Trainer exited with status Some(3)");
    }
}
