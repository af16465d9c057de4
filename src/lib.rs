//! criteo-pipeline - Criteo click-log preprocessing and DLRM trainer orchestration
//!
//! This crate prepares the Criteo dataset for an external DLRM trainer:
//! - Column schema and the per-day train/validation split
//! - A multi-worker execution context with per-worker memory pools
//! - Lazy, partitioned readers over Parquet or raw tab-separated day files
//! - A two-pass fit/apply feature pipeline writing Parquet partitions and manifests
//! - The embedding size report and the trainer's JSON configuration
//!
//! # Modules
//!
//! ## Data
//! - [`schema`] - Column families and day file layout
//! - [`dataset`] - Partitioned readers and raw-to-Parquet conversion
//!
//! ## Pipeline
//! - [`pipeline`] - Operators, workflows, fit and transform passes
//! - [`stats`] - Fitted statistics store
//! - [`report`] - Embedding size report
//!
//! ## Infrastructure
//! - [`cluster`] - Worker pool and memory pools
//! - [`config`] - Run configuration
//! - [`trainer`] - Trainer configuration document and launcher
//! - [`runner`] - Stage sequencing
//! - [`cli`] - Command-line interface

// Core error handling
pub mod error;

// Data
pub mod schema;
pub mod dataset;

// Pipeline
pub mod pipeline;
pub mod stats;
pub mod report;

// Infrastructure
pub mod cluster;
pub mod config;
pub mod trainer;
pub mod runner;

// Services
pub mod cli;

pub use error::{PipelineError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{PipelineError, Result};

    pub use crate::schema::{ColumnDtype, DayLayout, DayRange, Schema};
    pub use crate::dataset::{Dataset, FileFormat, Partition};

    pub use crate::cluster::{ClusterConfig, ExecutionContext};
    pub use crate::config::PipelineConfig;

    pub use crate::pipeline::{
        fit, transform, CategoricalOp, ContinuousOp, FillStrategy, FittedWorkflow, OpsConfig,
        OutputOptions, ShuffleMode, Workflow,
    };
    pub use crate::report::{embedding_sizes, EmbeddingSize};
    pub use crate::trainer::{TrainerConfig, TrainerLauncher, TrainerSettings};
}
