//! Feature pipeline: operators, workflows and their two-pass execution

pub mod executor;
pub mod ops;
pub mod stats;
pub mod vocab;
pub mod workflow;
pub mod writer;

pub use executor::{fit, transform, OutputOptions, ShuffleMode, TransformSummary};
pub use ops::{CategoricalOp, CategoricalState, ContinuousOp, ContinuousState, FillStrategy};
pub use stats::{FrequencyTable, Moments};
pub use vocab::{Vocabulary, RESERVED_INDEX};
pub use workflow::{FittedWorkflow, OpsConfig, Workflow};
pub use writer::{Manifest, OutputMetadata, MANIFEST_FILE, METADATA_FILE};
