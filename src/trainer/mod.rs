//! External DLRM trainer: configuration authoring and process launch

pub mod config;
mod launch;

pub use config::{Layer, Optimizer, OptimizerSettings, TrainerConfig, TrainerSettings};
pub use launch::TrainerLauncher;
