//! Run configuration

use crate::cluster::ClusterConfig;
use crate::error::{PipelineError, Result};
use crate::pipeline::{OpsConfig, OutputOptions, ShuffleMode};
use crate::schema::{DayLayout, Schema};
use crate::trainer::TrainerSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Everything a preprocessing and training run needs.
///
/// Missing fields in a configuration file take their defaults, which
/// describe the standard 24-day Criteo setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub schema: Schema,
    pub layout: DayLayout,
    /// Parent of the `train/` and `valid/` output directories
    pub output_dir: PathBuf,
    /// Fitted statistics directory
    pub stats_dir: PathBuf,
    pub cluster: ClusterConfig,
    pub ops: OpsConfig,
    /// Target partition size in bytes (None = derived from cluster memory)
    pub part_size: Option<usize>,
    pub output: OutputOptions,
    pub trainer: TrainerSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            schema: Schema::criteo(),
            layout: DayLayout::default(),
            output_dir: PathBuf::from("criteo/output"),
            stats_dir: PathBuf::from("criteo/stats"),
            cluster: ClusterConfig::default(),
            ops: OpsConfig::default(),
            part_size: None,
            output: OutputOptions {
                shuffle: ShuffleMode::PerPartition,
                seed: 42,
            },
            trainer: TrainerSettings::default(),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::MissingInput(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| PipelineError::ConfigError(format!("{}: {e}", path.display())))
    }

    pub fn to_file(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn with_layout(mut self, layout: DayLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_stats_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.stats_dir = dir.into();
        self
    }

    pub fn with_cluster(mut self, cluster: ClusterConfig) -> Self {
        self.cluster = cluster;
        self
    }

    pub fn with_ops(mut self, ops: OpsConfig) -> Self {
        self.ops = ops;
        self
    }

    pub fn with_part_size(mut self, bytes: usize) -> Self {
        self.part_size = Some(bytes);
        self
    }

    pub fn with_shuffle(mut self, shuffle: ShuffleMode) -> Self {
        self.output.shuffle = shuffle;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.output.seed = seed;
        self
    }

    pub fn with_trainer(mut self, trainer: TrainerSettings) -> Self {
        self.trainer = trainer;
        self
    }

    pub fn train_output_dir(&self) -> PathBuf {
        self.output_dir.join("train")
    }

    pub fn valid_output_dir(&self) -> PathBuf {
        self.output_dir.join("valid")
    }

    /// Checks that do not touch the filesystem
    pub fn validate(&self) -> Result<()> {
        if self.layout.train_days.is_empty() {
            return Err(PipelineError::ConfigError("no training days configured".into()));
        }
        if self.part_size == Some(0) {
            return Err(PipelineError::ConfigError("part_size must be positive".into()));
        }
        if self.ops.num_buckets == Some(0) {
            return Err(PipelineError::ConfigError("num_buckets must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.layout.train_days.len(), 23);
        assert_eq!(config.layout.valid_days.len(), 1);
        assert_eq!(config.ops.freq_threshold, 15);
        assert_eq!(config.train_output_dir(), PathBuf::from("criteo/output/train"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(&path, r#"{ "output_dir": "/tmp/out", "ops": { "fill": { "Constant": 0.0 }, "clip_min": 0.0, "normalize": false, "freq_threshold": 3, "max_vocab_size": null, "num_buckets": null } }"#).unwrap();
        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.ops.freq_threshold, 3);
        assert_eq!(config.ops.num_buckets, None);
        assert_eq!(config.stats_dir, PathBuf::from("criteo/stats"));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        let config = PipelineConfig::new()
            .with_part_size(1 << 20)
            .with_shuffle(ShuffleMode::None)
            .with_seed(7);
        config.to_file(&path).unwrap();
        let loaded = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(loaded.part_size, Some(1 << 20));
        assert_eq!(loaded.output.shuffle, ShuffleMode::None);
        assert_eq!(loaded.output.seed, 7);
    }

    #[test]
    fn test_invalid_config() {
        let bad = PipelineConfig::new().with_part_size(0);
        assert!(matches!(bad.validate(), Err(PipelineError::ConfigError(_))));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(PipelineConfig::from_file(&path).is_err());
    }
}
