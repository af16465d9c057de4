//! Day-partitioned input layout (`day_<n>.<ext>`)

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Half-open range of day numbers `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayRange {
    pub start: u32,
    pub end: u32,
}

impl DayRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn days(&self) -> impl Iterator<Item = u32> {
        self.start..self.end
    }

    fn overlaps(&self, other: &DayRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Where the day files live and how they split into train and validation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DayLayout {
    pub input_dir: PathBuf,
    /// File extension without the dot (`parquet`, `tsv`, ...)
    pub extension: String,
    pub train_days: DayRange,
    pub valid_days: DayRange,
}

impl Default for DayLayout {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("criteo/parquet"),
            extension: "parquet".to_string(),
            train_days: DayRange::new(0, 23),
            valid_days: DayRange::new(23, 24),
        }
    }
}

impl DayLayout {
    pub fn new(input_dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            input_dir: input_dir.into(),
            extension: extension.into(),
            ..Default::default()
        }
    }

    pub fn with_split(mut self, train_days: DayRange, valid_days: DayRange) -> Self {
        self.train_days = train_days;
        self.valid_days = valid_days;
        self
    }

    /// File name for a day, e.g. `day_3.parquet`
    pub fn day_file_name(&self, day: u32) -> String {
        if self.extension.is_empty() {
            format!("day_{day}")
        } else {
            format!("day_{day}.{}", self.extension)
        }
    }

    pub fn day_path(&self, day: u32) -> PathBuf {
        self.input_dir.join(self.day_file_name(day))
    }

    pub fn train_files(&self) -> Vec<PathBuf> {
        self.train_days.days().map(|d| self.day_path(d)).collect()
    }

    pub fn valid_files(&self) -> Vec<PathBuf> {
        self.valid_days.days().map(|d| self.day_path(d)).collect()
    }

    /// Check the split is sane and every referenced file exists
    pub fn validate(&self) -> Result<()> {
        if self.train_days.is_empty() {
            return Err(PipelineError::ConfigError("training day range is empty".into()));
        }
        if self.train_days.overlaps(&self.valid_days) {
            return Err(PipelineError::ConfigError(format!(
                "train days {:?} overlap validation days {:?}",
                self.train_days, self.valid_days
            )));
        }
        for path in self.train_files().iter().chain(self.valid_files().iter()) {
            ensure_exists(path)?;
        }
        Ok(())
    }
}

fn ensure_exists(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(PipelineError::MissingInput(path.to_path_buf()))
    }
}
