//! Column schema and on-disk day layout
//!
//! The Criteo click logs carry one label, 13 integer features and 26
//! hashed categorical features per row. Every downstream stage refers to
//! columns by the names declared here.

mod layout;

pub use layout::{DayLayout, DayRange};

use polars::prelude::DataType;
use serde::{Deserialize, Serialize};

/// Number of continuous (integer) Criteo features
pub const NUM_CONTINUOUS: usize = 13;
/// Number of categorical Criteo features
pub const NUM_CATEGORICAL: usize = 26;

/// Logical column types used for read-time and write-time coercion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnDtype {
    Float32,
    Float64,
    Int32,
    Int64,
    String,
}

impl ColumnDtype {
    pub fn to_polars(self) -> DataType {
        match self {
            ColumnDtype::Float32 => DataType::Float32,
            ColumnDtype::Float64 => DataType::Float64,
            ColumnDtype::Int32 => DataType::Int32,
            ColumnDtype::Int64 => DataType::Int64,
            ColumnDtype::String => DataType::String,
        }
    }
}

/// Ordered partition of column names into label, continuous and
/// categorical groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    label: Vec<String>,
    continuous: Vec<String>,
    categorical: Vec<String>,
}

impl Schema {
    /// Declare a schema. Column names must be unique across all groups.
    pub fn new(
        label: Vec<String>,
        continuous: Vec<String>,
        categorical: Vec<String>,
    ) -> crate::Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for name in label.iter().chain(&continuous).chain(&categorical) {
            if !seen.insert(name.as_str()) {
                return Err(crate::PipelineError::ConfigError(format!(
                    "duplicate column name '{name}' in schema"
                )));
            }
        }
        Ok(Self { label, continuous, categorical })
    }

    /// The standard Criteo layout: `label`, `I1..I13`, `C1..C26`.
    pub fn criteo() -> Self {
        Self {
            label: vec!["label".to_string()],
            continuous: (1..=NUM_CONTINUOUS).map(|i| format!("I{i}")).collect(),
            categorical: (1..=NUM_CATEGORICAL).map(|i| format!("C{i}")).collect(),
        }
    }

    pub fn label(&self) -> &[String] {
        &self.label
    }

    pub fn continuous(&self) -> &[String] {
        &self.continuous
    }

    pub fn categorical(&self) -> &[String] {
        &self.categorical
    }

    /// All columns in file order (label, continuous, categorical)
    pub fn all_columns(&self) -> Vec<String> {
        self.label
            .iter()
            .chain(&self.continuous)
            .chain(&self.categorical)
            .cloned()
            .collect()
    }

    /// Types the readers coerce raw columns to
    pub fn input_types(&self) -> Vec<(String, ColumnDtype)> {
        self.typed(ColumnDtype::Int64, ColumnDtype::Float64, ColumnDtype::String)
    }

    /// Types written to the transformed output partitions
    pub fn output_types(&self) -> Vec<(String, ColumnDtype)> {
        self.typed(ColumnDtype::Float32, ColumnDtype::Float32, ColumnDtype::Int64)
    }

    fn typed(
        &self,
        label: ColumnDtype,
        continuous: ColumnDtype,
        categorical: ColumnDtype,
    ) -> Vec<(String, ColumnDtype)> {
        let mut types = Vec::with_capacity(self.label.len() + self.continuous.len() + self.categorical.len());
        types.extend(self.label.iter().map(|c| (c.clone(), label)));
        types.extend(self.continuous.iter().map(|c| (c.clone(), continuous)));
        types.extend(self.categorical.iter().map(|c| (c.clone(), categorical)));
        types
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::criteo()
    }
}
