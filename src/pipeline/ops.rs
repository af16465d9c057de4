//! Column operators
//!
//! Operators come in two families bound to the two feature groups.
//! Each operator can `collect` partial statistics over a training
//! partition, `finalize` merged statistics into a frozen state, and
//! `apply` that state to any partition. Stateless operators skip the
//! first two steps.

use super::stats::{FrequencyTable, Moments};
use super::vocab::Vocabulary;
use crate::cluster::{MemoryPool, PooledBuffer};
use crate::error::{PipelineError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How `FillMissing` picks its replacement value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FillStrategy {
    Constant(f64),
    /// Mean of the training values seen by the operator
    Mean,
}

/// Operators for continuous columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum ContinuousOp {
    FillMissing { strategy: FillStrategy },
    Clip { min: Option<f64>, max: Option<f64> },
    /// `log(1 + x)`
    LogOp,
    /// Z-score with training mean and standard deviation
    Normalize,
}

/// Frozen per-column state of a continuous operator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ContinuousState {
    Stateless,
    Fill(f64),
    Scale { mean: f64, std: f64 },
}

/// Numeric column values held in a pooled buffer with a validity mask
pub struct NumericColumn {
    values: PooledBuffer,
    valid: Vec<bool>,
}

impl NumericColumn {
    pub fn from_series(series: &Series, pool: &Arc<MemoryPool>) -> Result<Self> {
        let casted = series.cast(&DataType::Float64)?;
        let ca = casted.f64()?;
        let mut values = pool.get_buffer(ca.len());
        let mut valid = Vec::with_capacity(ca.len());
        for (slot, value) in values.iter_mut().zip(ca.into_iter()) {
            *slot = value.unwrap_or(0.0);
            valid.push(value.is_some());
        }
        Ok(Self { values, valid })
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<f64>> + '_ {
        self.values
            .iter()
            .zip(&self.valid)
            .map(|(v, ok)| ok.then_some(*v))
    }

    fn map_valid(&mut self, f: impl Fn(f64) -> f64) {
        for (v, ok) in self.values.iter_mut().zip(&self.valid) {
            if *ok {
                *v = f(*v);
            }
        }
    }

    /// Materialize as a nullable `Float32` series
    pub fn into_series(self, name: &str) -> Series {
        let values: Vec<Option<f32>> = self.iter().map(|v| v.map(|x| x as f32)).collect();
        Series::new(name.into(), values)
    }
}

impl ContinuousOp {
    pub fn name(&self) -> &'static str {
        match self {
            ContinuousOp::FillMissing { .. } => "FillMissing",
            ContinuousOp::Clip { .. } => "Clip",
            ContinuousOp::LogOp => "LogOp",
            ContinuousOp::Normalize => "Normalize",
        }
    }

    pub fn needs_fit(&self) -> bool {
        matches!(
            self,
            ContinuousOp::FillMissing { strategy: FillStrategy::Mean } | ContinuousOp::Normalize
        )
    }

    pub fn collect(&self, column: &NumericColumn, acc: &mut Moments) {
        for value in column.iter() {
            acc.update(value);
        }
    }

    pub fn finalize(&self, moments: &Moments) -> ContinuousState {
        match self {
            ContinuousOp::FillMissing { strategy: FillStrategy::Mean } => {
                ContinuousState::Fill(if moments.count > 0 { moments.mean } else { 0.0 })
            }
            ContinuousOp::Normalize => {
                let std = moments.std();
                ContinuousState::Scale {
                    mean: moments.mean,
                    std: if std > 0.0 { std } else { 1.0 },
                }
            }
            _ => ContinuousState::Stateless,
        }
    }

    pub fn apply(&self, state: &ContinuousState, column: &mut NumericColumn) -> Result<()> {
        match (self, state) {
            (ContinuousOp::FillMissing { strategy }, state) => {
                let fill = match (strategy, state) {
                    (FillStrategy::Constant(v), _) => *v,
                    (FillStrategy::Mean, ContinuousState::Fill(v)) => *v,
                    (FillStrategy::Mean, _) => return Err(PipelineError::NotFitted),
                };
                for (v, ok) in column.values.iter_mut().zip(column.valid.iter_mut()) {
                    if !*ok {
                        *v = fill;
                        *ok = true;
                    }
                }
            }
            (ContinuousOp::Clip { min, max }, _) => {
                let lo = min.unwrap_or(f64::NEG_INFINITY);
                let hi = max.unwrap_or(f64::INFINITY);
                column.map_valid(|x| x.max(lo).min(hi));
            }
            (ContinuousOp::LogOp, _) => {
                if let Some(bad) = column.iter().flatten().find(|x| *x < 0.0) {
                    return Err(PipelineError::DataError(format!(
                        "LogOp received negative input {bad}"
                    )));
                }
                column.map_valid(f64::ln_1p);
            }
            (ContinuousOp::Normalize, ContinuousState::Scale { mean, std }) => {
                let (mean, std) = (*mean, *std);
                column.map_valid(|x| (x - mean) / std);
            }
            (ContinuousOp::Normalize, _) => return Err(PipelineError::NotFitted),
        }
        Ok(())
    }
}

/// Operators for categorical columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum CategoricalOp {
    /// Dense indexing; values seen fewer than `freq_threshold` times share
    /// the reserved index
    Categorify {
        freq_threshold: u64,
        max_size: Option<usize>,
    },
    /// `index % num_buckets` over dense indices
    HashBucket { num_buckets: u64 },
}

/// Frozen per-column state of a categorical operator
#[derive(Debug, Clone, PartialEq)]
pub enum CategoricalState {
    Stateless,
    Vocabulary(Vocabulary),
}

/// Categorical values before and after indexing
pub enum CategoricalColumn {
    Raw(StringChunked),
    Codes(Vec<i64>),
}

impl CategoricalColumn {
    pub fn from_series(series: &Series) -> Result<Self> {
        let casted = series.cast(&DataType::String)?;
        Ok(CategoricalColumn::Raw(casted.str()?.clone()))
    }

    /// Materialize indexed codes as an `Int64` series
    pub fn into_series(self, name: &str) -> Result<Series> {
        match self {
            CategoricalColumn::Codes(codes) => Ok(Series::new(name.into(), codes)),
            CategoricalColumn::Raw(_) => Err(PipelineError::InvalidPipeline(format!(
                "column {name} was never categorified"
            ))),
        }
    }
}

impl CategoricalOp {
    pub fn name(&self) -> &'static str {
        match self {
            CategoricalOp::Categorify { .. } => "Categorify",
            CategoricalOp::HashBucket { .. } => "HashBucket",
        }
    }

    pub fn needs_fit(&self) -> bool {
        matches!(self, CategoricalOp::Categorify { .. })
    }

    pub fn collect(&self, column: &CategoricalColumn, acc: &mut FrequencyTable) -> Result<()> {
        match column {
            CategoricalColumn::Raw(ca) => {
                for value in ca.into_iter() {
                    acc.observe(value);
                }
                Ok(())
            }
            CategoricalColumn::Codes(_) => Err(PipelineError::InvalidPipeline(format!(
                "{} expects raw categories",
                self.name()
            ))),
        }
    }

    pub fn finalize(&self, table: FrequencyTable) -> CategoricalState {
        match self {
            CategoricalOp::Categorify { freq_threshold, max_size } => {
                CategoricalState::Vocabulary(Vocabulary::build(table, *freq_threshold, *max_size))
            }
            CategoricalOp::HashBucket { .. } => CategoricalState::Stateless,
        }
    }

    pub fn apply(&self, state: &CategoricalState, column: CategoricalColumn) -> Result<CategoricalColumn> {
        match (self, state, column) {
            (CategoricalOp::Categorify { .. }, CategoricalState::Vocabulary(vocab), CategoricalColumn::Raw(ca)) => {
                Ok(CategoricalColumn::Codes(
                    ca.into_iter().map(|v| vocab.index_of(v)).collect(),
                ))
            }
            (CategoricalOp::Categorify { .. }, CategoricalState::Stateless, _) => Err(PipelineError::NotFitted),
            (CategoricalOp::HashBucket { num_buckets }, _, CategoricalColumn::Codes(mut codes)) => {
                let buckets = *num_buckets as i64;
                for code in codes.iter_mut() {
                    *code = code.rem_euclid(buckets);
                }
                Ok(CategoricalColumn::Codes(codes))
            }
            (op, _, _) => Err(PipelineError::InvalidPipeline(format!(
                "{} applied to a column in the wrong encoding",
                op.name()
            ))),
        }
    }

    /// Number of distinct indices this operator can emit given the
    /// cardinality of its input (None before indexing)
    pub fn output_cardinality(&self, state: &CategoricalState, input: Option<u64>) -> Option<u64> {
        match (self, state) {
            (CategoricalOp::Categorify { .. }, CategoricalState::Vocabulary(vocab)) => Some(vocab.cardinality()),
            (CategoricalOp::Categorify { .. }, CategoricalState::Stateless) => None,
            (CategoricalOp::HashBucket { num_buckets }, _) => input.map(|n| n.min(*num_buckets)),
        }
    }
}
