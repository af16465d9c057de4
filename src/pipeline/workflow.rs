//! Ordered operator pipelines bound to the schema's feature groups

use super::ops::{
    CategoricalColumn, CategoricalOp, CategoricalState, ContinuousOp, ContinuousState, FillStrategy,
    NumericColumn,
};
use super::stats::Moments;
use crate::cluster::MemoryPool;
use crate::error::{PipelineError, Result};
use crate::schema::{ColumnDtype, Schema};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Operator parameters for the standard Criteo pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpsConfig {
    pub fill: FillStrategy,
    pub clip_min: f64,
    pub normalize: bool,
    /// Minimum training count for a category to get its own index
    pub freq_threshold: u64,
    pub max_vocab_size: Option<usize>,
    /// Hash bucket count (None disables bucketing)
    pub num_buckets: Option<u64>,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            fill: FillStrategy::Constant(0.0),
            clip_min: 0.0,
            normalize: false,
            freq_threshold: 15,
            max_vocab_size: None,
            num_buckets: Some(10_000_000),
        }
    }
}

/// Declared, unfitted pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    schema: Schema,
    continuous_ops: Vec<ContinuousOp>,
    categorical_ops: Vec<CategoricalOp>,
}

impl Workflow {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            continuous_ops: Vec::new(),
            categorical_ops: Vec::new(),
        }
    }

    /// FillMissing → Clip → LogOp (→ Normalize) for continuous columns,
    /// Categorify (→ HashBucket) for categorical columns
    pub fn criteo(schema: Schema, config: &OpsConfig) -> Result<Self> {
        let mut workflow = Self::new(schema);
        workflow
            .add_continuous(ContinuousOp::FillMissing { strategy: config.fill })?
            .add_continuous(ContinuousOp::Clip { min: Some(config.clip_min), max: None })?
            .add_continuous(ContinuousOp::LogOp)?;
        if config.normalize {
            workflow.add_continuous(ContinuousOp::Normalize)?;
        }
        workflow.add_categorical(CategoricalOp::Categorify {
            freq_threshold: config.freq_threshold,
            max_size: config.max_vocab_size,
        })?;
        if let Some(num_buckets) = config.num_buckets {
            workflow.add_categorical(CategoricalOp::HashBucket { num_buckets })?;
        }
        Ok(workflow)
    }

    /// Append a continuous operator.
    ///
    /// `LogOp` must follow a `Clip` with a non-negative lower bound, with no
    /// `Normalize` in between. `Clip` bounds are finite; leave a side
    /// unbounded with `None`.
    pub fn add_continuous(&mut self, op: ContinuousOp) -> Result<&mut Self> {
        match &op {
            ContinuousOp::LogOp => {
                let guarded = self
                    .continuous_ops
                    .iter()
                    .rev()
                    .take_while(|prev| !matches!(prev, ContinuousOp::Normalize))
                    .any(|prev| matches!(prev, ContinuousOp::Clip { min: Some(m), .. } if *m >= 0.0));
                if !guarded {
                    return Err(PipelineError::InvalidPipeline(
                        "LogOp requires a preceding Clip with min >= 0".into(),
                    ));
                }
            }
            ContinuousOp::Clip { min, max } if min.iter().chain(max).any(|b| !b.is_finite()) => {
                return Err(PipelineError::InvalidPipeline(format!(
                    "Clip bounds must be finite: min {min:?}, max {max:?}"
                )));
            }
            ContinuousOp::Clip { min: Some(lo), max: Some(hi) } if lo > hi => {
                return Err(PipelineError::InvalidPipeline(format!(
                    "Clip bounds are inverted: {lo} > {hi}"
                )));
            }
            _ => {}
        }
        self.continuous_ops.push(op);
        Ok(self)
    }

    /// Append a categorical operator.
    ///
    /// `Categorify` may appear once; `HashBucket` must follow it.
    pub fn add_categorical(&mut self, op: CategoricalOp) -> Result<&mut Self> {
        let categorified = self
            .categorical_ops
            .iter()
            .any(|prev| matches!(prev, CategoricalOp::Categorify { .. }));
        match &op {
            CategoricalOp::Categorify { .. } if categorified => {
                return Err(PipelineError::InvalidPipeline("Categorify registered twice".into()));
            }
            CategoricalOp::HashBucket { .. } if !categorified => {
                return Err(PipelineError::InvalidPipeline(
                    "HashBucket requires a preceding Categorify".into(),
                ));
            }
            CategoricalOp::HashBucket { num_buckets: 0 } => {
                return Err(PipelineError::InvalidPipeline("HashBucket needs at least one bucket".into()));
            }
            _ => {}
        }
        self.categorical_ops.push(op);
        Ok(self)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn continuous_ops(&self) -> &[ContinuousOp] {
        &self.continuous_ops
    }

    pub fn categorical_ops(&self) -> &[CategoricalOp] {
        &self.categorical_ops
    }

    /// Checks that must hold before fitting
    pub fn validate(&self) -> Result<()> {
        let indexes = self
            .categorical_ops
            .iter()
            .any(|op| matches!(op, CategoricalOp::Categorify { .. }));
        if !self.schema.categorical().is_empty() && !indexes {
            return Err(PipelineError::InvalidPipeline(
                "categorical columns need a Categorify operator".into(),
            ));
        }
        Ok(())
    }
}

/// Workflow with frozen training statistics.
///
/// Applying it never modifies it; the same instance transforms the
/// training and validation sets.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedWorkflow {
    pub(crate) workflow: Workflow,
    pub(crate) continuous_states: BTreeMap<String, Vec<ContinuousState>>,
    pub(crate) categorical_states: BTreeMap<String, Vec<CategoricalState>>,
    /// Raw (pre-transform) moments of label and continuous columns
    pub(crate) summaries: BTreeMap<String, Moments>,
    pub(crate) train_rows: u64,
}

impl FittedWorkflow {
    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn schema(&self) -> &Schema {
        &self.workflow.schema
    }

    pub fn train_rows(&self) -> u64 {
        self.train_rows
    }

    pub fn summaries(&self) -> &BTreeMap<String, Moments> {
        &self.summaries
    }

    pub fn continuous_states(&self, column: &str) -> Option<&[ContinuousState]> {
        self.continuous_states.get(column).map(|s| s.as_slice())
    }

    pub fn categorical_states(&self, column: &str) -> Option<&[CategoricalState]> {
        self.categorical_states.get(column).map(|s| s.as_slice())
    }

    /// Cardinality of a categorical column after all its operators
    pub fn cardinality(&self, column: &str) -> Option<u64> {
        let states = self.categorical_states.get(column)?;
        self.workflow
            .categorical_ops
            .iter()
            .zip(states)
            .fold(None, |acc, (op, state)| op.output_cardinality(state, acc))
    }

    /// Apply every operator to one partition and cast to the output types
    pub fn transform_partition(&self, df: &DataFrame, pool: &Arc<MemoryPool>) -> Result<DataFrame> {
        let schema = &self.workflow.schema;
        let mut columns: Vec<Column> = Vec::with_capacity(schema.all_columns().len());

        for name in schema.label() {
            let series = column_series(df, name)?.cast(&ColumnDtype::Float32.to_polars())?;
            columns.push(series.into_column());
        }

        for name in schema.continuous() {
            let states = self
                .continuous_states
                .get(name)
                .ok_or(PipelineError::NotFitted)?;
            let mut numeric = NumericColumn::from_series(column_series(df, name)?, pool)?;
            for (op, state) in self.workflow.continuous_ops.iter().zip(states) {
                op.apply(state, &mut numeric)?;
            }
            columns.push(numeric.into_series(name).into_column());
        }

        for name in schema.categorical() {
            let states = self
                .categorical_states
                .get(name)
                .ok_or(PipelineError::NotFitted)?;
            let mut column = CategoricalColumn::from_series(column_series(df, name)?)?;
            for (op, state) in self.workflow.categorical_ops.iter().zip(states) {
                column = op.apply(state, column)?;
            }
            columns.push(column.into_series(name)?.into_column());
        }

        Ok(DataFrame::new(columns)?)
    }
}

pub(crate) fn column_series<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Series> {
    df.column(name)
        .map(|c| c.as_materialized_series())
        .map_err(|_| PipelineError::ColumnNotFound(name.to_string()))
}
