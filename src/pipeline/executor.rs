//! Two-pass execution over a partitioned dataset
//!
//! `fit` reads training partitions in parallel and reduces per-worker
//! partial statistics into frozen operator states. `transform` applies a
//! fitted workflow to every partition independently and writes one output
//! file per partition plus the manifest and metadata descriptor.

use super::ops::{CategoricalColumn, CategoricalState, ContinuousState, NumericColumn};
use super::stats::{FrequencyTable, Moments};
use super::workflow::{column_series, FittedWorkflow, Workflow};
use super::writer::{part_file_name, prepare_output_dir, FileStats, Manifest, OutputMetadata};
use crate::cluster::{ExecutionContext, MemoryPool};
use crate::dataset::{Dataset, Partition};
use crate::error::{PipelineError, Result};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Row order of written partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ShuffleMode {
    /// Keep source row order
    #[default]
    None,
    /// Permute rows inside each partition with a per-partition seed
    PerPartition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutputOptions {
    pub shuffle: ShuffleMode,
    pub seed: u64,
}

/// Files and row counts written by one apply pass
#[derive(Debug, Clone, PartialEq)]
pub struct TransformSummary {
    pub output_dir: PathBuf,
    pub files: Vec<PathBuf>,
    pub rows: usize,
    pub manifest: PathBuf,
    pub metadata: PathBuf,
}

/// Operator positions fitted in one pass
#[derive(Debug, Clone, Copy)]
struct PhaseTargets {
    continuous: Option<usize>,
    categorical: Option<usize>,
}

/// One phase per fitted operator position in either family
fn plan_phases(workflow: &Workflow) -> Vec<PhaseTargets> {
    let cont: Vec<usize> = positions(workflow.continuous_ops().iter().map(|op| op.needs_fit()));
    let cat: Vec<usize> = positions(workflow.categorical_ops().iter().map(|op| op.needs_fit()));
    let n = cont.len().max(cat.len()).max(1);
    (0..n)
        .map(|p| PhaseTargets {
            continuous: cont.get(p).copied(),
            categorical: cat.get(p).copied(),
        })
        .collect()
}

fn positions(flags: impl Iterator<Item = bool>) -> Vec<usize> {
    flags.enumerate().filter(|(_, f)| *f).map(|(i, _)| i).collect()
}

/// Partial statistics of one partition (or a merged group of partitions)
#[derive(Debug, Default)]
struct PhaseStats {
    rows: u64,
    summaries: BTreeMap<String, Moments>,
    moments: BTreeMap<String, Moments>,
    tables: BTreeMap<String, FrequencyTable>,
}

impl PhaseStats {
    fn merge(mut self, other: PhaseStats) -> PhaseStats {
        self.rows += other.rows;
        for (name, m) in other.summaries {
            let merged = self.summaries.remove(&name).unwrap_or_default().merge(m);
            self.summaries.insert(name, merged);
        }
        for (name, m) in other.moments {
            let merged = self.moments.remove(&name).unwrap_or_default().merge(m);
            self.moments.insert(name, merged);
        }
        for (name, t) in other.tables {
            let merged = self.tables.remove(&name).unwrap_or_default().merge(t);
            self.tables.insert(name, merged);
        }
        self
    }
}

/// States fitted so far; unfitted positions hold the stateless default
struct FitState {
    continuous: BTreeMap<String, Vec<ContinuousState>>,
    categorical: BTreeMap<String, Vec<CategoricalState>>,
}

impl FitState {
    fn new(workflow: &Workflow) -> Self {
        let schema = workflow.schema();
        let continuous = schema
            .continuous()
            .iter()
            .map(|c| (c.clone(), vec![ContinuousState::Stateless; workflow.continuous_ops().len()]))
            .collect();
        let categorical = schema
            .categorical()
            .iter()
            .map(|c| (c.clone(), vec![CategoricalState::Stateless; workflow.categorical_ops().len()]))
            .collect();
        Self { continuous, categorical }
    }
}

fn partition_error(part: &Partition, err: PipelineError) -> PipelineError {
    PipelineError::PartitionFailed {
        index: part.index,
        file: part.file.clone(),
        reason: err.to_string(),
    }
}

fn collect_partition(
    workflow: &Workflow,
    state: &FitState,
    targets: PhaseTargets,
    with_summaries: bool,
    df: &DataFrame,
    pool: &Arc<MemoryPool>,
) -> Result<PhaseStats> {
    let schema = workflow.schema();
    let mut stats = PhaseStats {
        rows: df.height() as u64,
        ..Default::default()
    };

    if with_summaries {
        for name in schema.label() {
            let column = NumericColumn::from_series(column_series(df, name)?, pool)?;
            let mut m = Moments::new();
            column.iter().for_each(|v| m.update(v));
            stats.summaries.insert(name.clone(), m);
        }
    }

    for name in schema.continuous() {
        if targets.continuous.is_none() && !with_summaries {
            break;
        }
        let mut column = NumericColumn::from_series(column_series(df, name)?, pool)?;
        if with_summaries {
            let mut m = Moments::new();
            column.iter().for_each(|v| m.update(v));
            stats.summaries.insert(name.clone(), m);
        }
        let Some(target) = targets.continuous else { continue };
        let ops = workflow.continuous_ops();
        let states = state.continuous.get(name).ok_or(PipelineError::NotFitted)?;
        for (op, s) in ops[..target].iter().zip(states) {
            op.apply(s, &mut column)?;
        }
        let mut m = Moments::new();
        ops[target].collect(&column, &mut m);
        stats.moments.insert(name.clone(), m);
    }

    if let Some(target) = targets.categorical {
        let ops = workflow.categorical_ops();
        for name in schema.categorical() {
            let states = state.categorical.get(name).ok_or(PipelineError::NotFitted)?;
            let mut column = CategoricalColumn::from_series(column_series(df, name)?)?;
            for (op, s) in ops[..target].iter().zip(states) {
                column = op.apply(s, column)?;
            }
            let mut table = FrequencyTable::new();
            ops[target].collect(&column, &mut table)?;
            stats.tables.insert(name.clone(), table);
        }
    }

    Ok(stats)
}

/// Collect statistics over the training dataset and freeze them.
///
/// Only `dataset` is read; the returned workflow is immutable and is
/// applied unchanged to every later dataset.
pub fn fit(ctx: &ExecutionContext, workflow: &Workflow, dataset: &Dataset) -> Result<FittedWorkflow> {
    workflow.validate()?;
    let start = Instant::now();
    let parts = dataset.partitions()?;
    if parts.is_empty() {
        return Err(PipelineError::DataError("training dataset has no rows".into()));
    }

    let phases = plan_phases(workflow);
    let mut state = FitState::new(workflow);
    let mut summaries = BTreeMap::new();
    let mut train_rows = 0;

    for (phase, targets) in phases.iter().enumerate() {
        let first = phase == 0;
        let merged = ctx.install(|| {
            parts
                .par_iter()
                .map(|part| {
                    let df = dataset.read_partition(part).map_err(|e| partition_error(part, e))?;
                    collect_partition(workflow, &state, *targets, first, &df, ctx.worker_pool())
                        .map_err(|e| partition_error(part, e))
                })
                .try_reduce(PhaseStats::default, |a, b| Ok(a.merge(b)))
        })?;

        if first {
            summaries = merged.summaries;
            train_rows = merged.rows;
        }
        if let Some(target) = targets.continuous {
            let op = &workflow.continuous_ops()[target];
            for (name, states) in state.continuous.iter_mut() {
                let moments = merged.moments.get(name).cloned().unwrap_or_default();
                states[target] = op.finalize(&moments);
            }
        }
        if let Some(target) = targets.categorical {
            let op = &workflow.categorical_ops()[target];
            let mut tables = merged.tables;
            for (name, states) in state.categorical.iter_mut() {
                let table = tables.remove(name).unwrap_or_default();
                let observed = table.total();
                states[target] = op.finalize(table);
                if let CategoricalState::Vocabulary(vocab) = &states[target] {
                    debug!(column = %name, observed, frequent = vocab.len(), "vocabulary built");
                }
            }
        }
        debug!(phase, partitions = parts.len(), "fit phase complete");
    }

    info!(
        rows = train_rows,
        partitions = parts.len(),
        phases = phases.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "workflow fitted"
    );

    Ok(FittedWorkflow {
        workflow: workflow.clone(),
        continuous_states: state.continuous,
        categorical_states: state.categorical,
        summaries,
        train_rows,
    })
}

fn shuffle_rows(df: &DataFrame, seed: u64) -> Result<DataFrame> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut perm: Vec<IdxSize> = (0..df.height() as IdxSize).collect();
    perm.shuffle(&mut rng);
    Ok(df.take(&IdxCa::from_vec("idx".into(), perm))?)
}

fn transform_one(
    fitted: &FittedWorkflow,
    dataset: &Dataset,
    part: &Partition,
    out_dir: &Path,
    options: &OutputOptions,
    pool: &Arc<MemoryPool>,
) -> Result<(PathBuf, usize)> {
    let df = dataset.read_partition(part)?;
    let mut out = fitted.transform_partition(&df, pool)?;
    if options.shuffle == ShuffleMode::PerPartition {
        out = shuffle_rows(&out, options.seed ^ part.index as u64)?;
    }
    let path = out_dir.join(part_file_name(part.index));
    ParquetWriter::new(File::create(&path)?).finish(&mut out)?;
    Ok((path, out.height()))
}

/// Apply a fitted workflow to every partition of `dataset` and write the
/// results under `out_dir`.
///
/// Earlier partition files, manifest and metadata in `out_dir` are
/// removed first. Any failing partition aborts the pass.
pub fn transform(
    ctx: &ExecutionContext,
    fitted: &FittedWorkflow,
    dataset: &Dataset,
    out_dir: &Path,
    options: &OutputOptions,
) -> Result<TransformSummary> {
    let start = Instant::now();
    prepare_output_dir(out_dir)?;
    let parts = dataset.partitions()?;

    let written: Vec<(PathBuf, usize)> = ctx.install(|| {
        parts
            .par_iter()
            .map(|part| {
                transform_one(fitted, dataset, part, out_dir, options, ctx.worker_pool())
                    .map_err(|e| partition_error(part, e))
            })
            .collect::<Result<Vec<_>>>()
    })?;

    let files: Vec<PathBuf> = written.iter().map(|(p, _)| p.clone()).collect();
    let file_stats = written
        .iter()
        .map(|(path, rows)| FileStats {
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            num_rows: *rows,
        })
        .collect();
    let metadata = OutputMetadata::new(fitted.schema(), file_stats);
    let rows = metadata.total_rows();

    let manifest = Manifest::new(files.clone()).write(out_dir)?;
    let metadata = metadata.write(out_dir)?;

    info!(
        output = %out_dir.display(),
        files = files.len(),
        rows,
        shuffle = ?options.shuffle,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "dataset transformed"
    );

    Ok(TransformSummary {
        output_dir: out_dir.to_path_buf(),
        files,
        rows,
        manifest,
        metadata,
    })
}
