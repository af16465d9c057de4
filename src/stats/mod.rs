//! On-disk statistics store for fitted workflows
//!
//! Layout:
//!
//! ```text
//! <dir>/workflow.json
//! <dir>/categories/unique.<column>.parquet
//! ```
//!
//! `workflow.json` holds the operator lists, continuous operator states,
//! raw column summaries and the training row count. Each vocabulary is
//! stored as a two-column Parquet table (`<column>`, `count`) whose row
//! `i` is index `i + 1`.

use crate::error::{PipelineError, Result};
use crate::pipeline::ops::{CategoricalState, ContinuousState};
use crate::pipeline::stats::Moments;
use crate::pipeline::vocab::Vocabulary;
use crate::pipeline::workflow::{FittedWorkflow, Workflow};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::info;

pub const WORKFLOW_FILE: &str = "workflow.json";
pub const CATEGORIES_DIR: &str = "categories";
const COUNT_COLUMN: &str = "count";

pub fn vocabulary_path(dir: &Path, column: &str) -> PathBuf {
    dir.join(CATEGORIES_DIR).join(format!("unique.{column}.parquet"))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
enum StoredCategoricalState {
    Stateless,
    Vocabulary {
        file: String,
        size: usize,
        rare_count: u64,
        null_count: u64,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredWorkflow {
    workflow: Workflow,
    continuous_states: BTreeMap<String, Vec<ContinuousState>>,
    categorical_states: BTreeMap<String, Vec<StoredCategoricalState>>,
    summaries: BTreeMap<String, Moments>,
    train_rows: u64,
}

fn write_vocabulary(path: &Path, column: &str, vocab: &Vocabulary) -> Result<()> {
    let mut df = DataFrame::new(vec![
        Series::new(column.into(), vocab.values().to_vec()).into_column(),
        Series::new(COUNT_COLUMN.into(), vocab.counts().to_vec()).into_column(),
    ])?;
    ParquetWriter::new(File::create(path)?).finish(&mut df)?;
    Ok(())
}

fn read_vocabulary(path: &Path, column: &str, rare_count: u64, null_count: u64) -> Result<Vocabulary> {
    if !path.exists() {
        return Err(PipelineError::MissingInput(path.to_path_buf()));
    }
    let df = ParquetReader::new(File::open(path)?).finish()?;
    let values = df
        .column(column)
        .map_err(|_| PipelineError::StatsError(format!("{} lacks column {column}", path.display())))?
        .as_materialized_series()
        .cast(&DataType::String)?;
    let counts = df
        .column(COUNT_COLUMN)
        .map_err(|_| PipelineError::StatsError(format!("{} lacks column {COUNT_COLUMN}", path.display())))?
        .as_materialized_series()
        .cast(&DataType::UInt64)?;

    let values: Vec<String> = values
        .str()?
        .into_iter()
        .map(|v| {
            v.map(str::to_string)
                .ok_or_else(|| PipelineError::StatsError(format!("null category in {}", path.display())))
        })
        .collect::<Result<_>>()?;
    let counts: Vec<u64> = counts.u64()?.into_iter().map(|c| c.unwrap_or(0)).collect();
    Ok(Vocabulary::from_parts(values, counts, rare_count, null_count))
}

/// Persist a fitted workflow under `dir`
pub fn save(dir: &Path, fitted: &FittedWorkflow) -> Result<()> {
    fs::create_dir_all(dir.join(CATEGORIES_DIR))?;

    let mut categorical_states = BTreeMap::new();
    for (column, states) in &fitted.categorical_states {
        let mut stored = Vec::with_capacity(states.len());
        for state in states {
            stored.push(match state {
                CategoricalState::Stateless => StoredCategoricalState::Stateless,
                CategoricalState::Vocabulary(vocab) => {
                    let path = vocabulary_path(dir, column);
                    write_vocabulary(&path, column, vocab)?;
                    StoredCategoricalState::Vocabulary {
                        file: format!("{CATEGORIES_DIR}/unique.{column}.parquet"),
                        size: vocab.len(),
                        rare_count: vocab.rare_count(),
                        null_count: vocab.null_count(),
                    }
                }
            });
        }
        categorical_states.insert(column.clone(), stored);
    }

    let doc = StoredWorkflow {
        workflow: fitted.workflow.clone(),
        continuous_states: fitted.continuous_states.clone(),
        categorical_states,
        summaries: fitted.summaries.clone(),
        train_rows: fitted.train_rows,
    };
    let file = File::create(dir.join(WORKFLOW_FILE))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &doc)?;

    info!(dir = %dir.display(), columns = doc.categorical_states.len(), "statistics saved");
    Ok(())
}

/// Load a fitted workflow previously written by [`save`]
pub fn load(dir: &Path) -> Result<FittedWorkflow> {
    let path = dir.join(WORKFLOW_FILE);
    if !path.exists() {
        return Err(PipelineError::MissingInput(path));
    }
    let doc: StoredWorkflow = serde_json::from_reader(BufReader::new(File::open(&path)?))?;

    let mut categorical_states = BTreeMap::new();
    for (column, stored) in doc.categorical_states {
        let mut states = Vec::with_capacity(stored.len());
        for state in stored {
            states.push(match state {
                StoredCategoricalState::Stateless => CategoricalState::Stateless,
                StoredCategoricalState::Vocabulary { file, size, rare_count, null_count } => {
                    let vocab = read_vocabulary(&dir.join(file), &column, rare_count, null_count)?;
                    if vocab.len() != size {
                        return Err(PipelineError::StatsError(format!(
                            "vocabulary for {column} has {} entries, expected {size}",
                            vocab.len()
                        )));
                    }
                    CategoricalState::Vocabulary(vocab)
                }
            });
        }
        categorical_states.insert(column, states);
    }

    Ok(FittedWorkflow {
        workflow: doc.workflow,
        continuous_states: doc.continuous_states,
        categorical_states,
        summaries: doc.summaries,
        train_rows: doc.train_rows,
    })
}
