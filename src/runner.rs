//! Stage sequencing shared by the CLI and library callers

use crate::cluster::ExecutionContext;
use crate::config::PipelineConfig;
use crate::dataset::{Dataset, FileFormat};
use crate::error::Result;
use crate::pipeline::{self, FittedWorkflow, TransformSummary, Workflow, MANIFEST_FILE};
use crate::report::{self, EmbeddingSize};
use crate::stats;
use crate::trainer::{TrainerConfig, TrainerLauncher};
use std::path::PathBuf;
use tracing::info;

/// Everything produced by a preprocessing run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub fitted: FittedWorkflow,
    pub train: TransformSummary,
    pub valid: TransformSummary,
    pub report: Vec<EmbeddingSize>,
}

pub fn part_size(ctx: &ExecutionContext, config: &PipelineConfig) -> usize {
    config.part_size.unwrap_or(ctx.spec().part_size_bytes)
}

fn dataset(ctx: &ExecutionContext, config: &PipelineConfig, files: Vec<PathBuf>) -> Result<Dataset> {
    let format = FileFormat::from_extension(&config.layout.extension)?;
    Ok(Dataset::new(files, format, config.schema.input_types()).with_part_size(part_size(ctx, config)))
}

pub fn train_dataset(ctx: &ExecutionContext, config: &PipelineConfig) -> Result<Dataset> {
    dataset(ctx, config, config.layout.train_files())
}

pub fn valid_dataset(ctx: &ExecutionContext, config: &PipelineConfig) -> Result<Dataset> {
    dataset(ctx, config, config.layout.valid_files())
}

/// Fit the standard workflow on the training days and persist the statistics
pub fn fit_stage(ctx: &ExecutionContext, config: &PipelineConfig) -> Result<FittedWorkflow> {
    config.validate()?;
    config.layout.validate()?;
    let workflow = Workflow::criteo(config.schema.clone(), &config.ops)?;
    let fitted = pipeline::fit(ctx, &workflow, &train_dataset(ctx, config)?)?;
    stats::save(&config.stats_dir, &fitted)?;
    Ok(fitted)
}

/// Apply fitted statistics to the training and validation days
pub fn transform_stage(
    ctx: &ExecutionContext,
    config: &PipelineConfig,
    fitted: &FittedWorkflow,
) -> Result<(TransformSummary, TransformSummary)> {
    config.layout.validate()?;
    let train = pipeline::transform(
        ctx,
        fitted,
        &train_dataset(ctx, config)?,
        &config.train_output_dir(),
        &config.output,
    )?;
    let valid = pipeline::transform(
        ctx,
        fitted,
        &valid_dataset(ctx, config)?,
        &config.valid_output_dir(),
        &config.output,
    )?;
    Ok((train, valid))
}

/// Fit, persist statistics, transform both splits and build the report
pub fn preprocess(ctx: &ExecutionContext, config: &PipelineConfig) -> Result<RunOutcome> {
    let fitted = fit_stage(ctx, config)?;
    let (train, valid) = transform_stage(ctx, config, &fitted)?;
    let report = report::embedding_sizes(&fitted)?;
    info!(
        train_rows = train.rows,
        valid_rows = valid.rows,
        slots = report.len(),
        embedding_rows = report::total_rows(&report),
        "preprocessing complete"
    );
    Ok(RunOutcome { fitted, train, valid, report })
}

/// Author the trainer document from the report and the output manifests
pub fn write_trainer_config(config: &PipelineConfig, report: &[EmbeddingSize]) -> Result<PathBuf> {
    let document = TrainerConfig::dlrm(
        &config.trainer,
        report,
        config.schema.continuous().len(),
        &std::path::absolute(config.train_output_dir().join(MANIFEST_FILE))?,
        &std::path::absolute(config.valid_output_dir().join(MANIFEST_FILE))?,
    )?;
    document.write(&config.trainer.config_path)?;
    info!(path = %config.trainer.config_path.display(), "trainer configuration written");
    Ok(config.trainer.config_path.clone())
}

pub fn launch_trainer(config: &PipelineConfig) -> Result<()> {
    TrainerLauncher::new(&config.trainer.binary).run(&config.trainer.config_path)
}
