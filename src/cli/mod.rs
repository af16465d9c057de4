//! criteo-pipeline CLI
//!
//! Subcommands for each stage (convert, fit, transform, embeddings,
//! trainer-config, train) plus `run` for the whole sequence.

use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::cluster::ExecutionContext;
use crate::config::PipelineConfig;
use crate::dataset::convert::convert_days;
use crate::pipeline::ShuffleMode;
use crate::report::{self, EmbeddingSize};
use crate::runner;
use crate::stats;

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn step_ok(msg: &str) {
    println!("  {} {}", ok("✓"), msg);
}

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "criteo-pipeline")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Criteo preprocessing and DLRM trainer orchestration")]
#[command(long_about = None)]
pub struct Cli {
    /// JSON run configuration (defaults are used for missing fields)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Number of workers
    #[arg(short, long, global = true)]
    pub workers: Option<usize>,

    /// Directory holding day_<n> input files
    #[arg(long, global = true)]
    pub input_dir: Option<PathBuf>,

    /// Input file extension (parquet, tsv, or empty for raw days)
    #[arg(long, global = true)]
    pub extension: Option<String>,

    /// Parent directory of train/ and valid/ outputs
    #[arg(long, global = true)]
    pub output_dir: Option<PathBuf>,

    /// Fitted statistics directory
    #[arg(long, global = true)]
    pub stats_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert raw tab-separated day files into Parquet day files
    Convert {
        /// Destination directory for day_<n>.parquet
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Collect statistics over the training days
    Fit,

    /// Apply fitted statistics to the training and validation days
    Transform {
        /// Keep source row order
        #[arg(long)]
        no_shuffle: bool,
    },

    /// Print the embedding size report
    Embeddings {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Write the trainer configuration document
    TrainerConfig {
        /// Output path (defaults to the configured path)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Launch the external trainer
    Train {
        /// Trainer executable
        #[arg(long)]
        binary: Option<PathBuf>,
    },

    /// Fit, transform, write the trainer configuration and train
    Run {
        /// Stop after writing the trainer configuration
        #[arg(long)]
        skip_train: bool,
    },
}

/// Load the configuration file (if any) and apply command-line overrides
pub fn load_config(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(n) = cli.workers {
        config.cluster.n_workers = Some(n);
    }
    if let Some(dir) = &cli.input_dir {
        config.layout.input_dir = dir.clone();
    }
    if let Some(ext) = &cli.extension {
        config.layout.extension = ext.clone();
    }
    if let Some(dir) = &cli.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(dir) = &cli.stats_dir {
        config.stats_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

fn bootstrap(config: &PipelineConfig) -> anyhow::Result<ExecutionContext> {
    step_run("Starting workers");
    let ctx = ExecutionContext::bootstrap(&config.cluster)?;
    let spec = ctx.spec();
    step_done(&format!(
        "{} workers, {} MB pool each",
        spec.n_workers,
        spec.pool_size_bytes / (1024 * 1024)
    ));
    Ok(ctx)
}

fn print_report(report: &[EmbeddingSize]) {
    println!("  {:<10} {:>14} {:>8}", muted("Column"), muted("Cardinality"), muted("Width"));
    println!("  {}", dim(&"─".repeat(34)));
    for entry in report {
        println!("  {:<10} {:>14} {:>8}", entry.column, entry.cardinality, entry.width);
    }
    println!("  {}", dim(&"─".repeat(34)));
    println!("  {:<10} {:>14}", muted("Total"), report::total_rows(report));
}

fn print_pool_stats(ctx: &ExecutionContext) {
    for stats in ctx.pool_stats() {
        println!(
            "  {:<12} {:>8} {:>8} {:>8}  {}",
            muted(&format!("worker {}", stats.worker)),
            stats.hits,
            stats.misses,
            stats.spills,
            dim(&format!("hit rate {:.1}%", stats.hit_rate() * 100.0))
        );
    }
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub fn cmd_convert(config: &PipelineConfig, output: &Path) -> anyhow::Result<()> {
    section("Convert");
    let ctx = bootstrap(config)?;

    step_run(&format!("Converting {} days", config.layout.train_days.len() + config.layout.valid_days.len()));
    let start = Instant::now();
    config.layout.validate()?;
    let written = convert_days(
        &ctx,
        &config.layout,
        &config.schema,
        output,
        runner::part_size(&ctx, config),
    )?;
    step_done(&format!("{} files in {:?}", written.len(), start.elapsed()));
    step_ok(&format!("Parquet days → {}", output.display()));
    println!();
    Ok(())
}

pub fn cmd_fit(config: &PipelineConfig) -> anyhow::Result<()> {
    section("Fit");
    let ctx = bootstrap(config)?;

    step_run(&format!("Fitting on {} training days", config.layout.train_days.len()));
    let start = Instant::now();
    let fitted = runner::fit_stage(&ctx, config)?;
    step_done(&format!("{} rows in {:?}", fitted.train_rows(), start.elapsed()));
    step_ok(&format!("Statistics → {}", config.stats_dir.display()));
    println!();
    Ok(())
}

pub fn cmd_transform(config: &PipelineConfig, no_shuffle: bool) -> anyhow::Result<()> {
    section("Transform");
    let mut config = config.clone();
    if no_shuffle {
        config.output.shuffle = ShuffleMode::None;
    }
    let ctx = bootstrap(&config)?;

    step_run("Loading statistics");
    let fitted = stats::load(&config.stats_dir)?;
    step_done(&format!("{} training rows", fitted.train_rows()));

    step_run("Transforming train and valid");
    let start = Instant::now();
    let (train, valid) = runner::transform_stage(&ctx, &config, &fitted)?;
    step_done(&format!("{:?}", start.elapsed()));

    println!();
    println!("  {:<8} {:>6} files {:>12} rows  {}", muted("train"), train.files.len(), train.rows, dim(&train.manifest.display().to_string()));
    println!("  {:<8} {:>6} files {:>12} rows  {}", muted("valid"), valid.files.len(), valid.rows, dim(&valid.manifest.display().to_string()));
    println!();
    print_pool_stats(&ctx);
    println!();
    Ok(())
}

pub fn cmd_embeddings(config: &PipelineConfig, json: bool) -> anyhow::Result<()> {
    let fitted = stats::load(&config.stats_dir)?;
    let report = report::embedding_sizes(&fitted)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    section("Embedding Sizes");
    print_report(&report);
    println!();
    Ok(())
}

pub fn cmd_trainer_config(config: &PipelineConfig, output: Option<&Path>) -> anyhow::Result<()> {
    section("Trainer Config");
    let mut config = config.clone();
    if let Some(path) = output {
        config.trainer.config_path = path.to_path_buf();
    }
    let fitted = stats::load(&config.stats_dir)?;
    let report = report::embedding_sizes(&fitted)?;
    let path = runner::write_trainer_config(&config, &report)?;
    step_ok(&format!("{} slots → {}", report.len(), path.display()));
    println!();
    Ok(())
}

pub fn cmd_train(config: &PipelineConfig, binary: Option<&Path>) -> anyhow::Result<()> {
    section("Train");
    let mut config = config.clone();
    if let Some(binary) = binary {
        config.trainer.binary = binary.to_path_buf();
    }
    println!("  {:<10} {}", muted("Trainer"), config.trainer.binary.display());
    println!("  {:<10} {}", muted("Config"), config.trainer.config_path.display());
    println!();

    let start = Instant::now();
    runner::launch_trainer(&config)?;
    step_ok(&format!("Trainer finished in {:?}", start.elapsed()));
    println!();
    Ok(())
}

pub fn cmd_run(config: &PipelineConfig, skip_train: bool) -> anyhow::Result<()> {
    section("Run");
    let ctx = bootstrap(config)?;

    step_run("Preprocessing");
    let start = Instant::now();
    let outcome = runner::preprocess(&ctx, config)?;
    step_done(&format!(
        "{} train / {} valid rows in {:?}",
        outcome.train.rows,
        outcome.valid.rows,
        start.elapsed()
    ));

    section("Embedding Sizes");
    print_report(&outcome.report);

    let path = runner::write_trainer_config(config, &outcome.report)?;
    println!();
    step_ok(&format!("Trainer configuration → {}", path.display()));

    if skip_train {
        println!();
        return Ok(());
    }
    cmd_train(config, None)
}

pub fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    match cli.command {
        Commands::Convert { output } => cmd_convert(&config, &output),
        Commands::Fit => cmd_fit(&config),
        Commands::Transform { no_shuffle } => cmd_transform(&config, no_shuffle),
        Commands::Embeddings { json } => cmd_embeddings(&config, json),
        Commands::TrainerConfig { output } => cmd_trainer_config(&config, output.as_deref()),
        Commands::Train { binary } => cmd_train(&config, binary.as_deref()),
        Commands::Run { skip_train } => cmd_run(&config, skip_train),
    }
}
