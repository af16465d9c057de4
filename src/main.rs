//! criteo-pipeline - Main Entry Point

use clap::Parser;
use criteo_pipeline::cli::{dispatch, Cli};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "criteo_pipeline=info".into()),
        )
        .init();

    dispatch(Cli::parse())
}
