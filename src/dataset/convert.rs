//! Conversion of raw Criteo day files into Parquet day files

use super::{Dataset, FileFormat};
use crate::cluster::ExecutionContext;
use crate::error::{PipelineError, Result};
use crate::schema::{DayLayout, Schema};
use polars::prelude::*;
use rayon::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

/// Convert every train and validation day of `source` into
/// `<out_dir>/day_<n>.parquet`, coercing columns to the schema's input types.
///
/// Days are converted in parallel; each day is streamed partition by
/// partition into one row group per partition. Returns the written paths
/// in day order.
pub fn convert_days(
    ctx: &ExecutionContext,
    source: &DayLayout,
    schema: &Schema,
    out_dir: &Path,
    part_size: usize,
) -> Result<Vec<PathBuf>> {
    let format = FileFormat::from_extension(&source.extension)?;
    if format == FileFormat::Parquet {
        return Err(PipelineError::ConfigError(
            "source files are already Parquet".to_string(),
        ));
    }
    std::fs::create_dir_all(out_dir)?;

    let days: Vec<u32> = source
        .train_days
        .days()
        .chain(source.valid_days.days())
        .collect();

    ctx.install(|| {
        days.par_iter()
            .map(|&day| {
                let input = source.day_path(day);
                let output = out_dir.join(format!("day_{day}.parquet"));
                let dataset = Dataset::new(vec![input], format, schema.input_types())
                    .with_part_size(part_size);
                convert_file(&dataset, &output)?;
                Ok(output)
            })
            .collect::<Result<Vec<_>>>()
    })
}

fn convert_file(dataset: &Dataset, output: &Path) -> Result<()> {
    let start = Instant::now();
    let parts = dataset.partitions()?;
    let Some(first) = parts.first() else {
        return Err(PipelineError::DataError(format!(
            "{} contains no rows",
            dataset.files()[0].display()
        )));
    };

    let first_df = dataset.read_partition(first)?;
    let schema = first_df.schema().clone();
    let mut writer = ParquetWriter::new(File::create(output)?).batched(&schema)?;
    writer.write_batch(&first_df)?;

    let mut rows = first_df.height();
    for part in &parts[1..] {
        let df = dataset.read_partition(part)?;
        rows += df.height();
        writer.write_batch(&df)?;
    }
    writer.finish()?;

    info!(
        output = %output.display(),
        rows,
        partitions = parts.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "converted day file"
    );
    Ok(())
}
