//! Synthetic Criteo day files shared by the integration tests
#![allow(dead_code)]

use criteo_pipeline::cluster::ClusterConfig;
use criteo_pipeline::config::PipelineConfig;
use criteo_pipeline::pipeline::{OpsConfig, ShuffleMode};
use criteo_pipeline::schema::{DayLayout, NUM_CATEGORICAL, NUM_CONTINUOUS};
use criteo_pipeline::trainer::TrainerSettings;
use polars::prelude::*;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const ROWS_PER_DAY: usize = 30;
pub const FREQ_THRESHOLD: u64 = 5;
/// Coerced row size: Int64 label, 13 Float64, 26 strings at 24 bytes
pub const ROW_BYTES: usize = 8 + 13 * 8 + 26 * 24;

pub fn label_value(i: usize) -> i64 {
    (i % 2) as i64
}

/// Every fifth value is negative, every fifth missing
pub fn cont_value(day: u32, i: usize, c: usize) -> Option<f64> {
    match (i + c) % 5 {
        0 => Some(-5.0),
        1 => None,
        _ => Some((i * (c + 1) + day as usize) as f64),
    }
}

/// Three frequent values per column, one-off rare values, and nulls
pub fn cat_value(day: u32, i: usize, c: usize) -> Option<String> {
    if (i + c) % 11 == 0 {
        None
    } else if i % 7 == 3 {
        Some(format!("rare_{c}_{day}_{i}"))
    } else {
        Some(format!("{:08x}", c * 1000 + i % 3))
    }
}

pub fn is_rare(day: u32, i: usize, c: usize) -> bool {
    cat_value(day, i, c).is_some_and(|v| v.starts_with("rare_"))
}

pub fn day_frame(day: u32) -> DataFrame {
    let mut columns = Vec::with_capacity(1 + NUM_CONTINUOUS + NUM_CATEGORICAL);
    let labels: Vec<i64> = (0..ROWS_PER_DAY).map(label_value).collect();
    columns.push(Series::new("label".into(), labels).into_column());
    for c in 0..NUM_CONTINUOUS {
        let values: Vec<Option<f64>> = (0..ROWS_PER_DAY).map(|i| cont_value(day, i, c)).collect();
        columns.push(Series::new(format!("I{}", c + 1).into(), values).into_column());
    }
    for c in 0..NUM_CATEGORICAL {
        let values: Vec<Option<String>> = (0..ROWS_PER_DAY).map(|i| cat_value(day, i, c)).collect();
        columns.push(Series::new(format!("C{}", c + 1).into(), values).into_column());
    }
    DataFrame::new(columns).unwrap()
}

pub fn write_parquet_days(dir: &Path, days: std::ops::Range<u32>) {
    std::fs::create_dir_all(dir).unwrap();
    for day in days {
        let mut df = day_frame(day);
        let file = File::create(dir.join(format!("day_{day}.parquet"))).unwrap();
        ParquetWriter::new(file).finish(&mut df).unwrap();
    }
}

/// Raw Criteo text: tab-separated, headerless, empty fields for missing values
pub fn write_tsv_days(dir: &Path, days: std::ops::Range<u32>, extension: &str) {
    std::fs::create_dir_all(dir).unwrap();
    for day in days {
        let name = if extension.is_empty() {
            format!("day_{day}")
        } else {
            format!("day_{day}.{extension}")
        };
        let mut f = File::create(dir.join(name)).unwrap();
        for i in 0..ROWS_PER_DAY {
            let mut fields = vec![label_value(i).to_string()];
            fields.extend((0..NUM_CONTINUOUS).map(|c| cont_value(day, i, c).map(|v| v.to_string()).unwrap_or_default()));
            fields.extend((0..NUM_CATEGORICAL).map(|c| cat_value(day, i, c).unwrap_or_default()));
            writeln!(f, "{}", fields.join("\t")).unwrap();
        }
    }
}

/// Small-footprint configuration over `<root>/days`, ten rows per partition
pub fn test_config(root: &Path) -> PipelineConfig {
    PipelineConfig::new()
        .with_layout(DayLayout::new(root.join("days"), "parquet"))
        .with_output_dir(root.join("output"))
        .with_stats_dir(root.join("stats"))
        .with_cluster(ClusterConfig::new().with_workers(2).with_memory_limit(1 << 30))
        .with_ops(OpsConfig {
            freq_threshold: FREQ_THRESHOLD,
            num_buckets: Some(1000),
            ..Default::default()
        })
        .with_part_size(ROW_BYTES * 10)
        .with_shuffle(ShuffleMode::None)
        .with_trainer(TrainerSettings {
            config_path: root.join("dlrm.json"),
            ..Default::default()
        })
}

pub fn read_outputs(files: &[PathBuf]) -> Vec<DataFrame> {
    files
        .iter()
        .map(|f| ParquetReader::new(File::open(f).unwrap()).finish().unwrap())
        .collect()
}

pub fn i64_column(frames: &[DataFrame], name: &str) -> Vec<i64> {
    frames
        .iter()
        .flat_map(|df| {
            df.column(name)
                .unwrap()
                .as_materialized_series()
                .i64()
                .unwrap()
                .into_no_null_iter()
                .collect::<Vec<_>>()
        })
        .collect()
}

pub fn f32_column(frames: &[DataFrame], name: &str) -> Vec<Option<f32>> {
    frames
        .iter()
        .flat_map(|df| {
            df.column(name)
                .unwrap()
                .as_materialized_series()
                .f32()
                .unwrap()
                .into_iter()
                .collect::<Vec<_>>()
        })
        .collect()
}
